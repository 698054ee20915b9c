use crate::constants::MAX_CHUNKS;
use bytes::Bytes;
use std::fmt;

const WORDS: usize = MAX_CHUNKS / 64;

/// Serialized length of a [`ChunkBitmap`] in bytes.
pub const BITMAP_BYTES: usize = MAX_CHUNKS / 8;

/// A bitmap recording which chunks of an item a peer holds.
///
/// The bitmap always has [`MAX_CHUNKS`] slots regardless of how many chunks
/// the item actually has, so indexing with a `u8` can never go out of range.
/// Bits are numbered from the low bit of the first word.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChunkBitmap {
    words: [u64; WORDS],
}

impl ChunkBitmap {
    /// Creates an empty bitmap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bitmap with chunks `0..total` set.
    pub fn full(total: usize) -> Self {
        let mut bm = Self::new();
        for i in 0..total.min(MAX_CHUNKS) {
            bm.set(i as u8, true);
        }
        bm
    }

    /// Returns true if the chunk at the given index is available.
    pub fn test(&self, index: u8) -> bool {
        let index = index as usize;
        (self.words[index / 64] >> (index % 64)) & 1 == 1
    }

    /// Sets or clears the bit for the chunk at the given index.
    pub fn set(&mut self, index: u8, state: bool) {
        let index = index as usize;
        let mask = 1u64 << (index % 64);
        if state {
            self.words[index / 64] |= mask;
        } else {
            self.words[index / 64] &= !mask;
        }
    }

    /// Returns the number of chunks that are available.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns true if every chunk in `0..total` is available.
    pub fn all_set_through(&self, total: usize) -> bool {
        (0..total.min(MAX_CHUNKS)).all(|i| self.test(i as u8))
    }

    /// Returns true if no chunks are available.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn clear_all(&mut self) {
        self.words = [0; WORDS];
    }

    /// Replaces every bit with the bits of `other`.
    pub fn overwrite_with(&mut self, other: &ChunkBitmap) {
        self.words = other.words;
    }

    /// Returns indices in `0..total` that are not available.
    pub fn missing(&self, total: usize) -> Vec<u8> {
        (0..total.min(MAX_CHUNKS))
            .map(|i| i as u8)
            .filter(|&i| !self.test(i))
            .collect()
    }

    /// Returns indices of all available chunks.
    pub fn available(&self) -> Vec<u8> {
        (0..MAX_CHUNKS)
            .map(|i| i as u8)
            .filter(|&i| self.test(i))
            .collect()
    }

    /// Returns the 32-byte wire form, words little-endian.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = Vec::with_capacity(BITMAP_BYTES);
        for word in &self.words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        Bytes::from(out)
    }

    /// Builds a bitmap from its wire form.
    ///
    /// Short input leaves the remaining slots clear and extra input is
    /// ignored.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut bm = Self::new();
        for (i, word) in bm.words.iter_mut().enumerate() {
            let start = i * 8;
            if start >= bytes.len() {
                break;
            }
            let end = (start + 8).min(bytes.len());
            let mut buf = [0u8; 8];
            buf[..end - start].copy_from_slice(&bytes[start..end]);
            *word = u64::from_le_bytes(buf);
        }
        bm
    }
}

impl fmt::Debug for ChunkBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkBitmap({} set)", self.count())
    }
}
