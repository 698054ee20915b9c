use crate::constants::MAX_TOTAL_CHUNKS;
use crate::swarm::SwarmError;

/// Byte range of one chunk within the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: u8,
    pub offset: u64,
    pub length: u64,
}

/// How an item is split into chunks. Every chunk but the last has
/// `chunk_size` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLayout {
    total_bytes: u64,
    chunk_size: u32,
    spans: Vec<ChunkSpan>,
}

impl ChunkLayout {
    pub fn new(total_bytes: u64, chunk_size: u32) -> Result<Self, SwarmError> {
        if total_bytes == 0 {
            return Err(SwarmError::EmptyItem);
        }
        if chunk_size == 0 {
            return Err(SwarmError::ZeroChunkSize);
        }

        let count = total_bytes.div_ceil(chunk_size as u64);
        if count > MAX_TOTAL_CHUNKS as u64 {
            return Err(SwarmError::TooManyChunks(
                usize::try_from(count).unwrap_or(usize::MAX),
            ));
        }

        let spans = (0..count)
            .map(|i| {
                let offset = i * chunk_size as u64;
                ChunkSpan {
                    index: i as u8,
                    offset,
                    length: (total_bytes - offset).min(chunk_size as u64),
                }
            })
            .collect();

        Ok(Self {
            total_bytes,
            chunk_size,
            spans,
        })
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> usize {
        self.spans.len()
    }

    pub fn span(&self, index: u8) -> Option<ChunkSpan> {
        self.spans.get(index as usize).copied()
    }

    pub fn spans(&self) -> &[ChunkSpan] {
        &self.spans
    }
}
