use super::checksum::ItemChecksum;
use super::error::StorageError;
use bytes::Bytes;
use futures::future::BoxFuture;

/// Backing bytes of one distributed item.
///
/// A store has a fixed length chosen at creation. Chunks are written at
/// their precomputed offsets in any order.
pub trait ChunkStore: Send + Sync {
    /// Total size of the item in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes `data` at `offset`.
    fn write_at(&self, offset: u64, data: Bytes) -> BoxFuture<'_, Result<(), StorageError>>;

    /// Reads `length` bytes starting at `offset`.
    fn read_chunk(&self, offset: u64, length: u32) -> BoxFuture<'_, Result<Bytes, StorageError>>;

    /// SHA-256 of the whole item.
    fn content_hash(&self) -> BoxFuture<'_, Result<ItemChecksum, StorageError>>;

    /// Gives up the backing storage. Further access fails.
    fn release(&self) -> BoxFuture<'_, Result<(), StorageError>>;
}

pub(crate) fn check_bounds(offset: u64, length: u64, size: u64) -> Result<(), StorageError> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StorageError::OutOfBounds {
            offset,
            length,
            size,
        }),
    }
}
