use super::checksum::ItemChecksum;
use super::error::StorageError;
use super::store::{check_bounds, ChunkStore};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;

/// A [`ChunkStore`] kept entirely in memory.
pub struct MemoryStore {
    data: RwLock<Option<Vec<u8>>>,
    len: u64,
}

impl MemoryStore {
    /// Creates a zero-filled store to assemble into.
    pub fn with_len(len: u64) -> Self {
        Self {
            data: RwLock::new(Some(vec![0u8; len as usize])),
            len,
        }
    }

    /// Wraps existing content, e.g. for an item being introduced.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let len = data.len() as u64;
        Self {
            data: RwLock::new(Some(data)),
            len,
        }
    }

    /// Copies the current content out.
    pub fn snapshot(&self) -> Option<Bytes> {
        self.data.read().as_ref().map(|d| Bytes::copy_from_slice(d))
    }
}

impl ChunkStore for MemoryStore {
    fn len(&self) -> u64 {
        self.len
    }

    fn write_at(&self, offset: u64, data: Bytes) -> BoxFuture<'_, Result<(), StorageError>> {
        async move {
            check_bounds(offset, data.len() as u64, self.len)?;
            let mut guard = self.data.write();
            let buf = guard.as_mut().ok_or(StorageError::Released)?;
            let start = offset as usize;
            buf[start..start + data.len()].copy_from_slice(&data);
            Ok(())
        }
        .boxed()
    }

    fn read_chunk(&self, offset: u64, length: u32) -> BoxFuture<'_, Result<Bytes, StorageError>> {
        async move {
            check_bounds(offset, length as u64, self.len)?;
            let guard = self.data.read();
            let buf = guard.as_ref().ok_or(StorageError::Released)?;
            let start = offset as usize;
            Ok(Bytes::copy_from_slice(&buf[start..start + length as usize]))
        }
        .boxed()
    }

    fn content_hash(&self) -> BoxFuture<'_, Result<ItemChecksum, StorageError>> {
        async move {
            let data = self.snapshot().ok_or(StorageError::Released)?;
            tokio::task::spawn_blocking(move || ItemChecksum::of(&data))
                .await
                .map_err(|e| StorageError::Io(std::io::Error::other(e)))
        }
        .boxed()
    }

    fn release(&self) -> BoxFuture<'_, Result<(), StorageError>> {
        async move {
            self.data.write().take();
            Ok(())
        }
        .boxed()
    }
}
