use super::checksum::ItemChecksum;
use super::error::StorageError;
use super::store::{check_bounds, ChunkStore};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use sha2::{Digest, Sha256};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex as TokioMutex;

const HASH_BUFFER_SIZE: usize = 256 * 1024;

/// A [`ChunkStore`] backed by a single file on disk.
///
/// Stores made with [`FileStore::create`] own their file and delete it on
/// release; stores made with [`FileStore::open`] leave it in place.
pub struct FileStore {
    path: PathBuf,
    file: TokioMutex<Option<File>>,
    len: u64,
    owned: bool,
}

impl FileStore {
    /// Creates (or truncates) a sparse file of `len` bytes to assemble into.
    pub async fn create(path: impl AsRef<Path>, len: u64) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await?;
        file.set_len(len).await?;

        Ok(Self {
            path,
            file: TokioMutex::new(Some(file)),
            len,
            owned: true,
        })
    }

    /// Opens an existing complete file, e.g. for an item being introduced.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path).await?;
        let len = file.metadata().await?.len();

        Ok(Self {
            path,
            file: TokioMutex::new(Some(file)),
            len,
            owned: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChunkStore for FileStore {
    fn len(&self) -> u64 {
        self.len
    }

    fn write_at(&self, offset: u64, data: Bytes) -> BoxFuture<'_, Result<(), StorageError>> {
        async move {
            check_bounds(offset, data.len() as u64, self.len)?;
            let mut guard = self.file.lock().await;
            let file = guard.as_mut().ok_or(StorageError::Released)?;
            file.seek(SeekFrom::Start(offset)).await?;
            file.write_all(&data).await?;
            Ok(())
        }
        .boxed()
    }

    fn read_chunk(&self, offset: u64, length: u32) -> BoxFuture<'_, Result<Bytes, StorageError>> {
        async move {
            check_bounds(offset, length as u64, self.len)?;
            let mut guard = self.file.lock().await;
            let file = guard.as_mut().ok_or(StorageError::Released)?;
            file.seek(SeekFrom::Start(offset)).await?;

            let mut buf = vec![0u8; length as usize];
            file.read_exact(&mut buf).await?;
            Ok(Bytes::from(buf))
        }
        .boxed()
    }

    fn content_hash(&self) -> BoxFuture<'_, Result<ItemChecksum, StorageError>> {
        async move {
            let mut guard = self.file.lock().await;
            let file = guard.as_mut().ok_or(StorageError::Released)?;
            file.flush().await?;
            file.seek(SeekFrom::Start(0)).await?;

            let mut hasher = Sha256::new();
            let mut buf = vec![0u8; HASH_BUFFER_SIZE];
            let mut remaining = self.len;
            while remaining > 0 {
                let want = remaining.min(HASH_BUFFER_SIZE as u64) as usize;
                file.read_exact(&mut buf[..want]).await?;
                hasher.update(&buf[..want]);
                remaining -= want as u64;
            }
            Ok(ItemChecksum(hasher.finalize().into()))
        }
        .boxed()
    }

    fn release(&self) -> BoxFuture<'_, Result<(), StorageError>> {
        async move {
            let Some(file) = self.file.lock().await.take() else {
                return Ok(());
            };
            file.sync_data().await?;
            drop(file);

            if self.owned {
                tokio::fs::remove_file(&self.path).await?;
            }
            Ok(())
        }
        .boxed()
    }
}
