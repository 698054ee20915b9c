use crate::storage::{ItemChecksum, StorageError};
use crate::swarm::SwarmError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("assembly of {checksum} timed out after {elapsed:?}")]
    Timeout {
        checksum: ItemChecksum,
        elapsed: Duration,
    },

    #[error("swarm error: {0}")]
    Swarm(#[from] SwarmError),

    #[error("chunk index {chunk} out of range ({total} chunks)")]
    ChunkIndexOutOfRange { chunk: u8, total: usize },

    #[error("chunk {chunk} has {actual} bytes, expected {expected}")]
    ChunkLengthMismatch { chunk: u8, expected: u64, actual: u64 },

    #[error("assembled content hashes to {actual}, expected {expected}")]
    ChecksumMismatch {
        expected: ItemChecksum,
        actual: ItemChecksum,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A reply handler hit a fatal error while this item was assembling.
    #[error("integration failed: {0}")]
    Integration(String),

    #[error("item is already being assembled")]
    AlreadyAssembling,
}
