use thiserror::Error;

/// Consistency errors raised by the swarm registry and chunk layout.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// No known peer holds a chunk the local peer is missing.
    #[error("no source for chunk {0}")]
    NoSourceForChunk(u8),

    /// The item has more chunks than a bitmap can describe.
    #[error("too many chunks: {0}")]
    TooManyChunks(usize),

    #[error("item is empty")]
    EmptyItem,

    #[error("chunk size must be non-zero")]
    ZeroChunkSize,
}
