use crate::assembly::AssemblyError;
use crate::storage::{ItemChecksum, StorageError};
use crate::swarm::SwarmError;
use crate::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("unknown item: {0}")]
    UnknownItem(ItemChecksum),

    #[error("item already registered: {0}")]
    DuplicateItem(ItemChecksum),

    #[error("store holds {actual} bytes, descriptor expects {expected}")]
    StoreSizeMismatch { expected: u64, actual: u64 },

    #[error("no descriptor for {0} before the deadline")]
    DescriptorTimeout(ItemChecksum),

    #[error("node is shutting down")]
    ShuttingDown,

    #[error("swarm error: {0}")]
    Swarm(#[from] SwarmError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("assembly error: {0}")]
    Assembly(#[from] AssemblyError),
}
