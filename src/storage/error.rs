use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("write out of bounds: offset {offset}, length {length}, store size {size}")]
    OutOfBounds { offset: u64, length: u64, size: u64 },

    #[error("store released")]
    Released,
}
