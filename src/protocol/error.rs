use thiserror::Error;

/// Errors raised while decoding swarm messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The message ended before all fields were read.
    #[error("message truncated: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    /// Received an unknown message ID.
    #[error("invalid message id: {0}")]
    InvalidMessageId(u8),

    #[error("invalid reply state: {0}")]
    InvalidReplyState(u8),

    #[error("invalid address family: {0}")]
    InvalidAddressFamily(u8),

    /// Bytes left over after a complete message.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}
