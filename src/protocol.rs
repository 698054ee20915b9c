//! Swarm wire messages.
//!
//! Every message starts with a one-byte [`MessageId`] followed by its
//! fields in big-endian order. Framing is left to the transport, so a
//! message is always decoded from exactly one frame.
//!
//! Chunk replies travel in two halves: a [`ChunkReply`] carrying the
//! metadata and a [`SwarmMessage::ChunkData`] carrying the bytes. The halves
//! share a `(source, sequence)` pair and may arrive in either order.
//!
//! # Examples
//!
//! ```
//! use dswarm::protocol::SwarmMessage;
//! use dswarm::storage::ItemChecksum;
//! use dswarm::swarm::PeerId;
//!
//! let msg = SwarmMessage::ChunkRequest {
//!     checksum: ItemChecksum::of(b"payload"),
//!     chunk: 3,
//!     source: PeerId::generate(),
//! };
//!
//! let decoded = SwarmMessage::decode(msg.encode()).unwrap();
//! assert_eq!(decoded, msg);
//! ```

mod error;
mod message;

pub use error::ProtocolError;
pub use message::{AssemblyDescriptor, ChunkReply, MessageId, ReplyState, SwarmMessage};
