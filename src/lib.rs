//! dswarm - Swarm-based chunk distribution
//!
//! This library distributes immutable items between peers by splitting them
//! into at most 255 chunks, tracking which peer holds which chunk, and
//! assembling an item from many peers in parallel.
//!
//! # Modules
//!
//! - [`swarm`] - Chunk bitmaps and per-item peer availability
//! - [`assembly`] - Request scheduling and reply integration
//! - [`item`] - Distributed items and their per-item state
//! - [`node`] - The node service: item registry and message dispatch
//! - [`protocol`] - Wire messages and their binary codec
//! - [`storage`] - Chunk storage backends
//! - [`transport`] - Transport seam and the in-memory network
//! - [`config`] - Runtime configuration

pub mod assembly;
pub mod config;
pub mod constants;
pub mod item;
pub mod node;
pub mod protocol;
pub mod storage;
pub mod swarm;
pub mod transport;

pub use assembly::{
    handle_incoming_chunk_reply, AssemblyError, AssemblyOutcome, AssemblyScheduler,
    ChunkRequestTracker, CompletedReply, MergeState, ReplyCorrelationCache,
};
pub use config::SwarmConfig;
pub use item::{BuildEvent, ChunkLayout, DistributedItem};
pub use node::{NodeError, SwarmNode};
pub use protocol::{AssemblyDescriptor, ChunkReply, ProtocolError, ReplyState, SwarmMessage};
pub use storage::{ChunkStore, FileStore, ItemChecksum, MemoryStore, StorageError};
pub use swarm::{
    ChunkBitmap, ContactPolicy, PeerAvailabilityInfo, PeerId, SwarmChunkAvailability, SwarmError,
};
pub use transport::{MemoryNetwork, Transport, TransportError};
