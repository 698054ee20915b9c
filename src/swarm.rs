//! Per-item swarm membership and chunk availability.
//!
//! Every distributed item keeps a [`SwarmChunkAvailability`] registry of the
//! peers known to distribute it and the chunks each one holds. Gossip
//! messages overwrite a peer's [`ChunkBitmap`]; the assembly scheduler reads
//! the registry through [`SwarmChunkAvailability::chunks_needed`] to decide
//! which peer to ask for which chunk.
//!
//! # Examples
//!
//! ```
//! use dswarm::config::SwarmConfig;
//! use dswarm::swarm::{ChunkBitmap, PeerId, SwarmChunkAvailability};
//! use std::time::Instant;
//!
//! let config = SwarmConfig::default();
//! let mut swarm = SwarmChunkAvailability::new(
//!     PeerId::generate(),
//!     "10.0.0.1:7000".parse().unwrap(),
//!     ChunkBitmap::new(),
//!     false,
//!     &config,
//! );
//!
//! let seed = PeerId::generate();
//! swarm.add_or_update_peer(seed, "10.0.0.2:7000".parse().unwrap(), ChunkBitmap::full(4), true);
//!
//! let needed = swarm.chunks_needed(4, Instant::now()).unwrap();
//! assert_eq!(needed.len(), 4);
//! assert!(needed.values().all(|holders| holders.len() == 1));
//! ```

mod availability;
mod bitmap;
mod error;
mod peer_id;
mod peer_info;
mod policy;

pub use availability::{ChunksNeeded, PeerSnapshot, SwarmChunkAvailability};
pub use bitmap::{ChunkBitmap, BITMAP_BYTES};
pub use error::SwarmError;
pub use peer_id::PeerId;
pub use peer_info::PeerAvailabilityInfo;
pub use policy::ContactPolicy;
