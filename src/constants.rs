//! Protocol constants and tuning parameters.
//!
//! This module contains the constants used throughout the swarm engine,
//! including chunk limits, scheduling caps, timeouts, and gossip tuning.
//!
//! Every runtime-tunable value here is only a default: [`SwarmConfig`]
//! carries the effective values and can override any of them.
//!
//! [`SwarmConfig`]: crate::config::SwarmConfig

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style)
pub const CLIENT_PREFIX: &[u8; 8] = b"-DS0001-";

// ============================================================================
// Chunk layout
// ============================================================================

/// Number of slots in a chunk bitmap.
///
/// Chunk indices travel as a single byte on the wire, so this can never grow
/// past 256 without changing the message format.
pub const MAX_CHUNKS: usize = 256;

/// Largest number of chunks a single item may be split into.
pub const MAX_TOTAL_CHUNKS: usize = 255;

/// Default chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 1024 * 1024;

// ============================================================================
// Request scheduling
// ============================================================================

/// Concurrent chunk requests allowed against a single peer.
pub const PER_PEER_REQUEST_CAP: usize = 2;

/// Concurrent chunk requests allowed for one item across all peers.
pub const GLOBAL_REQUEST_CAP: usize = 8;

/// A request with no reply after this long is considered stalled.
pub const CHUNK_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Stalls tolerated from one (non super) peer before it is evicted.
pub const MAX_PEER_TIMEOUT_COUNT: u32 = 2;

/// Wait between passes when every candidate peer was busy or exhausted.
pub const PEER_BUSY_BACKOFF: Duration = Duration::from_millis(500);

/// How long a peer stays flagged busy after replying `Busy`.
pub const PEER_BUSY_TIMEOUT: Duration = Duration::from_millis(1500);

/// Wait between passes after new requests went out.
pub const PROGRESS_WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// Gossip
// ============================================================================

/// Availability replies that satisfy the quorum regardless of swarm size.
pub const AVAILABILITY_QUORUM: usize = 3;

/// Upper bound on the availability quorum wait.
pub const AVAILABILITY_UPDATE_TIMEOUT: Duration = Duration::from_secs(3);

/// Extra delay after the quorum is reached so stragglers can land.
pub const AVAILABILITY_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Peer-list cascade depth used on assembly entry. Only one level is honored.
pub const AVAILABILITY_CASCADE_DEPTH: u8 = 1;

/// Online peers after which initial discovery is considered good enough.
pub const ENOUGH_PEERS_THRESHOLD: usize = 4;

/// Numerator applied to `holders - 0.5` in the chunk health ratio.
pub const CHUNK_HEALTH_FACTOR: f64 = 1.5;

// ============================================================================
// Reply correlation
// ============================================================================

/// Lifetime of a half-received chunk reply.
pub const REPLY_CORRELATION_TTL: Duration = Duration::from_secs(30);

/// Interval between correlation cache sweeps.
pub const REPLY_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Node limits
// ============================================================================

/// Items that may assemble at the same time.
pub const MAX_CONCURRENT_BUILDS: usize = 4;

/// Chunk uploads served at the same time before replying `Busy`.
pub const MAX_CONCURRENT_UPLOADS: usize = 16;

/// Entries kept in an item's build log.
pub const BUILD_LOG_CAPACITY: usize = 256;

/// Fixed part of the default assembly timeout.
pub const ASSEMBLY_TIMEOUT_BASE: Duration = Duration::from_secs(30);

/// Additional assembly timeout per MiB of item data.
pub const ASSEMBLY_TIMEOUT_PER_MIB: Duration = Duration::from_secs(2);
