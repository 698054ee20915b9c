//! Runtime configuration.
//!
//! [`SwarmConfig`] gathers every tunable of the engine. Its [`Default`]
//! implementation takes the values in [`crate::constants`].
//!
//! # Examples
//!
//! ```
//! use dswarm::config::SwarmConfig;
//! use std::time::Duration;
//!
//! let config = SwarmConfig::default()
//!     .with_request_caps(4, 16)
//!     .with_chunk_request_timeout(Duration::from_secs(5));
//!
//! assert_eq!(config.per_peer_request_cap, 4);
//! assert_eq!(config.global_request_cap, 16);
//! ```

use crate::constants::*;
use crate::swarm::ContactPolicy;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Concurrent requests allowed against a single peer.
    pub per_peer_request_cap: usize,
    /// Concurrent requests allowed per item.
    pub global_request_cap: usize,
    /// Age after which an unanswered request counts as stalled.
    pub chunk_request_timeout: Duration,
    /// Stalls tolerated before a non super-peer is evicted.
    pub max_peer_timeout_count: u32,
    /// Scheduler wait when no request could be sent.
    pub peer_busy_backoff: Duration,
    /// How long a `Busy` reply keeps a peer out of planning.
    pub peer_busy_timeout: Duration,
    /// Scheduler wait after requests went out.
    pub progress_wait: Duration,
    pub availability_quorum: usize,
    pub availability_update_timeout: Duration,
    pub availability_settle_delay: Duration,
    pub availability_cascade_depth: u8,
    pub enough_peers_threshold: usize,
    /// Lifetime of half-received replies in the correlation cache.
    pub reply_ttl: Duration,
    pub reply_sweep_interval: Duration,
    pub max_concurrent_builds: usize,
    pub max_concurrent_uploads: usize,
    pub default_chunk_size: u32,
    pub assembly_timeout_base: Duration,
    pub assembly_timeout_per_mib: Duration,
    pub contact_policy: ContactPolicy,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            per_peer_request_cap: PER_PEER_REQUEST_CAP,
            global_request_cap: GLOBAL_REQUEST_CAP,
            chunk_request_timeout: CHUNK_REQUEST_TIMEOUT,
            max_peer_timeout_count: MAX_PEER_TIMEOUT_COUNT,
            peer_busy_backoff: PEER_BUSY_BACKOFF,
            peer_busy_timeout: PEER_BUSY_TIMEOUT,
            progress_wait: PROGRESS_WAIT,
            availability_quorum: AVAILABILITY_QUORUM,
            availability_update_timeout: AVAILABILITY_UPDATE_TIMEOUT,
            availability_settle_delay: AVAILABILITY_SETTLE_DELAY,
            availability_cascade_depth: AVAILABILITY_CASCADE_DEPTH,
            enough_peers_threshold: ENOUGH_PEERS_THRESHOLD,
            reply_ttl: REPLY_CORRELATION_TTL,
            reply_sweep_interval: REPLY_SWEEP_INTERVAL,
            max_concurrent_builds: MAX_CONCURRENT_BUILDS,
            max_concurrent_uploads: MAX_CONCURRENT_UPLOADS,
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            assembly_timeout_base: ASSEMBLY_TIMEOUT_BASE,
            assembly_timeout_per_mib: ASSEMBLY_TIMEOUT_PER_MIB,
            contact_policy: ContactPolicy::open(),
        }
    }
}

impl SwarmConfig {
    pub fn with_request_caps(mut self, per_peer: usize, global: usize) -> Self {
        self.per_peer_request_cap = per_peer.max(1);
        self.global_request_cap = global.max(1);
        self
    }

    pub fn with_chunk_request_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_request_timeout = timeout;
        self
    }

    pub fn with_max_peer_timeout_count(mut self, count: u32) -> Self {
        self.max_peer_timeout_count = count;
        self
    }

    pub fn with_peer_busy_timeout(mut self, window: Duration) -> Self {
        self.peer_busy_timeout = window;
        self
    }

    pub fn with_waits(mut self, progress: Duration, busy_backoff: Duration) -> Self {
        self.progress_wait = progress;
        self.peer_busy_backoff = busy_backoff;
        self
    }

    pub fn with_availability_update(mut self, quorum: usize, timeout: Duration) -> Self {
        self.availability_quorum = quorum;
        self.availability_update_timeout = timeout;
        self
    }

    pub fn with_reply_ttl(mut self, ttl: Duration) -> Self {
        self.reply_ttl = ttl;
        self
    }

    pub fn with_contact_policy(mut self, policy: ContactPolicy) -> Self {
        self.contact_policy = policy;
        self
    }

    pub fn with_max_concurrent_uploads(mut self, slots: usize) -> Self {
        self.max_concurrent_uploads = slots;
        self
    }

    /// Default overall assembly budget for an item of `total_bytes`.
    pub fn assembly_timeout_for(&self, total_bytes: u64) -> Duration {
        let mib = total_bytes.div_ceil(1024 * 1024) as u32;
        self.assembly_timeout_base + self.assembly_timeout_per_mib * mib
    }
}
