use super::bitmap::ChunkBitmap;
use super::peer_id::PeerId;
use std::time::{Duration, Instant};

/// What the local node knows about one swarm member.
#[derive(Debug, Clone)]
pub struct PeerAvailabilityInfo {
    /// The peer this entry describes.
    pub peer_id: PeerId,
    /// Chunks the peer last reported holding.
    pub bitmap: ChunkBitmap,
    /// Super-peers are always online and are never evicted for timeouts.
    pub is_super_peer: bool,
    busy_since: Option<Instant>,
    is_online: bool,
    timeout_count: u32,
}

impl PeerAvailabilityInfo {
    pub fn new(peer_id: PeerId, bitmap: ChunkBitmap, is_super_peer: bool) -> Self {
        Self {
            peer_id,
            bitmap,
            is_super_peer,
            busy_since: None,
            is_online: true,
            timeout_count: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy_since.is_some()
    }

    /// When the busy flag was raised, if it is set.
    pub fn busy_since(&self) -> Option<Instant> {
        self.busy_since
    }

    pub fn set_busy(&mut self, now: Instant) {
        self.busy_since = Some(now);
    }

    pub fn clear_busy(&mut self) {
        self.busy_since = None;
    }

    /// Clears the busy flag if it was raised more than `window` ago.
    ///
    /// Returns true if the flag was cleared.
    pub fn expire_busy(&mut self, now: Instant, window: Duration) -> bool {
        match self.busy_since {
            Some(since) if now.saturating_duration_since(since) >= window => {
                self.busy_since = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_online(&self) -> bool {
        self.is_super_peer || self.is_online
    }

    pub fn set_online(&mut self, online: bool) {
        self.is_online = online;
    }

    pub fn timeout_count(&self) -> u32 {
        self.timeout_count
    }

    /// Records one stalled request and returns the new count.
    pub fn record_timeout(&mut self) -> u32 {
        self.timeout_count = self.timeout_count.saturating_add(1);
        self.timeout_count
    }

    /// Returns true if the peer holds every chunk in `0..total`.
    pub fn is_complete(&self, total: usize) -> bool {
        self.bitmap.all_set_through(total)
    }
}
