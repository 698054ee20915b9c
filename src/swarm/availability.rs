use super::bitmap::ChunkBitmap;
use super::error::SwarmError;
use super::peer_id::PeerId;
use super::peer_info::PeerAvailabilityInfo;
use super::policy::ContactPolicy;
use crate::config::SwarmConfig;
use crate::constants::CHUNK_HEALTH_FACTOR;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Missing chunk index → contactable holders keyed by address.
pub type ChunksNeeded = BTreeMap<u8, HashMap<SocketAddr, PeerAvailabilityInfo>>;

/// A peer as it is shared with other nodes in descriptors and peer lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub peer_id: PeerId,
    pub addr: SocketAddr,
    pub bitmap: ChunkBitmap,
    pub is_super_peer: bool,
}

/// Registry of every peer known to distribute one item.
///
/// Holds two aligned maps, peer ID to availability and peer ID to address.
/// The local peer is always present in both. This type does no I/O and no
/// locking of its own; the owning item serializes access to it.
pub struct SwarmChunkAvailability {
    local_id: PeerId,
    local_addrs: Vec<SocketAddr>,
    policy: ContactPolicy,
    busy_timeout: Duration,
    enough_peers_threshold: usize,
    enough_peers_reached: bool,
    peers: HashMap<PeerId, PeerAvailabilityInfo>,
    addresses: HashMap<PeerId, SocketAddr>,
}

impl SwarmChunkAvailability {
    pub fn new(
        local_id: PeerId,
        local_addr: SocketAddr,
        local_bitmap: ChunkBitmap,
        local_is_super: bool,
        config: &SwarmConfig,
    ) -> Self {
        let mut peers = HashMap::new();
        peers.insert(
            local_id,
            PeerAvailabilityInfo::new(local_id, local_bitmap, local_is_super),
        );
        let mut addresses = HashMap::new();
        addresses.insert(local_id, local_addr);

        Self {
            local_id,
            local_addrs: vec![local_addr],
            policy: config.contact_policy.clone(),
            busy_timeout: config.peer_busy_timeout,
            enough_peers_threshold: config.enough_peers_threshold,
            enough_peers_reached: false,
            peers,
            addresses,
        }
    }

    /// Adds further local listen addresses for the loopback guard.
    pub fn with_local_addrs<I: IntoIterator<Item = SocketAddr>>(mut self, addrs: I) -> Self {
        for addr in addrs {
            if !self.local_addrs.contains(&addr) {
                self.local_addrs.push(addr);
            }
        }
        self
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addrs[0]
    }

    pub fn local_bitmap(&self) -> ChunkBitmap {
        self.peers
            .get(&self.local_id)
            .map(|p| p.bitmap)
            .unwrap_or_default()
    }

    pub fn local_is_super(&self) -> bool {
        self.peers
            .get(&self.local_id)
            .map(|p| p.is_super_peer)
            .unwrap_or(false)
    }

    /// Number of peers including the local peer.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn peer(&self, peer_id: &PeerId) -> Option<&PeerAvailabilityInfo> {
        self.peers.get(peer_id)
    }

    pub fn address_of(&self, peer_id: &PeerId) -> Option<SocketAddr> {
        self.addresses.get(peer_id).copied()
    }

    pub fn peer_at(&self, addr: SocketAddr) -> Option<PeerId> {
        self.addresses
            .iter()
            .find(|(id, a)| **a == addr && **id != self.local_id)
            .map(|(id, _)| *id)
    }

    /// Remote peers currently flagged online (super-peers always are).
    pub fn online_peer_count(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.peer_id != self.local_id && p.is_online())
            .count()
    }

    /// True once the online remote peers reach the enough-peers threshold.
    pub fn has_enough_peers(&self) -> bool {
        self.online_peer_count() >= self.enough_peers_threshold
    }

    pub fn contact_allowed(&self, peer_id: &PeerId, addr: SocketAddr, is_super_peer: bool) -> bool {
        if *peer_id == self.local_id {
            return false;
        }
        if self.local_addrs.contains(&addr) {
            return false;
        }
        if is_super_peer {
            return true;
        }
        self.policy.permits(addr.ip())
    }

    /// Remote peers that pass the contact filter.
    pub fn contactable_peers(&self) -> Vec<(PeerId, SocketAddr)> {
        self.peers
            .values()
            .filter_map(|info| {
                let addr = *self.addresses.get(&info.peer_id)?;
                self.contact_allowed(&info.peer_id, addr, info.is_super_peer)
                    .then_some((info.peer_id, addr))
            })
            .collect()
    }

    /// Every missing local chunk mapped to the contactable online peers
    /// holding it.
    ///
    /// Busy flags older than the busy window are cleared as a side effect.
    /// Fails if a missing chunk has no holder at all in the registry.
    pub fn chunks_needed(&mut self, total_chunks: usize, now: Instant) -> Result<ChunksNeeded, SwarmError> {
        for info in self.peers.values_mut() {
            if info.expire_busy(now, self.busy_timeout) {
                trace!("busy flag expired for peer {}", info.peer_id);
            }
        }

        let mut needed = ChunksNeeded::new();
        for index in self.local_bitmap().missing(total_chunks) {
            let mut holders = HashMap::new();
            let mut any_holder = false;

            for info in self.peers.values() {
                if !info.bitmap.test(index) {
                    continue;
                }
                any_holder = true;
                let Some(&addr) = self.addresses.get(&info.peer_id) else {
                    continue;
                };
                if info.is_online() && self.contact_allowed(&info.peer_id, addr, info.is_super_peer) {
                    holders.insert(addr, info.clone());
                }
            }

            if !any_holder {
                return Err(SwarmError::NoSourceForChunk(index));
            }
            needed.insert(index, holders);
        }

        Ok(needed)
    }

    /// Merges gossip about a peer.
    ///
    /// The reported bitmap replaces the stored one. Returns true the first
    /// time the online peer count reaches the enough-peers threshold.
    pub fn add_or_update_peer(
        &mut self,
        peer_id: PeerId,
        addr: SocketAddr,
        bitmap: ChunkBitmap,
        is_super_peer: bool,
    ) -> bool {
        if peer_id == self.local_id {
            return false;
        }

        let stale: Vec<PeerId> = self
            .addresses
            .iter()
            .filter(|(id, a)| **a == addr && **id != peer_id && **id != self.local_id)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            debug!("dropping stale peer {} at {} replaced by {}", id, addr, peer_id);
            self.peers.remove(&id);
            self.addresses.remove(&id);
        }

        match self.peers.get_mut(&peer_id) {
            Some(info) => {
                info.bitmap.overwrite_with(&bitmap);
                info.is_super_peer |= is_super_peer;
                info.set_online(true);
            }
            None => {
                debug!(
                    "adding peer {} at {} ({} chunks, super: {})",
                    peer_id,
                    addr,
                    bitmap.count(),
                    is_super_peer
                );
                self.peers.insert(
                    peer_id,
                    PeerAvailabilityInfo::new(peer_id, bitmap, is_super_peer),
                );
            }
        }
        self.addresses.insert(peer_id, addr);

        if !self.enough_peers_reached && self.online_peer_count() >= self.enough_peers_threshold {
            self.enough_peers_reached = true;
            return true;
        }
        false
    }

    /// Removes a peer unless doing so would drop the last source.
    ///
    /// Without `force`, removal is refused if no other peer would remain or
    /// if the peer is the only super-peer. The local peer is never removed.
    pub fn remove_peer(&mut self, peer_id: &PeerId, force: bool) -> bool {
        if *peer_id == self.local_id {
            warn!("refusing to remove the local peer from the swarm");
            return false;
        }
        let Some(info) = self.peers.get(peer_id) else {
            return false;
        };

        if !force {
            if self.peers.len() <= 1 {
                debug!("refusing to remove {}: it is the last peer", peer_id);
                return false;
            }
            if info.is_super_peer {
                let other_supers = self
                    .peers
                    .values()
                    .filter(|p| p.is_super_peer && p.peer_id != *peer_id)
                    .count();
                if other_supers == 0 {
                    debug!("refusing to remove {}: it is the last super-peer", peer_id);
                    return false;
                }
            }
        }

        self.peers.remove(peer_id);
        self.addresses.remove(peer_id);
        debug!("removed peer {} (force: {})", peer_id, force);
        true
    }

    pub fn set_peer_busy(&mut self, peer_id: &PeerId, now: Instant) {
        if let Some(info) = self.peers.get_mut(peer_id) {
            info.set_busy(now);
        }
    }

    pub fn clear_peer_busy(&mut self, peer_id: &PeerId) {
        if let Some(info) = self.peers.get_mut(peer_id) {
            info.clear_busy();
        }
    }

    pub fn set_peer_online(&mut self, peer_id: &PeerId, online: bool) {
        if let Some(info) = self.peers.get_mut(peer_id) {
            info.set_online(online);
        }
    }

    /// Bumps a peer's stalled-request counter.
    ///
    /// Returns the new count and whether the peer is a super-peer.
    pub fn record_peer_timeout(&mut self, peer_id: &PeerId) -> Option<(u32, bool)> {
        let info = self.peers.get_mut(peer_id)?;
        Some((info.record_timeout(), info.is_super_peer))
    }

    pub fn record_local_chunk_complete(&mut self, index: u8) {
        if let Some(info) = self.peers.get_mut(&self.local_id) {
            info.bitmap.set(index, true);
        }
    }

    /// Forgets every locally held chunk, e.g. after the assembled content
    /// failed validation.
    pub fn clear_local_bitmap(&mut self) {
        if let Some(info) = self.peers.get_mut(&self.local_id) {
            info.bitmap.clear_all();
        }
    }

    pub fn holders(&self, index: u8) -> usize {
        self.peers.values().filter(|p| p.bitmap.test(index)).count()
    }

    pub fn complete_peer_count(&self, total_chunks: usize) -> usize {
        self.peers
            .values()
            .filter(|p| p.is_complete(total_chunks))
            .count()
    }

    pub fn incomplete_peer_count(&self, total_chunks: usize) -> usize {
        self.peers.len() - self.complete_peer_count(total_chunks)
    }

    /// Replication of a chunk relative to swarm demand.
    ///
    /// Values below 1 mean too few holders for the number of peers still
    /// building. Returns `f64::MAX` when every peer is complete.
    pub fn chunk_health(&self, index: u8, total_chunks: usize) -> f64 {
        let incomplete = self.incomplete_peer_count(total_chunks);
        if incomplete == 0 {
            return f64::MAX;
        }
        let holders = self.holders(index) as f64;
        (CHUNK_HEALTH_FACTOR * (holders - 0.5)) / incomplete as f64
    }

    /// Every peer, the local one included, in shareable form.
    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        self.peers
            .values()
            .filter_map(|info| {
                Some(PeerSnapshot {
                    peer_id: info.peer_id,
                    addr: *self.addresses.get(&info.peer_id)?,
                    bitmap: info.bitmap,
                    is_super_peer: info.is_super_peer,
                })
            })
            .collect()
    }
}
