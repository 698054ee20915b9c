use super::{DistributedItem, EvictionReason};
use crate::config::SwarmConfig;
use crate::protocol::SwarmMessage;
use crate::swarm::{ChunkBitmap, PeerId, PeerSnapshot};
use crate::transport::Transport;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, info, trace};

impl DistributedItem {
    /// Sends the local bitmap to every contactable peer.
    ///
    /// A peer whose send fails is evicted. Returns how many sends succeeded.
    pub fn broadcast_local_availability(&self, transport: &dyn Transport) -> usize {
        let (targets, message) = {
            let state = self.lock();
            (
                state.swarm.contactable_peers(),
                SwarmMessage::AvailabilityUpdate {
                    checksum: self.checksum,
                    source: state.swarm.local_id(),
                    bitmap: state.swarm.local_bitmap(),
                    is_super_peer: state.swarm.local_is_super(),
                },
            )
        };

        let mut sent = 0;
        for (peer, addr) in targets {
            match transport.send(addr, &message) {
                Ok(()) => sent += 1,
                Err(e) => {
                    debug!("availability update to {} failed: {}", addr, e);
                    self.evict_peer(&peer, EvictionReason::SendFailed);
                }
            }
        }
        trace!("broadcast availability of {} to {} peers", self.checksum, sent);
        sent
    }

    /// Asks every known peer for its current bitmap and waits for a quorum.
    ///
    /// With `cascade_depth > 0` peers also return their own peer lists;
    /// unknown peers in those lists are added but not queried further. The
    /// wait ends once replies reach `availability_quorum` or a third of the
    /// peers asked, once a reply has come in and the swarm holds enough
    /// online peers, or when `timeout` runs out. Returns the reply count.
    pub async fn update_peer_availability(
        &self,
        transport: &dyn Transport,
        cascade_depth: u8,
        timeout: Duration,
        config: &SwarmConfig,
    ) -> usize {
        let (targets, request) = {
            let state = self.lock();
            (
                state.swarm.contactable_peers(),
                SwarmMessage::AvailabilityRequest {
                    checksum: self.checksum,
                    source: state.swarm.local_id(),
                    bitmap: state.swarm.local_bitmap(),
                    is_super_peer: state.swarm.local_is_super(),
                    want_peers: cascade_depth > 0,
                },
            )
        };

        self.availability_replies.store(0, Ordering::Release);
        let mut asked = 0usize;
        for (peer, addr) in targets {
            match transport.send(addr, &request) {
                Ok(()) => asked += 1,
                Err(e) => {
                    debug!("availability request to {} failed: {}", addr, e);
                    self.evict_peer(&peer, EvictionReason::SendFailed);
                }
            }
        }
        if asked == 0 {
            return 0;
        }

        let quorum = config.availability_quorum.min(asked.div_ceil(3)).max(1);
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        loop {
            let notified = self.discovery.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let replies = self.availability_replies.load(Ordering::Acquire);
            if replies >= quorum {
                break;
            }
            if replies > 0 && self.lock().swarm.has_enough_peers() {
                debug!(
                    "availability update for {} ended early with enough online peers",
                    self.checksum
                );
                break;
            }

            let timed_out = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, notified).await.is_err(),
                None => {
                    notified.await;
                    false
                }
            };
            if timed_out {
                debug!(
                    "availability update for {} timed out with {}/{} replies",
                    self.checksum,
                    self.availability_replies.load(Ordering::Acquire),
                    quorum
                );
                break;
            }
        }

        if !config.availability_settle_delay.is_zero() {
            tokio::time::sleep(config.availability_settle_delay).await;
        }
        self.availability_replies.load(Ordering::Acquire)
    }

    /// Merges a peer's availability reply and the peers it listed.
    ///
    /// Listed peers already in the registry are left alone; the direct report
    /// from a peer is fresher than second-hand gossip about it.
    pub(crate) fn apply_availability_reply(
        &self,
        from: SocketAddr,
        source: PeerId,
        bitmap: ChunkBitmap,
        is_super_peer: bool,
        peers: &[PeerSnapshot],
    ) {
        let mut discovered = 0;
        let enough = {
            let mut state = self.lock();
            let mut enough = state
                .swarm
                .add_or_update_peer(source, from, bitmap, is_super_peer);
            for snapshot in peers {
                if snapshot.peer_id == state.swarm.local_id() || state.swarm.contains(&snapshot.peer_id) {
                    continue;
                }
                enough |= state.swarm.add_or_update_peer(
                    snapshot.peer_id,
                    snapshot.addr,
                    snapshot.bitmap,
                    snapshot.is_super_peer,
                );
                discovered += 1;
            }
            enough
        };

        if discovered > 0 {
            debug!("discovered {} peers of {} via {}", discovered, self.checksum, source);
        }
        if enough {
            info!("item {} reached enough online peers", self.checksum);
        }
        self.record_availability_reply();
    }
}
