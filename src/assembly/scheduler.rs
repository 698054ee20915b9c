use super::error::AssemblyError;
use super::planner::{plan_requests, PlanLimits, PlannedRequest};
use super::tracker::ChunkRequest;
use crate::config::SwarmConfig;
use crate::item::{BuildEvent, DistributedItem, EvictionReason, ItemEvent, ItemState};
use crate::protocol::SwarmMessage;
use crate::swarm::PeerId;
use crate::transport::Transport;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyOutcome {
    /// Every chunk is held and the content matches the checksum.
    Completed,
    /// The item was aborted or the node is shutting down.
    Aborted,
}

/// A request dropped for going unanswered too long.
#[derive(Debug, Clone)]
pub(crate) struct Expiry {
    pub request: ChunkRequest,
    pub timeouts: u32,
    pub evicted: bool,
}

/// Drops requests older than `deadline` and charges a timeout to their peer.
///
/// A peer past `max_timeouts` is evicted unless it is a super-peer, and its
/// other unanswered requests go with it.
pub(crate) fn expire_stalled_requests(
    state: &mut ItemState,
    now: Instant,
    deadline: Duration,
    max_timeouts: u32,
) -> Vec<Expiry> {
    let mut expiries = Vec::new();
    for request in state.requests.expired(now, deadline) {
        state.requests.remove(request.chunk);

        let mut timeouts = 0;
        let mut evicted = false;
        if let Some((count, is_super)) = state.swarm.record_peer_timeout(&request.peer) {
            timeouts = count;
            if count > max_timeouts && !is_super && state.swarm.remove_peer(&request.peer, false) {
                state.requests.remove_pending_for_peer(&request.peer);
                evicted = true;
            }
        }
        expiries.push(Expiry {
            request,
            timeouts,
            evicted,
        });
    }
    expiries
}

/// Drives the assembly of one item to completion.
pub struct AssemblyScheduler<'a> {
    item: &'a DistributedItem,
    transport: &'a dyn Transport,
    config: &'a SwarmConfig,
    shutdown: &'a AtomicBool,
}

impl<'a> AssemblyScheduler<'a> {
    pub fn new(
        item: &'a DistributedItem,
        transport: &'a dyn Transport,
        config: &'a SwarmConfig,
        shutdown: &'a AtomicBool,
    ) -> Self {
        Self {
            item,
            transport,
            config,
            shutdown,
        }
    }

    /// Runs until the item is complete, aborted, failed, or `timeout` has
    /// passed.
    pub async fn run(&self, timeout: Duration) -> Result<AssemblyOutcome, AssemblyError> {
        let (tx, mut events) = mpsc::unbounded_channel();
        if !self.item.register_listener(tx) {
            return Err(AssemblyError::AlreadyAssembling);
        }

        let started = Instant::now();
        let total = self.item.total_chunks();
        let missing = self.item.local_bitmap().missing(total).len();
        info!(
            "assembling {} ({} of {} chunks missing)",
            self.item.checksum(),
            missing,
            total
        );
        self.item.log(BuildEvent::Started { missing });

        let result = self.assemble(started, timeout, &mut events).await;
        self.item.deregister_listener();

        match &result {
            Ok(AssemblyOutcome::Completed) => {
                let elapsed = started.elapsed();
                info!("assembled {} in {:?}", self.item.checksum(), elapsed);
                self.item.log(BuildEvent::Completed { elapsed });
                self.item.broadcast_local_availability(self.transport);
            }
            Ok(AssemblyOutcome::Aborted) => {
                info!("assembly of {} aborted", self.item.checksum());
                self.item.log(BuildEvent::Aborted);
            }
            Err(e) => {
                warn!("assembly of {} failed: {}", self.item.checksum(), e);
                self.item.log(BuildEvent::Failed {
                    reason: e.to_string(),
                });
                self.item.broadcast_local_availability(self.transport);
            }
        }
        result
    }

    async fn assemble(
        &self,
        started: Instant,
        timeout: Duration,
        events: &mut mpsc::UnboundedReceiver<ItemEvent>,
    ) -> Result<AssemblyOutcome, AssemblyError> {
        let checksum = self.item.checksum();
        let total = self.item.total_chunks();
        // A budget too large to represent means no deadline.
        let budget_deadline = started.checked_add(timeout);
        let request_deadline = (timeout / 2).min(self.config.chunk_request_timeout);
        let local_id = self.item.lock().swarm.local_id();

        self.item
            .update_peer_availability(
                self.transport,
                self.config.availability_cascade_depth,
                self.config.availability_update_timeout.min(timeout),
                self.config,
            )
            .await;

        loop {
            if self.shutdown.load(Ordering::Acquire) || self.item.is_aborted() {
                return Ok(AssemblyOutcome::Aborted);
            }
            if let Some(reason) = self.item.take_failure() {
                return Err(AssemblyError::Integration(reason));
            }
            while let Ok(event) = events.try_recv() {
                self.handle_event(event);
            }

            let now = Instant::now();
            if budget_deadline.is_some_and(|deadline| now >= deadline) {
                return Err(AssemblyError::Timeout {
                    checksum,
                    elapsed: now.saturating_duration_since(started),
                });
            }

            let (expiries, plan) = {
                let mut state = self.item.lock();
                let expiries = expire_stalled_requests(
                    &mut state,
                    now,
                    request_deadline,
                    self.config.max_peer_timeout_count,
                );
                let plan = state.swarm.chunks_needed(total, now).map(|needed| {
                    if needed.is_empty() {
                        return None;
                    }
                    let limits = PlanLimits {
                        per_peer_cap: self.config.per_peer_request_cap,
                        global_cap: self.config.global_request_cap,
                        majority_complete: state.swarm.complete_peer_count(total) * 2
                            > state.swarm.peer_count(),
                    };
                    let plan = plan_requests(&needed, &state.requests, &limits, &mut rand::rng());
                    for planned in &plan {
                        state
                            .requests
                            .insert(ChunkRequest::new(planned.chunk, planned.peer, planned.addr, now));
                    }
                    Some(plan)
                });
                (expiries, plan)
            };

            self.log_expiries(&expiries);
            let Some(plan) = plan? else {
                break;
            };
            let sent = self.issue(local_id, plan);

            let mut wait = if sent > 0 {
                self.config.progress_wait
            } else {
                self.config.peer_busy_backoff
            };
            if let Some(deadline) = budget_deadline {
                wait = wait.min(deadline.saturating_duration_since(Instant::now()));
            }
            let _ = tokio::time::timeout(wait, self.item.progress().notified()).await;
        }

        let actual = self.item.store().content_hash().await?;
        if actual != checksum {
            let mut state = self.item.lock();
            state.swarm.clear_local_bitmap();
            state.requests.clear();
            return Err(AssemblyError::ChecksumMismatch {
                expected: checksum,
                actual,
            });
        }
        Ok(AssemblyOutcome::Completed)
    }

    /// Sends planned requests. A failed send evicts the peer and discards the
    /// entries just created for it.
    fn issue(&self, local_id: PeerId, plan: Vec<PlannedRequest>) -> usize {
        let checksum = self.item.checksum();
        let mut failed: HashSet<PeerId> = HashSet::new();
        let mut sent = 0;

        for planned in plan {
            if failed.contains(&planned.peer) {
                continue;
            }
            let message = SwarmMessage::ChunkRequest {
                checksum,
                chunk: planned.chunk,
                source: local_id,
            };
            match self.transport.send(planned.addr, &message) {
                Ok(()) => {
                    sent += 1;
                    self.item.log(BuildEvent::RequestSent {
                        chunk: planned.chunk,
                        peer: planned.peer,
                    });
                }
                Err(e) => {
                    debug!("chunk request to {} failed: {}", planned.addr, e);
                    failed.insert(planned.peer);
                    if !self.item.evict_peer(&planned.peer, EvictionReason::SendFailed) {
                        self.item.lock().requests.remove_pending_for_peer(&planned.peer);
                    }
                }
            }
        }
        sent
    }

    fn handle_event(&self, event: ItemEvent) {
        match event {
            ItemEvent::ConnectionLost(addr) => {
                let Some(peer) = self.item.lock().swarm.peer_at(addr) else {
                    return;
                };
                debug!("connection to {} ({}) lost", peer, addr);
                if !self.item.evict_peer(&peer, EvictionReason::ConnectionLost) {
                    let mut state = self.item.lock();
                    state.swarm.set_peer_online(&peer, false);
                    state.requests.remove_pending_for_peer(&peer);
                }
            }
        }
    }

    fn log_expiries(&self, expiries: &[Expiry]) {
        for expiry in expiries {
            let peer = expiry.request.peer;
            debug!(
                "request for chunk {} to {} expired ({} timeouts)",
                expiry.request.chunk, peer, expiry.timeouts
            );
            self.item.log(BuildEvent::RequestExpired {
                chunk: expiry.request.chunk,
                peer,
            });
            if expiry.evicted {
                warn!("evicted {} from {} after {} timeouts", peer, self.item.checksum(), expiry.timeouts);
                self.item.log(BuildEvent::PeerEvicted {
                    peer,
                    reason: EvictionReason::Timeout,
                });
            }
        }
    }
}
