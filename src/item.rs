//! Distributed items and their per-item state.
//!
//! A [`DistributedItem`] ties together everything the engine knows about one
//! item: its checksum and [`ChunkLayout`], the backing
//! [`ChunkStore`](crate::storage::ChunkStore), the swarm registry, and the
//! outstanding chunk requests. Registry and requests live behind a single
//! lock ([`ItemState`]) so the scheduler and message handlers always see them
//! consistently. The lock is never held across an `.await`.
//!
//! Scheduler wakeups go through a [`Notify`] that stores one permit, so a
//! reply integrated while the scheduler is busy planning is not lost.

mod build_log;
mod gossip;
mod layout;

pub use build_log::{BuildEvent, BuildLog, BuildLogEntry, EvictionReason};
pub use layout::{ChunkLayout, ChunkSpan};

use crate::assembly::ChunkRequestTracker;
use crate::protocol::AssemblyDescriptor;
use crate::storage::{ChunkStore, ItemChecksum};
use crate::swarm::{ChunkBitmap, PeerId, SwarmChunkAvailability};
use parking_lot::{Mutex, MutexGuard};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

/// Mutable state of one item, guarded by the item lock.
pub struct ItemState {
    pub swarm: SwarmChunkAvailability,
    pub requests: ChunkRequestTracker,
}

/// Events pushed into an assembling item from outside the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemEvent {
    ConnectionLost(SocketAddr),
}

pub struct DistributedItem {
    checksum: ItemChecksum,
    layout: ChunkLayout,
    store: Arc<dyn ChunkStore>,
    state: Mutex<ItemState>,
    progress: Notify,
    discovery: Notify,
    availability_replies: AtomicUsize,
    aborted: AtomicBool,
    failure: Mutex<Option<String>>,
    listener: Mutex<Option<mpsc::UnboundedSender<ItemEvent>>>,
    build_log: Mutex<BuildLog>,
}

impl DistributedItem {
    pub fn new(
        checksum: ItemChecksum,
        layout: ChunkLayout,
        store: Arc<dyn ChunkStore>,
        swarm: SwarmChunkAvailability,
        build_log_capacity: usize,
    ) -> Self {
        Self {
            checksum,
            layout,
            store,
            state: Mutex::new(ItemState {
                swarm,
                requests: ChunkRequestTracker::new(),
            }),
            progress: Notify::new(),
            discovery: Notify::new(),
            availability_replies: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            failure: Mutex::new(None),
            listener: Mutex::new(None),
            build_log: Mutex::new(BuildLog::new(build_log_capacity)),
        }
    }

    pub fn checksum(&self) -> ItemChecksum {
        self.checksum
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub fn total_chunks(&self) -> usize {
        self.layout.total_chunks()
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Locks the registry and request tracker together.
    pub fn lock(&self) -> MutexGuard<'_, ItemState> {
        self.state.lock()
    }

    pub fn local_bitmap(&self) -> ChunkBitmap {
        self.state.lock().swarm.local_bitmap()
    }

    pub fn is_complete(&self) -> bool {
        self.local_bitmap().all_set_through(self.total_chunks())
    }

    /// Descriptor another peer can use to join this item's swarm.
    pub fn describe(&self) -> AssemblyDescriptor {
        AssemblyDescriptor {
            checksum: self.checksum,
            total_bytes: self.layout.total_bytes(),
            chunk_size: self.layout.chunk_size(),
            peers: self.state.lock().swarm.snapshot(),
        }
    }

    pub fn progress(&self) -> &Notify {
        &self.progress
    }

    /// Wakes the scheduler.
    pub fn wake(&self) {
        self.progress.notify_one();
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.wake();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Records an error that ends the current assembly.
    pub fn fail(&self, reason: String) {
        warn!("item {} failed: {}", self.checksum, reason);
        *self.failure.lock() = Some(reason);
        self.wake();
    }

    pub fn take_failure(&self) -> Option<String> {
        self.failure.lock().take()
    }

    pub fn is_assembling(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Installs the scheduler's event queue. Fails if one is installed.
    pub(crate) fn register_listener(&self, tx: mpsc::UnboundedSender<ItemEvent>) -> bool {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return false;
        }
        *listener = Some(tx);
        true
    }

    pub(crate) fn deregister_listener(&self) {
        self.listener.lock().take();
    }

    /// Queues a connection loss for the scheduler, if one is running.
    pub fn notify_connection_lost(&self, addr: SocketAddr) -> bool {
        let delivered = match self.listener.lock().as_ref() {
            Some(tx) => tx.send(ItemEvent::ConnectionLost(addr)).is_ok(),
            None => false,
        };
        if delivered {
            self.wake();
        }
        delivered
    }

    /// Removes a peer from the swarm and drops its unanswered requests.
    ///
    /// Returns false if the registry refused the removal.
    pub fn evict_peer(&self, peer: &PeerId, reason: EvictionReason) -> bool {
        let freed = {
            let mut state = self.lock();
            if !state.swarm.remove_peer(peer, false) {
                return false;
            }
            state.requests.remove_pending_for_peer(peer)
        };
        debug!(
            "evicted peer {} from {} ({:?}), {} requests freed",
            peer,
            self.checksum,
            reason,
            freed.len()
        );
        self.log(BuildEvent::PeerEvicted {
            peer: *peer,
            reason,
        });
        true
    }

    pub fn log(&self, event: BuildEvent) {
        self.build_log.lock().push(event);
    }

    /// Copy of the build log, oldest first.
    pub fn build_log(&self) -> Vec<BuildLogEntry> {
        self.build_log.lock().entries().cloned().collect()
    }

    pub(crate) fn record_availability_reply(&self) {
        self.availability_replies.fetch_add(1, Ordering::AcqRel);
        self.discovery.notify_waiters();
    }
}

#[cfg(test)]
mod tests;
