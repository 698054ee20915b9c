//! The swarm node service.
//!
//! A [`SwarmNode`] owns every item this peer distributes, dispatches incoming
//! [`SwarmMessage`]s to them, serves chunks to other peers, and runs item
//! assemblies under a bounded number of build slots.
//!
//! # Examples
//!
//! ```
//! use dswarm::config::SwarmConfig;
//! use dswarm::node::SwarmNode;
//! use dswarm::storage::MemoryStore;
//! use dswarm::transport::MemoryNetwork;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let network = MemoryNetwork::new();
//! let (transport, inbox) = network.endpoint("10.0.0.1:7000".parse()?);
//! let node = SwarmNode::new(transport, SwarmConfig::default());
//! network.attach(&node, inbox);
//!
//! let store = Arc::new(MemoryStore::from_bytes(vec![7u8; 4096]));
//! let checksum = node.introduce_item(store, 1024).await?;
//! assert_eq!(node.describe_item(&checksum)?.total_bytes, 4096);
//! # Ok(())
//! # }
//! ```

mod error;
mod handler;

pub use error::NodeError;

use crate::assembly::{AssemblyOutcome, AssemblyScheduler, ReplyCorrelationCache};
use crate::config::SwarmConfig;
use crate::constants::BUILD_LOG_CAPACITY;
use crate::item::{ChunkLayout, DistributedItem};
use crate::protocol::{AssemblyDescriptor, SwarmMessage};
use crate::storage::{ChunkStore, ItemChecksum};
use crate::swarm::{ChunkBitmap, PeerId, SwarmChunkAvailability};
use crate::transport::Transport;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

pub struct SwarmNode {
    local_id: PeerId,
    local_addr: SocketAddr,
    config: SwarmConfig,
    transport: Arc<dyn Transport>,
    items: DashMap<ItemChecksum, Arc<DistributedItem>>,
    replies: ReplyCorrelationCache,
    pending_descriptors: DashMap<ItemChecksum, Vec<oneshot::Sender<AssemblyDescriptor>>>,
    build_slots: Semaphore,
    upload_slots: Semaphore,
    next_sequence: AtomicU32,
    shutdown: AtomicBool,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl SwarmNode {
    pub fn new(transport: Arc<dyn Transport>, config: SwarmConfig) -> Arc<Self> {
        Self::with_peer_id(PeerId::generate(), transport, config)
    }

    pub fn with_peer_id(local_id: PeerId, transport: Arc<dyn Transport>, config: SwarmConfig) -> Arc<Self> {
        let local_addr = transport
            .local_addrs()
            .first()
            .copied()
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));

        Arc::new(Self {
            local_id,
            local_addr,
            replies: ReplyCorrelationCache::new(config.reply_ttl),
            build_slots: Semaphore::new(config.max_concurrent_builds),
            upload_slots: Semaphore::new(config.max_concurrent_uploads),
            config,
            transport,
            items: DashMap::new(),
            pending_descriptors: DashMap::new(),
            next_sequence: AtomicU32::new(0),
            shutdown: AtomicBool::new(false),
            maintenance: Mutex::new(None),
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.local_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn item(&self, checksum: &ItemChecksum) -> Option<Arc<DistributedItem>> {
        self.items.get(checksum).map(|entry| Arc::clone(entry.value()))
    }

    pub fn items(&self) -> Vec<ItemChecksum> {
        self.items.iter().map(|entry| *entry.key()).collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Registers locally held content as a new item, with this node as its
    /// super-peer seed.
    pub async fn introduce_item(&self, store: Arc<dyn ChunkStore>, chunk_size: u32) -> Result<ItemChecksum, NodeError> {
        if self.is_shutting_down() {
            return Err(NodeError::ShuttingDown);
        }
        let layout = ChunkLayout::new(store.len(), chunk_size)?;
        let checksum = store.content_hash().await?;

        let swarm = self.new_swarm(ChunkBitmap::full(layout.total_chunks()), true);
        let chunks = layout.total_chunks();
        self.register(DistributedItem::new(checksum, layout, store, swarm, BUILD_LOG_CAPACITY))?;

        info!("introduced item {} ({} chunks)", checksum, chunks);
        Ok(checksum)
    }

    /// [`introduce_item`](Self::introduce_item) with the configured default
    /// chunk size.
    pub async fn seed_item(&self, store: Arc<dyn ChunkStore>) -> Result<ItemChecksum, NodeError> {
        self.introduce_item(store, self.config.default_chunk_size).await
    }

    pub fn describe_item(&self, checksum: &ItemChecksum) -> Result<AssemblyDescriptor, NodeError> {
        self.item(checksum)
            .map(|item| item.describe())
            .ok_or(NodeError::UnknownItem(*checksum))
    }

    /// Asks the peer at `addr` to describe an item.
    pub async fn request_descriptor(
        &self,
        addr: SocketAddr,
        checksum: ItemChecksum,
        timeout: Duration,
    ) -> Result<AssemblyDescriptor, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.pending_descriptors.entry(checksum).or_default().push(tx);

        let request = SwarmMessage::DescriptorRequest {
            checksum,
            source: self.local_id,
        };
        if let Err(e) = self.transport.send(addr, &request) {
            drop(rx);
            self.forget_closed_waiters(&checksum);
            return Err(e.into());
        }

        let result = tokio::time::timeout(timeout, rx).await;
        match result {
            Ok(Ok(descriptor)) => Ok(descriptor),
            _ => {
                self.forget_closed_waiters(&checksum);
                Err(NodeError::DescriptorTimeout(checksum))
            }
        }
    }

    /// Drops descriptor waiters whose caller gave up.
    fn forget_closed_waiters(&self, checksum: &ItemChecksum) {
        use dashmap::mapref::entry::Entry;

        if let Entry::Occupied(mut waiters) = self.pending_descriptors.entry(*checksum) {
            waiters.get_mut().retain(|tx| !tx.is_closed());
            if waiters.get().is_empty() {
                waiters.remove();
            }
        }
    }

    /// Registers an item to be assembled into `store` from the peers named
    /// in `descriptor`.
    pub fn accept_descriptor(
        &self,
        descriptor: &AssemblyDescriptor,
        store: Arc<dyn ChunkStore>,
    ) -> Result<Arc<DistributedItem>, NodeError> {
        if self.is_shutting_down() {
            return Err(NodeError::ShuttingDown);
        }
        if store.len() != descriptor.total_bytes {
            return Err(NodeError::StoreSizeMismatch {
                expected: descriptor.total_bytes,
                actual: store.len(),
            });
        }
        let layout = ChunkLayout::new(descriptor.total_bytes, descriptor.chunk_size)?;

        let mut swarm = self.new_swarm(ChunkBitmap::new(), false);
        for peer in &descriptor.peers {
            swarm.add_or_update_peer(peer.peer_id, peer.addr, peer.bitmap, peer.is_super_peer);
        }
        debug!(
            "accepted descriptor for {} with {} peers",
            descriptor.checksum,
            swarm.peer_count() - 1
        );

        self.register(DistributedItem::new(
            descriptor.checksum,
            layout,
            store,
            swarm,
            BUILD_LOG_CAPACITY,
        ))
    }

    /// Assembles an item, waiting for a free build slot first.
    pub async fn assemble_item(&self, checksum: ItemChecksum, timeout: Duration) -> Result<AssemblyOutcome, NodeError> {
        if self.is_shutting_down() {
            return Err(NodeError::ShuttingDown);
        }
        let item = self.item(&checksum).ok_or(NodeError::UnknownItem(checksum))?;
        let _permit = self
            .build_slots
            .acquire()
            .await
            .map_err(|_| NodeError::ShuttingDown)?;

        let scheduler = AssemblyScheduler::new(&item, self.transport.as_ref(), &self.config, &self.shutdown);
        Ok(scheduler.run(timeout).await?)
    }

    pub fn spawn_assembly(
        self: &Arc<Self>,
        checksum: ItemChecksum,
        timeout: Duration,
    ) -> JoinHandle<Result<AssemblyOutcome, NodeError>> {
        let node = Arc::clone(self);
        tokio::spawn(async move { node.assemble_item(checksum, timeout).await })
    }

    /// Assembly budget scaled to the item's size.
    pub fn default_assembly_timeout(&self, checksum: &ItemChecksum) -> Result<Duration, NodeError> {
        let item = self.item(checksum).ok_or(NodeError::UnknownItem(*checksum))?;
        Ok(self.config.assembly_timeout_for(item.layout().total_bytes()))
    }

    pub fn abort_item(&self, checksum: &ItemChecksum) -> Result<(), NodeError> {
        let item = self.item(checksum).ok_or(NodeError::UnknownItem(*checksum))?;
        item.abort();
        Ok(())
    }

    /// Drops an item and releases its storage.
    ///
    /// With `broadcast`, the item's peers are told; with `swarm_wide` as
    /// well, they drop the item too instead of just forgetting this peer.
    pub async fn remove_item(&self, checksum: &ItemChecksum, broadcast: bool, swarm_wide: bool) -> Result<(), NodeError> {
        let (_, item) = self
            .items
            .remove(checksum)
            .ok_or(NodeError::UnknownItem(*checksum))?;
        item.abort();

        if broadcast {
            let targets = item.lock().swarm.contactable_peers();
            let message = SwarmMessage::ItemRemoval {
                checksum: *checksum,
                source: self.local_id,
                swarm_wide,
            };
            for (_, addr) in targets {
                if let Err(e) = self.transport.send(addr, &message) {
                    debug!("removal notice to {} failed: {}", addr, e);
                }
            }
        }

        item.store().release().await?;
        info!("removed item {} (swarm wide: {})", checksum, swarm_wide);
        Ok(())
    }

    /// Routes a lost connection into every item.
    pub fn on_connection_lost(&self, addr: SocketAddr) {
        let items: Vec<Arc<DistributedItem>> = self.items.iter().map(|e| Arc::clone(e.value())).collect();
        for item in items {
            if item.notify_connection_lost(addr) {
                continue;
            }
            let mut state = item.lock();
            if let Some(peer) = state.swarm.peer_at(addr) {
                state.swarm.set_peer_online(&peer, false);
            }
        }
    }

    /// Starts the periodic sweep of half-received replies.
    pub fn start_maintenance(self: &Arc<Self>) {
        let mut slot = self.maintenance.lock();
        if slot.is_some() {
            return;
        }

        let node: Weak<Self> = Arc::downgrade(self);
        let period = self.config.reply_sweep_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                let Some(node) = node.upgrade() else {
                    break;
                };
                if node.is_shutting_down() {
                    break;
                }
                node.replies.sweep(Instant::now());
            }
        }));
    }

    /// Stops the node: aborts running assemblies, tells peers this node is
    /// going offline, and empties the item registry. Stores are not released.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down swarm node {}", self.local_id);

        self.build_slots.close();
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }

        let items: Vec<Arc<DistributedItem>> = self.items.iter().map(|e| Arc::clone(e.value())).collect();
        for item in &items {
            item.abort();
            let targets = item.lock().swarm.contactable_peers();
            let message = SwarmMessage::PeerState {
                checksum: item.checksum(),
                source: self.local_id,
                busy: false,
                online: false,
            };
            for (_, addr) in targets {
                if let Err(e) = self.transport.send(addr, &message) {
                    debug!("offline notice to {} failed: {}", addr, e);
                }
            }
        }
        self.items.clear();
        self.pending_descriptors.clear();
    }

    fn new_swarm(&self, bitmap: ChunkBitmap, is_super_peer: bool) -> SwarmChunkAvailability {
        SwarmChunkAvailability::new(self.local_id, self.local_addr, bitmap, is_super_peer, &self.config)
            .with_local_addrs(self.transport.local_addrs())
    }

    fn register(&self, item: DistributedItem) -> Result<Arc<DistributedItem>, NodeError> {
        use dashmap::mapref::entry::Entry;

        let checksum = item.checksum();
        match self.items.entry(checksum) {
            Entry::Occupied(_) => {
                warn!("item {} is already registered", checksum);
                Err(NodeError::DuplicateItem(checksum))
            }
            Entry::Vacant(slot) => Ok(Arc::clone(slot.insert(Arc::new(item)).value())),
        }
    }

    fn next_sequence(&self) -> u32 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests;
