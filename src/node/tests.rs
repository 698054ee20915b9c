use super::*;
use crate::assembly::AssemblyError;
use crate::item::BuildEvent;
use crate::protocol::{ChunkReply, ReplyState};
use crate::storage::{MemoryStore, StorageError};
use crate::swarm::{PeerSnapshot, SwarmError};
use crate::transport::{MemoryInbox, MemoryNetwork, MemoryTransport, TransportError};
use bytes::Bytes;

const MIB: usize = 1024 * 1024;
const KIB: usize = 1024;

fn peer_id(n: u8) -> PeerId {
    PeerId::from_bytes(&[n; 20]).unwrap()
}

fn addr(n: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 2, n], 7000))
}

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i / 3 % 251) as u8).collect()
}

fn fast_config() -> SwarmConfig {
    let mut config = SwarmConfig::default()
        .with_availability_update(1, Duration::from_millis(200))
        .with_waits(Duration::from_millis(50), Duration::from_millis(10));
    config.availability_settle_delay = Duration::ZERO;
    config
}

fn spawn_node(network: &Arc<MemoryNetwork>, n: u8, config: SwarmConfig) -> Arc<SwarmNode> {
    let (transport, inbox) = network.endpoint(addr(n));
    let node = SwarmNode::with_peer_id(peer_id(n), transport, config);
    network.attach(&node, inbox);
    node
}

/// A raw endpoint for driving a node by hand.
fn probe(network: &Arc<MemoryNetwork>, n: u8) -> (Arc<MemoryTransport>, MemoryInbox) {
    network.endpoint(addr(n))
}

async fn recv(inbox: &mut MemoryInbox) -> SwarmMessage {
    tokio::time::timeout(Duration::from_secs(5), inbox.recv())
        .await
        .expect("no message before the deadline")
        .expect("inbox closed")
        .1
}

async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

async fn join_item(
    joiner: &SwarmNode,
    seed_addr: SocketAddr,
    checksum: ItemChecksum,
    len: usize,
) -> Arc<MemoryStore> {
    let descriptor = joiner
        .request_descriptor(seed_addr, checksum, Duration::from_secs(5))
        .await
        .unwrap();
    let store = Arc::new(MemoryStore::with_len(len as u64));
    joiner.accept_descriptor(&descriptor, store.clone()).unwrap();
    store
}

struct Pair {
    network: Arc<MemoryNetwork>,
    seed: Arc<SwarmNode>,
    joiner: Arc<SwarmNode>,
    checksum: ItemChecksum,
    joiner_store: Arc<MemoryStore>,
}

async fn assembled_pair(len: usize, chunk_size: u32) -> Pair {
    let network = MemoryNetwork::new();
    let seed = spawn_node(&network, 1, fast_config());
    let joiner = spawn_node(&network, 2, fast_config());

    let checksum = seed
        .introduce_item(Arc::new(MemoryStore::from_bytes(content(len))), chunk_size)
        .await
        .unwrap();
    let joiner_store = join_item(&joiner, addr(1), checksum, len).await;
    let outcome = joiner
        .assemble_item(checksum, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(outcome, AssemblyOutcome::Completed);

    Pair {
        network,
        seed,
        joiner,
        checksum,
        joiner_store,
    }
}

#[tokio::test]
async fn test_two_node_assembly() {
    let network = MemoryNetwork::new();
    let seed = spawn_node(&network, 1, fast_config());
    let joiner = spawn_node(&network, 2, fast_config());

    let data = content(4 * MIB);
    let checksum = seed
        .introduce_item(Arc::new(MemoryStore::from_bytes(data.clone())), MIB as u32)
        .await
        .unwrap();
    assert_eq!(checksum, ItemChecksum::of(&data));

    let descriptor = joiner
        .request_descriptor(addr(1), checksum, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(descriptor.total_bytes, data.len() as u64);
    assert_eq!(descriptor.peers.len(), 1);
    assert!(descriptor.peers[0].is_super_peer);
    assert_eq!(descriptor.peers[0].bitmap.count(), 4);

    let store = Arc::new(MemoryStore::with_len(data.len() as u64));
    joiner.accept_descriptor(&descriptor, store.clone()).unwrap();

    let outcome = joiner
        .assemble_item(checksum, Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(outcome, AssemblyOutcome::Completed);

    let item = joiner.item(&checksum).unwrap();
    assert!(item.is_complete());
    assert_eq!(item.local_bitmap().count(), 4);
    assert_eq!(store.content_hash().await.unwrap(), checksum);
    assert!(matches!(
        item.build_log().last().map(|e| &e.event),
        Some(BuildEvent::Completed { .. })
    ));

    // The final broadcast tells the seed the joiner is complete.
    let seed_item = seed.item(&checksum).unwrap();
    assert!(
        eventually(|| {
            seed_item
                .lock()
                .swarm
                .peer(&peer_id(2))
                .is_some_and(|p| p.bitmap.count() == 4)
        })
        .await
    );
}

#[tokio::test]
async fn test_three_node_concurrent_assembly() {
    let network = MemoryNetwork::new();
    let seed = spawn_node(&network, 1, fast_config());
    let first = spawn_node(&network, 2, fast_config());
    let second = spawn_node(&network, 3, fast_config());

    let len = 12 * KIB + 100;
    let checksum = seed
        .introduce_item(Arc::new(MemoryStore::from_bytes(content(len))), KIB as u32)
        .await
        .unwrap();

    let first_store = join_item(&first, addr(1), checksum, len).await;
    let second_store = join_item(&second, addr(1), checksum, len).await;

    let a = first.spawn_assembly(checksum, Duration::from_secs(20));
    let b = second.spawn_assembly(checksum, Duration::from_secs(20));
    assert_eq!(a.await.unwrap().unwrap(), AssemblyOutcome::Completed);
    assert_eq!(b.await.unwrap().unwrap(), AssemblyOutcome::Completed);

    assert_eq!(first_store.content_hash().await.unwrap(), checksum);
    assert_eq!(second_store.content_hash().await.unwrap(), checksum);
}

#[tokio::test]
async fn test_descriptor_for_unknown_item_times_out() {
    let network = MemoryNetwork::new();
    let _seed = spawn_node(&network, 1, fast_config());
    let joiner = spawn_node(&network, 2, fast_config());

    let missing = ItemChecksum::of(b"nobody has this");
    let err = joiner
        .request_descriptor(addr(1), missing, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::DescriptorTimeout(c) if c == missing));
    assert!(joiner.pending_descriptors.is_empty());
}

#[tokio::test]
async fn test_concurrent_descriptor_requests_share_the_answer() {
    let network = MemoryNetwork::new();
    let seed = spawn_node(&network, 1, fast_config());
    let joiner = spawn_node(&network, 2, fast_config());
    let checksum = seed
        .introduce_item(Arc::new(MemoryStore::from_bytes(content(4 * KIB))), KIB as u32)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        joiner.request_descriptor(addr(1), checksum, Duration::from_secs(5)),
        joiner.request_descriptor(addr(1), checksum, Duration::from_secs(5))
    );
    assert_eq!(a.unwrap().checksum, checksum);
    assert_eq!(b.unwrap().checksum, checksum);
    assert!(joiner.pending_descriptors.is_empty());
}

#[tokio::test]
async fn test_descriptor_timeout_keeps_other_waiters() {
    let network = MemoryNetwork::new();
    let seed = spawn_node(&network, 1, fast_config());
    let joiner = spawn_node(&network, 2, fast_config());
    let (relay, _relay_inbox) = probe(&network, 3);
    let checksum = seed
        .introduce_item(Arc::new(MemoryStore::from_bytes(content(4 * KIB))), KIB as u32)
        .await
        .unwrap();
    let descriptor = seed.describe_item(&checksum).unwrap();

    // The relay stays silent until the impatient request has given up.
    let (impatient, patient, ()) = tokio::join!(
        joiner.request_descriptor(addr(3), checksum, Duration::from_millis(50)),
        joiner.request_descriptor(addr(3), checksum, Duration::from_secs(5)),
        async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            relay
                .send(addr(2), &SwarmMessage::Descriptor(descriptor.clone()))
                .unwrap();
        }
    );
    assert!(matches!(impatient, Err(NodeError::DescriptorTimeout(c)) if c == checksum));
    assert_eq!(patient.unwrap(), descriptor);
    assert!(joiner.pending_descriptors.is_empty());
}

#[tokio::test]
async fn test_descriptor_request_to_unreachable_peer() {
    let network = MemoryNetwork::new();
    let joiner = spawn_node(&network, 2, fast_config());

    let err = joiner
        .request_descriptor(addr(9), ItemChecksum::of(b"x"), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NodeError::Transport(TransportError::Unreachable(a)) if a == addr(9)
    ));
}

#[tokio::test]
async fn test_introduce_rejects_duplicates_and_empty_items() {
    let network = MemoryNetwork::new();
    let node = spawn_node(&network, 1, fast_config());

    let data = content(3000);
    node.introduce_item(Arc::new(MemoryStore::from_bytes(data.clone())), 1024)
        .await
        .unwrap();
    assert!(matches!(
        node.introduce_item(Arc::new(MemoryStore::from_bytes(data)), 1024)
            .await,
        Err(NodeError::DuplicateItem(_))
    ));
    assert!(matches!(
        node.introduce_item(Arc::new(MemoryStore::with_len(0)), 1024)
            .await,
        Err(NodeError::Swarm(SwarmError::EmptyItem))
    ));
    assert!(matches!(
        node.introduce_item(Arc::new(MemoryStore::with_len(300)), 1)
            .await,
        Err(NodeError::Swarm(SwarmError::TooManyChunks(300)))
    ));
    assert_eq!(node.items().len(), 1);
}

#[tokio::test]
async fn test_seed_item_uses_configured_defaults() {
    let network = MemoryNetwork::new();
    let node = spawn_node(&network, 1, fast_config());

    let checksum = node
        .seed_item(Arc::new(MemoryStore::from_bytes(content(3 * MIB))))
        .await
        .unwrap();
    let item = node.item(&checksum).unwrap();
    assert_eq!(item.total_chunks(), 3);
    assert!(item.is_complete());

    let config = node.config();
    assert_eq!(
        node.default_assembly_timeout(&checksum).unwrap(),
        config.assembly_timeout_base + config.assembly_timeout_per_mib * 3
    );
    assert!(matches!(
        node.default_assembly_timeout(&ItemChecksum::of(b"unknown")),
        Err(NodeError::UnknownItem(_))
    ));
}

#[tokio::test]
async fn test_accept_descriptor_checks_store_size() {
    let network = MemoryNetwork::new();
    let seed = spawn_node(&network, 1, fast_config());
    let joiner = spawn_node(&network, 2, fast_config());
    let checksum = seed
        .introduce_item(Arc::new(MemoryStore::from_bytes(content(2048))), 1024)
        .await
        .unwrap();

    let descriptor = seed.describe_item(&checksum).unwrap();
    assert!(matches!(
        joiner.accept_descriptor(&descriptor, Arc::new(MemoryStore::with_len(100))),
        Err(NodeError::StoreSizeMismatch {
            expected: 2048,
            actual: 100
        })
    ));
    assert!(matches!(
        seed.describe_item(&ItemChecksum::of(b"other")),
        Err(NodeError::UnknownItem(_))
    ));
}

#[tokio::test]
async fn test_serves_data_then_metadata() {
    let network = MemoryNetwork::new();
    let seed = spawn_node(&network, 1, fast_config());
    let (transport, mut inbox) = probe(&network, 5);

    let data = content(3 * KIB);
    let checksum = seed
        .introduce_item(Arc::new(MemoryStore::from_bytes(data.clone())), KIB as u32)
        .await
        .unwrap();

    transport
        .send(
            addr(1),
            &SwarmMessage::ChunkRequest {
                checksum,
                chunk: 1,
                source: peer_id(5),
            },
        )
        .unwrap();

    let SwarmMessage::ChunkData {
        source,
        sequence,
        data: bytes,
    } = recv(&mut inbox).await
    else {
        panic!("expected chunk data first");
    };
    assert_eq!(source, peer_id(1));
    assert_eq!(bytes.as_ref(), &data[KIB..2 * KIB]);

    let SwarmMessage::ChunkReply(reply) = recv(&mut inbox).await else {
        panic!("expected chunk reply");
    };
    assert_eq!(reply.state, ReplyState::DataIncluded);
    assert_eq!(reply.sequence, sequence);
    assert_eq!(reply.chunk, 1);
    assert_eq!(reply.checksum, checksum);
}

#[tokio::test]
async fn test_serves_not_available() {
    let network = MemoryNetwork::new();
    let seed = spawn_node(&network, 1, fast_config());
    let (transport, mut inbox) = probe(&network, 5);
    let checksum = seed
        .introduce_item(Arc::new(MemoryStore::from_bytes(content(2 * KIB))), KIB as u32)
        .await
        .unwrap();

    for (checksum, chunk) in [(checksum, 7u8), (ItemChecksum::of(b"unknown"), 0)] {
        transport
            .send(
                addr(1),
                &SwarmMessage::ChunkRequest {
                    checksum,
                    chunk,
                    source: peer_id(5),
                },
            )
            .unwrap();
        let SwarmMessage::ChunkReply(reply) = recv(&mut inbox).await else {
            panic!("expected chunk reply");
        };
        assert_eq!(reply.state, ReplyState::NotAvailable);
        assert_eq!(reply.chunk, chunk);
    }
}

#[tokio::test]
async fn test_serves_busy_without_upload_slots() {
    let network = MemoryNetwork::new();
    let seed = spawn_node(&network, 1, fast_config().with_max_concurrent_uploads(0));
    let (transport, mut inbox) = probe(&network, 5);
    let checksum = seed
        .introduce_item(Arc::new(MemoryStore::from_bytes(content(2 * KIB))), KIB as u32)
        .await
        .unwrap();

    transport
        .send(
            addr(1),
            &SwarmMessage::ChunkRequest {
                checksum,
                chunk: 0,
                source: peer_id(5),
            },
        )
        .unwrap();
    let SwarmMessage::ChunkReply(reply) = recv(&mut inbox).await else {
        panic!("expected chunk reply");
    };
    assert_eq!(reply.state, ReplyState::Busy);
}

#[tokio::test]
async fn test_availability_request_gets_reply_with_peers() {
    let network = MemoryNetwork::new();
    let seed = spawn_node(&network, 1, fast_config());
    let (transport, mut inbox) = probe(&network, 5);
    let checksum = seed
        .introduce_item(Arc::new(MemoryStore::from_bytes(content(4 * KIB))), KIB as u32)
        .await
        .unwrap();

    let mut bitmap = ChunkBitmap::new();
    bitmap.set(2, true);
    transport
        .send(
            addr(1),
            &SwarmMessage::AvailabilityRequest {
                checksum,
                source: peer_id(5),
                bitmap,
                is_super_peer: false,
                want_peers: true,
            },
        )
        .unwrap();

    let SwarmMessage::AvailabilityReply {
        source,
        bitmap: seed_bitmap,
        is_super_peer,
        peers,
        ..
    } = recv(&mut inbox).await
    else {
        panic!("expected availability reply");
    };
    assert_eq!(source, peer_id(1));
    assert!(is_super_peer);
    assert_eq!(seed_bitmap.count(), 4);
    assert!(peers.iter().any(|p| p.peer_id == peer_id(5) && p.bitmap.test(2)));

    let item = seed.item(&checksum).unwrap();
    assert_eq!(item.lock().swarm.address_of(&peer_id(5)), Some(addr(5)));
}

#[tokio::test]
async fn test_peer_state_and_removal_messages() {
    let network = MemoryNetwork::new();
    let node = spawn_node(&network, 1, fast_config());
    let checksum = node
        .introduce_item(Arc::new(MemoryStore::from_bytes(content(2 * KIB))), KIB as u32)
        .await
        .unwrap();

    for n in [5u8, 6] {
        node.handle_message(
            addr(n),
            SwarmMessage::AvailabilityUpdate {
                checksum,
                source: peer_id(n),
                bitmap: ChunkBitmap::new(),
                is_super_peer: false,
            },
        )
        .await
        .unwrap();
    }
    let item = node.item(&checksum).unwrap();
    assert_eq!(item.lock().swarm.peer_count(), 3);

    node.handle_message(
        addr(5),
        SwarmMessage::PeerState {
            checksum,
            source: peer_id(5),
            busy: true,
            online: false,
        },
    )
    .await
    .unwrap();
    {
        let state = item.lock();
        let info = state.swarm.peer(&peer_id(5)).unwrap();
        assert!(info.is_busy());
        assert!(!info.is_online());
    }

    node.handle_message(
        addr(5),
        SwarmMessage::PeerRemoval {
            checksum,
            peer: peer_id(6),
        },
    )
    .await
    .unwrap();
    assert!(!item.lock().swarm.contains(&peer_id(6)));

    // Messages about unknown items are dropped quietly.
    node.handle_message(
        addr(5),
        SwarmMessage::PeerRemoval {
            checksum: ItemChecksum::of(b"unknown"),
            peer: peer_id(5),
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_bad_chunk_reply_surfaces_as_error() {
    let network = MemoryNetwork::new();
    let node = spawn_node(&network, 2, fast_config());
    let descriptor = AssemblyDescriptor {
        checksum: ItemChecksum::of(b"item"),
        total_bytes: 2048,
        chunk_size: 1024,
        peers: vec![PeerSnapshot {
            peer_id: peer_id(1),
            addr: addr(1),
            bitmap: ChunkBitmap::full(2),
            is_super_peer: true,
        }],
    };
    node.accept_descriptor(&descriptor, Arc::new(MemoryStore::with_len(2048)))
        .unwrap();

    let metadata = SwarmMessage::ChunkReply(ChunkReply {
        checksum: descriptor.checksum,
        chunk: 0,
        state: ReplyState::DataIncluded,
        sequence: 3,
        source: peer_id(1),
    });
    let data = SwarmMessage::ChunkData {
        source: peer_id(1),
        sequence: 3,
        data: Bytes::from_static(b"too short"),
    };

    node.handle_message(addr(1), metadata).await.unwrap();
    let err = node.handle_message(addr(1), data).await.unwrap_err();
    assert!(matches!(
        err,
        NodeError::Assembly(AssemblyError::ChunkLengthMismatch { chunk: 0, .. })
    ));
    assert!(node.replies.is_empty());
}

#[tokio::test]
async fn test_swarm_wide_removal() {
    let pair = assembled_pair(4 * KIB, KIB as u32).await;

    pair.seed.remove_item(&pair.checksum, true, true).await.unwrap();
    assert!(pair.seed.item(&pair.checksum).is_none());

    let joiner = Arc::clone(&pair.joiner);
    let checksum = pair.checksum;
    assert!(eventually(|| joiner.item(&checksum).is_none()).await);
    assert!(matches!(
        pair.joiner_store.read_chunk(0, 1).await,
        Err(StorageError::Released)
    ));
    assert!(matches!(
        pair.seed.remove_item(&pair.checksum, false, false).await,
        Err(NodeError::UnknownItem(_))
    ));
}

#[tokio::test]
async fn test_leaving_peer_is_forgotten() {
    let pair = assembled_pair(4 * KIB, KIB as u32).await;

    pair.seed.remove_item(&pair.checksum, true, false).await.unwrap();

    let item = pair.joiner.item(&pair.checksum).unwrap();
    assert!(eventually(|| !item.lock().swarm.contains(&peer_id(1))).await);
    assert!(item.is_complete());
}

#[tokio::test]
async fn test_connection_loss_marks_peer_offline() {
    let pair = assembled_pair(4 * KIB, KIB as u32).await;
    let item = pair.seed.item(&pair.checksum).unwrap();
    assert!(eventually(|| item.lock().swarm.contains(&peer_id(2))).await);

    pair.network.disconnect(addr(2));

    let state = item.lock();
    assert!(!state.swarm.peer(&peer_id(2)).unwrap().is_online());
    assert_eq!(state.swarm.online_peer_count(), 0);
}

#[tokio::test]
async fn test_abort_running_assembly() {
    let network = MemoryNetwork::new();
    let node = spawn_node(&network, 2, fast_config());
    // The only listed source never answers.
    let (_silent_transport, _silent_inbox) = probe(&network, 1);

    let descriptor = AssemblyDescriptor {
        checksum: ItemChecksum::of(b"item"),
        total_bytes: 4096,
        chunk_size: 1024,
        peers: vec![PeerSnapshot {
            peer_id: peer_id(1),
            addr: addr(1),
            bitmap: ChunkBitmap::full(4),
            is_super_peer: true,
        }],
    };
    node.accept_descriptor(&descriptor, Arc::new(MemoryStore::with_len(4096)))
        .unwrap();

    let handle = node.spawn_assembly(descriptor.checksum, Duration::from_secs(30));
    let item = node.item(&descriptor.checksum).unwrap();
    assert!(eventually(|| item.is_assembling()).await);

    node.abort_item(&descriptor.checksum).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, AssemblyOutcome::Aborted);
}

#[tokio::test]
async fn test_shutdown_drains_registry() {
    let network = MemoryNetwork::new();
    let node = spawn_node(&network, 1, fast_config());
    let (_probe_transport, mut inbox) = probe(&network, 5);
    let checksum = node
        .introduce_item(Arc::new(MemoryStore::from_bytes(content(2 * KIB))), KIB as u32)
        .await
        .unwrap();
    node.handle_message(
        addr(5),
        SwarmMessage::AvailabilityUpdate {
            checksum,
            source: peer_id(5),
            bitmap: ChunkBitmap::new(),
            is_super_peer: false,
        },
    )
    .await
    .unwrap();
    node.start_maintenance();

    node.shutdown();
    assert!(node.is_shutting_down());
    assert!(node.items().is_empty());
    assert!(matches!(
        node.assemble_item(checksum, Duration::from_secs(1)).await,
        Err(NodeError::ShuttingDown)
    ));

    let SwarmMessage::PeerState { online, source, .. } = recv(&mut inbox).await else {
        panic!("expected offline notice");
    };
    assert!(!online);
    assert_eq!(source, peer_id(1));
}

#[tokio::test]
async fn test_maintenance_sweeps_partial_replies() {
    let mut config = fast_config().with_reply_ttl(Duration::from_millis(20));
    config.reply_sweep_interval = Duration::from_millis(10);
    let network = MemoryNetwork::new();
    let node = spawn_node(&network, 1, config);
    node.start_maintenance();

    node.handle_message(
        addr(5),
        SwarmMessage::ChunkData {
            source: peer_id(5),
            sequence: 1,
            data: Bytes::from_static(b"orphan"),
        },
    )
    .await
    .unwrap();
    assert_eq!(node.replies.len(), 1);

    let node_ref = Arc::clone(&node);
    assert!(eventually(|| node_ref.replies.is_empty()).await);
    node.shutdown();
}
