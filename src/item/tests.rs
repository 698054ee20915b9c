use super::*;
use crate::config::SwarmConfig;
use crate::protocol::SwarmMessage;
use crate::storage::MemoryStore;
use crate::swarm::{PeerSnapshot, SwarmError};
use crate::transport::MemoryNetwork;
use std::time::Duration;

fn peer_id(n: u8) -> PeerId {
    PeerId::from_bytes(&[n; 20]).unwrap()
}

fn addr(n: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 1, n], 7000))
}

fn item_with_peers(config: &SwarmConfig, remotes: &[(u8, bool)]) -> DistributedItem {
    let mut swarm = SwarmChunkAvailability::new(peer_id(1), addr(1), ChunkBitmap::new(), false, config);
    for (n, is_super) in remotes {
        swarm.add_or_update_peer(peer_id(*n), addr(*n), ChunkBitmap::full(4), *is_super);
    }
    let layout = ChunkLayout::new(64, 16).unwrap();
    DistributedItem::new(
        ItemChecksum::of(b"item"),
        layout,
        Arc::new(MemoryStore::with_len(64)),
        swarm,
        8,
    )
}

#[test]
fn test_layout_spans() {
    let layout = ChunkLayout::new(100, 30).unwrap();
    assert_eq!(layout.total_chunks(), 4);
    assert_eq!(
        layout.span(3),
        Some(ChunkSpan {
            index: 3,
            offset: 90,
            length: 10
        })
    );
    assert_eq!(layout.span(4), None);
    assert_eq!(layout.spans().iter().map(|s| s.length).sum::<u64>(), 100);

    let exact = ChunkLayout::new(64, 16).unwrap();
    assert_eq!(exact.total_chunks(), 4);
    assert_eq!(exact.span(3).unwrap().length, 16);
}

#[test]
fn test_layout_limits() {
    assert!(matches!(ChunkLayout::new(0, 16), Err(SwarmError::EmptyItem)));
    assert!(matches!(ChunkLayout::new(16, 0), Err(SwarmError::ZeroChunkSize)));
    assert_eq!(ChunkLayout::new(255, 1).unwrap().total_chunks(), 255);
    assert!(matches!(
        ChunkLayout::new(256, 1),
        Err(SwarmError::TooManyChunks(256))
    ));
}

#[test]
fn test_build_log_bounded() {
    let mut log = BuildLog::new(3);
    for missing in 0..5 {
        log.push(BuildEvent::Started { missing });
    }
    assert_eq!(log.len(), 3);
    let kept: Vec<_> = log.entries().map(|e| e.event.clone()).collect();
    assert_eq!(kept[0], BuildEvent::Started { missing: 2 });
    assert_eq!(log.last(), Some(&BuildEvent::Started { missing: 4 }));
}

#[test]
fn test_evict_peer_respects_registry() {
    let config = SwarmConfig::default();
    let item = item_with_peers(&config, &[(2, true), (3, false)]);
    {
        let mut state = item.lock();
        let now = std::time::Instant::now();
        state
            .requests
            .insert(crate::assembly::ChunkRequest::new(0, peer_id(3), addr(3), now));
        state
            .requests
            .insert(crate::assembly::ChunkRequest::new(1, peer_id(2), addr(2), now));
    }

    assert!(item.evict_peer(&peer_id(3), EvictionReason::SendFailed));
    assert!(!item.lock().requests.contains(0));
    assert!(item.lock().requests.contains(1));

    // Last super-peer stays.
    assert!(!item.evict_peer(&peer_id(2), EvictionReason::SendFailed));
    assert_eq!(item.build_log().len(), 1);
}

#[test]
fn test_connection_loss_needs_listener() {
    let config = SwarmConfig::default();
    let item = item_with_peers(&config, &[(2, true)]);
    assert!(!item.notify_connection_lost(addr(2)));

    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(item.register_listener(tx));
    assert!(item.is_assembling());
    assert!(item.notify_connection_lost(addr(2)));
    assert_eq!(rx.try_recv().ok(), Some(ItemEvent::ConnectionLost(addr(2))));

    item.deregister_listener();
    assert!(!item.is_assembling());
}

#[test]
fn test_failure_is_taken_once() {
    let config = SwarmConfig::default();
    let item = item_with_peers(&config, &[]);
    item.fail("bad chunk".to_string());
    assert_eq!(item.take_failure().as_deref(), Some("bad chunk"));
    assert_eq!(item.take_failure(), None);
}

#[test]
fn test_describe() {
    let config = SwarmConfig::default();
    let item = item_with_peers(&config, &[(2, true)]);
    let descriptor = item.describe();
    assert_eq!(descriptor.total_bytes, 64);
    assert_eq!(descriptor.chunk_size, 16);
    assert_eq!(descriptor.peers.len(), 2);
}

#[tokio::test]
async fn test_broadcast_evicts_unreachable_peer() {
    let config = SwarmConfig::default();
    let network = MemoryNetwork::new();
    let (transport, _inbox) = network.endpoint(addr(1));
    let (_, mut reachable) = network.endpoint(addr(2));

    // Peer 3 has no endpoint on the network.
    let item = item_with_peers(&config, &[(2, true), (3, false)]);
    assert_eq!(item.broadcast_local_availability(transport.as_ref()), 1);
    assert!(!item.lock().swarm.contains(&peer_id(3)));

    let (from, message) = reachable.recv().await.unwrap();
    assert_eq!(from, addr(1));
    assert!(matches!(
        message,
        SwarmMessage::AvailabilityUpdate { source, .. } if source == peer_id(1)
    ));
}

#[tokio::test]
async fn test_availability_update_waits_for_quorum() {
    let mut config = SwarmConfig::default().with_availability_update(1, Duration::from_secs(5));
    config.availability_settle_delay = Duration::ZERO;
    let network = MemoryNetwork::new();
    let (transport, _inbox) = network.endpoint(addr(1));
    let (_, mut remote) = network.endpoint(addr(2));
    let item = Arc::new(item_with_peers(&config, &[(2, true)]));

    let responder = {
        let item = Arc::clone(&item);
        tokio::spawn(async move {
            let (_, message) = remote.recv().await.unwrap();
            let SwarmMessage::AvailabilityRequest { want_peers, .. } = message else {
                panic!("expected availability request");
            };
            assert!(want_peers);

            let mut bitmap = ChunkBitmap::new();
            bitmap.set(1, true);
            let listed = PeerSnapshot {
                peer_id: peer_id(9),
                addr: addr(9),
                bitmap: ChunkBitmap::full(4),
                is_super_peer: false,
            };
            item.apply_availability_reply(addr(2), peer_id(2), bitmap, true, &[listed]);
        })
    };

    let replies = item
        .update_peer_availability(transport.as_ref(), 1, Duration::from_secs(5), &config)
        .await;
    responder.await.unwrap();

    assert_eq!(replies, 1);
    let state = item.lock();
    assert_eq!(state.swarm.peer(&peer_id(2)).unwrap().bitmap.count(), 1);
    assert!(state.swarm.contains(&peer_id(9)));
    assert_eq!(state.swarm.address_of(&peer_id(9)), Some(addr(9)));
}

#[tokio::test]
async fn test_availability_update_bounded_by_timeout() {
    let mut config = SwarmConfig::default();
    config.availability_settle_delay = Duration::ZERO;
    let network = MemoryNetwork::new();
    let (transport, _inbox) = network.endpoint(addr(1));
    let (_, _silent) = network.endpoint(addr(2));
    let item = item_with_peers(&config, &[(2, true)]);

    let started = std::time::Instant::now();
    let replies = item
        .update_peer_availability(transport.as_ref(), 0, Duration::from_millis(50), &config)
        .await;
    assert_eq!(replies, 0);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_listed_peers_do_not_override_direct_reports() {
    let config = SwarmConfig::default();
    let item = item_with_peers(&config, &[(2, true), (3, false)]);

    let stale = PeerSnapshot {
        peer_id: peer_id(3),
        addr: addr(3),
        bitmap: ChunkBitmap::new(),
        is_super_peer: false,
    };
    let me = PeerSnapshot {
        peer_id: peer_id(1),
        addr: addr(1),
        bitmap: ChunkBitmap::full(4),
        is_super_peer: false,
    };
    item.apply_availability_reply(addr(2), peer_id(2), ChunkBitmap::full(4), true, &[stale, me]);

    let state = item.lock();
    assert_eq!(state.swarm.peer(&peer_id(3)).unwrap().bitmap.count(), 4);
    assert!(state.swarm.local_bitmap().is_empty());
}

#[tokio::test]
async fn test_availability_update_ends_once_enough_peers_are_online() {
    let mut config = SwarmConfig::default().with_availability_update(3, Duration::from_secs(5));
    config.availability_settle_delay = Duration::ZERO;
    config.enough_peers_threshold = 2;
    let network = MemoryNetwork::new();
    let (transport, _inbox) = network.endpoint(addr(1));

    let remotes: Vec<(u8, bool)> = (2..=10).map(|n| (n, n == 2)).collect();
    let mut inboxes: Vec<_> = remotes.iter().map(|(n, _)| network.endpoint(addr(*n)).1).collect();
    let mut responder_inbox = inboxes.remove(0);
    let item = Arc::new(item_with_peers(&config, &remotes));

    let responder = {
        let item = Arc::clone(&item);
        tokio::spawn(async move {
            responder_inbox.recv().await.unwrap();
            let listed: Vec<PeerSnapshot> = (11..=13)
                .map(|n| PeerSnapshot {
                    peer_id: peer_id(n),
                    addr: addr(n),
                    bitmap: ChunkBitmap::full(4),
                    is_super_peer: false,
                })
                .collect();
            item.apply_availability_reply(addr(2), peer_id(2), ChunkBitmap::full(4), true, &listed);
        })
    };

    let started = std::time::Instant::now();
    let replies = item
        .update_peer_availability(transport.as_ref(), 1, Duration::from_secs(5), &config)
        .await;
    responder.await.unwrap();

    // One reply is short of the quorum of three, but the swarm is big enough.
    assert_eq!(replies, 1);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(item.lock().swarm.online_peer_count(), 12);
    drop(inboxes);
}

#[tokio::test]
async fn test_availability_update_tolerates_unbounded_timeout() {
    let mut config = SwarmConfig::default();
    config.availability_settle_delay = Duration::ZERO;
    let network = MemoryNetwork::new();
    let (transport, _inbox) = network.endpoint(addr(1));
    let (_, mut remote) = network.endpoint(addr(2));
    let item = Arc::new(item_with_peers(&config, &[(2, true)]));

    let responder = {
        let item = Arc::clone(&item);
        tokio::spawn(async move {
            remote.recv().await.unwrap();
            item.apply_availability_reply(addr(2), peer_id(2), ChunkBitmap::full(4), true, &[]);
        })
    };

    let replies = item
        .update_peer_availability(transport.as_ref(), 0, Duration::MAX, &config)
        .await;
    responder.await.unwrap();
    assert_eq!(replies, 1);
}
