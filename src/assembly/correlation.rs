use crate::protocol::{ChunkReply, ReplyState};
use crate::storage::ItemChecksum;
use crate::swarm::PeerId;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::trace;

/// A chunk reply with both halves present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedReply {
    pub checksum: ItemChecksum,
    pub chunk: u8,
    pub state: ReplyState,
    pub sequence: u32,
    pub source: PeerId,
    /// Address the metadata half came from.
    pub from: SocketAddr,
    pub data: Option<Bytes>,
}

impl CompletedReply {
    /// A reply that never has a data half (`NotAvailable`, `Busy`).
    pub fn without_data(reply: ChunkReply, from: SocketAddr) -> Self {
        Self::merge(reply, from, None)
    }

    fn merge(reply: ChunkReply, from: SocketAddr, data: Option<Bytes>) -> Self {
        Self {
            checksum: reply.checksum,
            chunk: reply.chunk,
            state: reply.state,
            sequence: reply.sequence,
            source: reply.source,
            from,
            data,
        }
    }
}

/// Where a `(peer, sequence)` pair stands after one half arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeState {
    WaitingForData,
    WaitingForMetadata,
    Merged(CompletedReply),
}

enum PendingHalf {
    Metadata { reply: ChunkReply, from: SocketAddr },
    Data(Bytes),
}

struct PendingEntry {
    half: PendingHalf,
    created_at: Instant,
}

/// Holds the first half of each split chunk reply until its partner lands.
///
/// Entries older than the TTL are treated as absent and dropped by
/// [`sweep`](Self::sweep).
pub struct ReplyCorrelationCache {
    entries: Mutex<HashMap<(PeerId, u32), PendingEntry>>,
    ttl: Duration,
}

impl ReplyCorrelationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn accept_metadata(&self, reply: ChunkReply, from: SocketAddr, now: Instant) -> MergeState {
        let key = (reply.source, reply.sequence);
        let mut entries = self.entries.lock();

        match entries.remove(&key) {
            Some(PendingEntry {
                half: PendingHalf::Data(data),
                created_at,
            }) if now.saturating_duration_since(created_at) < self.ttl => {
                MergeState::Merged(CompletedReply::merge(reply, from, Some(data)))
            }
            _ => {
                entries.insert(
                    key,
                    PendingEntry {
                        half: PendingHalf::Metadata { reply, from },
                        created_at: now,
                    },
                );
                MergeState::WaitingForData
            }
        }
    }

    pub fn accept_data(&self, source: PeerId, sequence: u32, data: Bytes, now: Instant) -> MergeState {
        let key = (source, sequence);
        let mut entries = self.entries.lock();

        match entries.remove(&key) {
            Some(PendingEntry {
                half: PendingHalf::Metadata { reply, from },
                created_at,
            }) if now.saturating_duration_since(created_at) < self.ttl => {
                MergeState::Merged(CompletedReply::merge(reply, from, Some(data)))
            }
            _ => {
                entries.insert(
                    key,
                    PendingEntry {
                        half: PendingHalf::Data(data),
                        created_at: now,
                    },
                );
                MergeState::WaitingForMetadata
            }
        }
    }

    /// Drops entries older than the TTL. Returns how many were dropped.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| now.saturating_duration_since(e.created_at) < self.ttl);
        let dropped = before - entries.len();
        if dropped > 0 {
            trace!("dropped {} expired partial replies", dropped);
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
