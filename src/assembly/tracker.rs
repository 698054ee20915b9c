use crate::swarm::PeerId;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// One chunk request, from planning until its reply is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub chunk: u8,
    pub peer: PeerId,
    pub addr: SocketAddr,
    pub created_at: Instant,
    /// Reply bytes are being written.
    pub incoming: bool,
    pub complete: bool,
}

impl ChunkRequest {
    pub fn new(chunk: u8, peer: PeerId, addr: SocketAddr, now: Instant) -> Self {
        Self {
            chunk,
            peer,
            addr,
            created_at: now,
            incoming: false,
            complete: false,
        }
    }

    /// Still waiting for a reply.
    pub fn is_pending(&self) -> bool {
        !self.complete
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// Requests of one item keyed by chunk index, at most one per chunk.
///
/// Completed requests are kept; failed ones are removed so the chunk can be
/// planned again.
#[derive(Debug, Default)]
pub struct ChunkRequestTracker {
    entries: BTreeMap<u8, ChunkRequest>,
}

impl ChunkRequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a request. Returns false if the chunk already has one.
    pub fn insert(&mut self, request: ChunkRequest) -> bool {
        if self.entries.contains_key(&request.chunk) {
            return false;
        }
        self.entries.insert(request.chunk, request);
        true
    }

    pub fn get(&self, chunk: u8) -> Option<&ChunkRequest> {
        self.entries.get(&chunk)
    }

    pub fn contains(&self, chunk: u8) -> bool {
        self.entries.contains_key(&chunk)
    }

    pub fn remove(&mut self, chunk: u8) -> Option<ChunkRequest> {
        self.entries.remove(&chunk)
    }

    /// Flags a request as being integrated.
    ///
    /// Returns false if there is no request or integration already started.
    pub fn begin_incoming(&mut self, chunk: u8) -> bool {
        match self.entries.get_mut(&chunk) {
            Some(entry) if !entry.incoming => {
                entry.incoming = true;
                true
            }
            _ => false,
        }
    }

    pub fn mark_complete(&mut self, chunk: u8) {
        if let Some(entry) = self.entries.get_mut(&chunk) {
            entry.incoming = true;
            entry.complete = true;
        }
    }

    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_pending()).count()
    }

    pub fn completed_count(&self) -> usize {
        self.entries.values().filter(|e| e.complete).count()
    }

    pub fn pending_for(&self, peer: &PeerId) -> usize {
        self.entries
            .values()
            .filter(|e| e.is_pending() && e.peer == *peer)
            .count()
    }

    pub fn pending_per_peer(&self) -> HashMap<PeerId, usize> {
        let mut load = HashMap::new();
        for entry in self.entries.values().filter(|e| e.is_pending()) {
            *load.entry(entry.peer).or_insert(0) += 1;
        }
        load
    }

    /// Pending requests without a reply in flight that are at least
    /// `deadline` old.
    pub fn expired(&self, now: Instant, deadline: Duration) -> Vec<ChunkRequest> {
        self.entries
            .values()
            .filter(|e| e.is_pending() && !e.incoming && e.age(now) >= deadline)
            .cloned()
            .collect()
    }

    /// Drops every pending request to `peer` whose reply has not started
    /// arriving. Returns the freed chunk indices.
    pub fn remove_pending_for_peer(&mut self, peer: &PeerId) -> Vec<u8> {
        let chunks: Vec<u8> = self
            .entries
            .values()
            .filter(|e| e.peer == *peer && e.is_pending() && !e.incoming)
            .map(|e| e.chunk)
            .collect();
        for chunk in &chunks {
            self.entries.remove(chunk);
        }
        chunks
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkRequest> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
