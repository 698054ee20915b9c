use crate::swarm::PeerId;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Why a peer was dropped from an item's swarm during assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Timeout,
    NotAvailable,
    ConnectionLost,
    SendFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    Started { missing: usize },
    RequestSent { chunk: u8, peer: PeerId },
    RequestExpired { chunk: u8, peer: PeerId },
    ChunkReceived { chunk: u8, peer: PeerId },
    PeerEvicted { peer: PeerId, reason: EvictionReason },
    Completed { elapsed: Duration },
    Aborted,
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct BuildLogEntry {
    pub at: Instant,
    pub event: BuildEvent,
}

/// Ring buffer of recent assembly events. The oldest entry is dropped once
/// the capacity is reached.
#[derive(Debug)]
pub struct BuildLog {
    entries: VecDeque<BuildLogEntry>,
    capacity: usize,
}

impl BuildLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, event: BuildEvent) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(BuildLogEntry {
            at: Instant::now(),
            event,
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &BuildLogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&BuildEvent> {
        self.entries.back().map(|e| &e.event)
    }
}
