use super::tracker::ChunkRequestTracker;
use crate::constants::MAX_CHUNKS;
use crate::swarm::{ChunksNeeded, PeerAvailabilityInfo, PeerId};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

/// A request the scheduler should send this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedRequest {
    pub chunk: u8,
    pub peer: PeerId,
    pub addr: SocketAddr,
}

/// Inputs to one planning round besides the chunk map.
#[derive(Debug, Clone, Copy)]
pub struct PlanLimits {
    pub per_peer_cap: usize,
    pub global_cap: usize,
    /// More than half the swarm holds the whole item. Flips the peer
    /// preference from non-super-peers to peers holding the most data.
    pub majority_complete: bool,
}

/// Picks the next batch of chunk requests.
///
/// Rarest chunks go first, one per peer, to spread load; leftover capacity is
/// then filled round-robin. Busy peers and chunks already tracked are skipped.
pub fn plan_requests<R: Rng + ?Sized>(
    needed: &ChunksNeeded,
    tracker: &ChunkRequestTracker,
    limits: &PlanLimits,
    rng: &mut R,
) -> Vec<PlannedRequest> {
    let mut candidates: HashMap<SocketAddr, &PeerAvailabilityInfo> = HashMap::new();
    for holders in needed.values() {
        for (addr, info) in holders {
            candidates.entry(*addr).or_insert(info);
        }
    }
    if candidates.is_empty() {
        return Vec::new();
    }

    let cap = (limits.per_peer_cap * candidates.len())
        .min(needed.len())
        .min(limits.global_cap);
    let mut in_flight = tracker.pending_count();
    if in_flight >= cap {
        return Vec::new();
    }

    let mut load = tracker.pending_per_peer();
    let mut planned = Vec::new();
    let mut assigned: HashSet<u8> = HashSet::new();
    let mut targeted: HashSet<PeerId> = HashSet::new();

    // Rarity: fewest holders first, random among equals.
    let mut chunks: Vec<(u8, usize, u32)> = needed
        .iter()
        .filter(|(chunk, _)| !tracker.contains(**chunk))
        .map(|(chunk, holders)| (*chunk, holders.len(), rng.random::<u32>()))
        .collect();
    chunks.sort_by_key(|&(_, holders, tie)| (holders, tie));

    // Spread: each chunk to the best peer not yet used this round.
    for &(chunk, _, _) in &chunks {
        if in_flight >= cap {
            break;
        }
        let Some(holders) = needed.get(&chunk) else {
            continue;
        };
        let mut eligible: Vec<(&SocketAddr, &PeerAvailabilityInfo)> = holders
            .iter()
            .filter(|(_, info)| {
                !info.is_busy()
                    && !targeted.contains(&info.peer_id)
                    && load.get(&info.peer_id).copied().unwrap_or(0) < limits.per_peer_cap
            })
            .collect();
        eligible.sort_by_key(|(addr, _)| **addr);

        let best = eligible
            .into_iter()
            .map(|(addr, info)| (rank(info, limits.majority_complete, rng.random()), *addr, info.peer_id))
            .min_by_key(|(key, _, _)| *key);

        if let Some((_, addr, peer)) = best {
            planned.push(PlannedRequest { chunk, peer, addr });
            assigned.insert(chunk);
            targeted.insert(peer);
            *load.entry(peer).or_insert(0) += 1;
            in_flight += 1;
        }
    }

    // Saturate: round-robin over peers in random order.
    let mut order: Vec<(SocketAddr, PeerId)> = candidates
        .iter()
        .filter(|(_, info)| !info.is_busy())
        .map(|(addr, info)| (*addr, info.peer_id))
        .collect();
    order.sort();
    order.shuffle(rng);

    while in_flight < cap {
        let mut progressed = false;
        for &(addr, peer) in &order {
            if in_flight >= cap {
                break;
            }
            if load.get(&peer).copied().unwrap_or(0) >= limits.per_peer_cap {
                continue;
            }
            let next = chunks.iter().map(|c| c.0).find(|chunk| {
                !assigned.contains(chunk)
                    && needed
                        .get(chunk)
                        .is_some_and(|holders| holders.contains_key(&addr))
            });
            if let Some(chunk) = next {
                planned.push(PlannedRequest { chunk, peer, addr });
                assigned.insert(chunk);
                *load.entry(peer).or_insert(0) += 1;
                in_flight += 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    planned
}

/// Lower is better: fewest timeouts, then preference, then random.
fn rank(info: &PeerAvailabilityInfo, majority_complete: bool, tie: u32) -> (u32, usize, u32) {
    let preference = if majority_complete {
        MAX_CHUNKS - info.bitmap.count()
    } else {
        usize::from(info.is_super_peer)
    };
    (info.timeout_count(), preference, tie)
}
