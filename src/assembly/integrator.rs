use super::correlation::CompletedReply;
use super::error::AssemblyError;
use super::tracker::{ChunkRequest, ChunkRequestTracker};
use crate::item::{BuildEvent, DistributedItem, EvictionReason};
use crate::protocol::ReplyState;
use crate::swarm::PeerId;
use crate::transport::Transport;
use bytes::Bytes;
use std::time::Instant;
use tracing::{debug, trace};

/// What became of one chunk reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationOutcome {
    /// The chunk was written and marked held.
    Integrated { chunk: u8, item_complete: bool },
    /// The chunk is already held or being written.
    Duplicate,
    /// The reply carried nothing usable.
    Ignored,
    /// The peer said it does not hold the chunk.
    NotAvailable { evicted: bool },
    /// The peer is out of upload slots.
    Busy,
}

enum Decision {
    Integrate(Bytes),
    Done(IntegrationOutcome),
}

/// Applies a fully merged chunk reply to its item.
///
/// The scheduler is always woken afterwards. Integration errors are fatal for
/// the item; the request entry is removed before the error is returned.
pub async fn handle_incoming_chunk_reply(
    item: &DistributedItem,
    transport: &dyn Transport,
    reply: CompletedReply,
) -> Result<IntegrationOutcome, AssemblyError> {
    let decision = record_reply(item, &reply);
    item.wake();

    let data = match decision {
        Decision::Done(outcome) => {
            trace!("chunk {} reply from {}: {:?}", reply.chunk, reply.source, outcome);
            return Ok(outcome);
        }
        Decision::Integrate(data) => data,
    };

    match integrate(item, transport, &reply, data).await {
        Ok(item_complete) => {
            item.wake();
            Ok(IntegrationOutcome::Integrated {
                chunk: reply.chunk,
                item_complete,
            })
        }
        Err(e) => {
            item.lock().requests.remove(reply.chunk);
            item.wake();
            Err(e)
        }
    }
}

fn record_reply(item: &DistributedItem, reply: &CompletedReply) -> Decision {
    let mut state = item.lock();
    let entry = state.requests.get(reply.chunk).map(|e| (e.peer, e.incoming));

    match reply.state {
        ReplyState::DataIncluded => {
            let Some(data) = reply.data.clone() else {
                return Decision::Done(IntegrationOutcome::Ignored);
            };
            match entry {
                Some((_, true)) => Decision::Done(IntegrationOutcome::Duplicate),
                Some((_, false)) => {
                    state.requests.begin_incoming(reply.chunk);
                    Decision::Integrate(data)
                }
                None => {
                    if reply.checksum != item.checksum() || state.swarm.local_bitmap().test(reply.chunk) {
                        return Decision::Done(IntegrationOutcome::Duplicate);
                    }
                    debug!("accepting unsolicited chunk {} from {}", reply.chunk, reply.source);
                    let mut request = ChunkRequest::new(reply.chunk, reply.source, reply.from, Instant::now());
                    request.incoming = true;
                    state.requests.insert(request);
                    Decision::Integrate(data)
                }
            }
        }
        ReplyState::NotAvailable => {
            drop_request_from(&mut state.requests, reply, entry);
            drop(state);
            let evicted = item.evict_peer(&reply.source, EvictionReason::NotAvailable);
            Decision::Done(IntegrationOutcome::NotAvailable { evicted })
        }
        ReplyState::Busy => {
            state.swarm.set_peer_busy(&reply.source, Instant::now());
            drop_request_from(&mut state.requests, reply, entry);
            Decision::Done(IntegrationOutcome::Busy)
        }
    }
}

/// Frees the chunk for re-planning if its request went to the replying peer
/// and no data for it is being written.
fn drop_request_from(
    requests: &mut ChunkRequestTracker,
    reply: &CompletedReply,
    entry: Option<(PeerId, bool)>,
) {
    if let Some((peer, false)) = entry {
        if peer == reply.source {
            requests.remove(reply.chunk);
        }
    }
}

async fn integrate(
    item: &DistributedItem,
    transport: &dyn Transport,
    reply: &CompletedReply,
    data: Bytes,
) -> Result<bool, AssemblyError> {
    let total = item.total_chunks();
    let span = item
        .layout()
        .span(reply.chunk)
        .ok_or(AssemblyError::ChunkIndexOutOfRange {
            chunk: reply.chunk,
            total,
        })?;
    if data.len() as u64 != span.length {
        return Err(AssemblyError::ChunkLengthMismatch {
            chunk: reply.chunk,
            expected: span.length,
            actual: data.len() as u64,
        });
    }

    item.store().write_at(span.offset, data).await?;

    let (complete, rebroadcast) = {
        let mut state = item.lock();
        state.swarm.record_local_chunk_complete(reply.chunk);
        state.requests.mark_complete(reply.chunk);
        let complete = state.swarm.local_bitmap().all_set_through(total);
        let rebroadcast = !complete && state.swarm.chunk_health(reply.chunk, total) < 1.0;
        (complete, rebroadcast)
    };

    item.log(BuildEvent::ChunkReceived {
        chunk: reply.chunk,
        peer: reply.source,
    });
    trace!("integrated chunk {} of {} from {}", reply.chunk, item.checksum(), reply.source);

    if rebroadcast {
        item.broadcast_local_availability(transport);
    }
    Ok(complete)
}
