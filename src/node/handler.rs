use super::{NodeError, SwarmNode};
use crate::assembly::{handle_incoming_chunk_reply, CompletedReply, MergeState};
use crate::protocol::{ChunkReply, ReplyState, SwarmMessage};
use crate::storage::ItemChecksum;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, trace, warn};

impl SwarmNode {
    /// Dispatches one message received from `from`.
    ///
    /// Messages about unknown items are dropped. Errors are returned after
    /// the node has already reacted to them.
    pub async fn handle_message(&self, from: SocketAddr, message: SwarmMessage) -> Result<(), NodeError> {
        if self.is_shutting_down() {
            return Ok(());
        }

        match message {
            SwarmMessage::ChunkRequest { checksum, chunk, .. } => self.serve_chunk(from, checksum, chunk).await,
            SwarmMessage::ChunkReply(reply) => {
                if reply.state != ReplyState::DataIncluded {
                    return self
                        .integrate_reply(CompletedReply::without_data(reply, from))
                        .await;
                }
                match self.replies.accept_metadata(reply, from, Instant::now()) {
                    MergeState::Merged(completed) => self.integrate_reply(completed).await,
                    _ => Ok(()),
                }
            }
            SwarmMessage::ChunkData {
                source,
                sequence,
                data,
            } => match self.replies.accept_data(source, sequence, data, Instant::now()) {
                MergeState::Merged(completed) => self.integrate_reply(completed).await,
                _ => Ok(()),
            },
            SwarmMessage::AvailabilityUpdate {
                checksum,
                source,
                bitmap,
                is_super_peer,
            } => {
                let Some(item) = self.item(&checksum) else {
                    trace!("availability update for unknown item {}", checksum);
                    return Ok(());
                };
                item.lock()
                    .swarm
                    .add_or_update_peer(source, from, bitmap, is_super_peer);
                item.wake();
                Ok(())
            }
            SwarmMessage::AvailabilityRequest {
                checksum,
                source,
                bitmap,
                is_super_peer,
                want_peers,
            } => {
                let Some(item) = self.item(&checksum) else {
                    trace!("availability request for unknown item {}", checksum);
                    return Ok(());
                };
                let reply = {
                    let mut state = item.lock();
                    state
                        .swarm
                        .add_or_update_peer(source, from, bitmap, is_super_peer);
                    SwarmMessage::AvailabilityReply {
                        checksum,
                        source: self.local_id,
                        bitmap: state.swarm.local_bitmap(),
                        is_super_peer: state.swarm.local_is_super(),
                        peers: if want_peers {
                            state.swarm.snapshot()
                        } else {
                            Vec::new()
                        },
                    }
                };
                item.wake();
                self.transport.send(from, &reply)?;
                Ok(())
            }
            SwarmMessage::AvailabilityReply {
                checksum,
                source,
                bitmap,
                is_super_peer,
                peers,
            } => {
                if let Some(item) = self.item(&checksum) {
                    item.apply_availability_reply(from, source, bitmap, is_super_peer, &peers);
                    item.wake();
                }
                Ok(())
            }
            SwarmMessage::PeerState {
                checksum,
                source,
                busy,
                online,
            } => {
                if let Some(item) = self.item(&checksum) {
                    let mut state = item.lock();
                    if busy {
                        state.swarm.set_peer_busy(&source, Instant::now());
                    } else {
                        state.swarm.clear_peer_busy(&source);
                    }
                    state.swarm.set_peer_online(&source, online);
                    if !online {
                        state.requests.remove_pending_for_peer(&source);
                    }
                }
                Ok(())
            }
            SwarmMessage::PeerRemoval { checksum, peer } => {
                if let Some(item) = self.item(&checksum) {
                    let mut state = item.lock();
                    if state.swarm.remove_peer(&peer, false) {
                        state.requests.remove_pending_for_peer(&peer);
                    }
                }
                Ok(())
            }
            SwarmMessage::ItemRemoval {
                checksum,
                source,
                swarm_wide,
            } => {
                if swarm_wide {
                    return match self.remove_item(&checksum, false, false).await {
                        Err(NodeError::UnknownItem(_)) => Ok(()),
                        other => other,
                    };
                }
                if let Some(item) = self.item(&checksum) {
                    {
                        let mut state = item.lock();
                        state.swarm.remove_peer(&source, true);
                        state.requests.remove_pending_for_peer(&source);
                    }
                    debug!("peer {} left item {}", source, checksum);
                    item.wake();
                }
                Ok(())
            }
            SwarmMessage::DescriptorRequest { checksum, .. } => match self.describe_item(&checksum) {
                Ok(descriptor) => {
                    self.transport.send(from, &SwarmMessage::Descriptor(descriptor))?;
                    Ok(())
                }
                Err(_) => {
                    trace!("descriptor request for unknown item {}", checksum);
                    Ok(())
                }
            },
            SwarmMessage::Descriptor(descriptor) => {
                if let Some((_, waiters)) = self.pending_descriptors.remove(&descriptor.checksum) {
                    for waiter in waiters {
                        let _ = waiter.send(descriptor.clone());
                    }
                }
                Ok(())
            }
        }
    }

    /// Answers a chunk request with a data message followed by its metadata,
    /// or with a `NotAvailable` / `Busy` metadata message alone.
    async fn serve_chunk(&self, from: SocketAddr, checksum: ItemChecksum, chunk: u8) -> Result<(), NodeError> {
        let sequence = self.next_sequence();
        let reply = |state| {
            SwarmMessage::ChunkReply(ChunkReply {
                checksum,
                chunk,
                state,
                sequence,
                source: self.local_id,
            })
        };

        let span = self
            .item(&checksum)
            .filter(|item| item.local_bitmap().test(chunk))
            .and_then(|item| Some((item.layout().span(chunk)?, item)));
        let Some((span, item)) = span else {
            self.transport.send(from, &reply(ReplyState::NotAvailable))?;
            return Ok(());
        };

        let Ok(_permit) = self.upload_slots.try_acquire() else {
            debug!("out of upload slots, {} is told to back off", from);
            self.transport.send(from, &reply(ReplyState::Busy))?;
            return Ok(());
        };

        let data = match item.store().read_chunk(span.offset, span.length as u32).await {
            Ok(data) => data,
            Err(e) => {
                warn!("reading chunk {} of {} failed: {}", chunk, checksum, e);
                self.transport.send(from, &reply(ReplyState::NotAvailable))?;
                return Err(e.into());
            }
        };

        self.transport.send(
            from,
            &SwarmMessage::ChunkData {
                source: self.local_id,
                sequence,
                data,
            },
        )?;
        self.transport.send(from, &reply(ReplyState::DataIncluded))?;
        Ok(())
    }

    async fn integrate_reply(&self, reply: CompletedReply) -> Result<(), NodeError> {
        let Some(item) = self.item(&reply.checksum) else {
            trace!("chunk reply for unknown item {}", reply.checksum);
            return Ok(());
        };

        match handle_incoming_chunk_reply(&item, self.transport.as_ref(), reply).await {
            Ok(_) => Ok(()),
            Err(e) => {
                if item.is_assembling() {
                    item.fail(e.to_string());
                }
                Err(e.into())
            }
        }
    }
}
