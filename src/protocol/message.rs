use super::error::ProtocolError;
use crate::storage::ItemChecksum;
use crate::swarm::{ChunkBitmap, PeerId, PeerSnapshot, BITMAP_BYTES};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    ChunkRequest = 0,
    ChunkReply = 1,
    ChunkData = 2,
    AvailabilityUpdate = 3,
    AvailabilityRequest = 4,
    AvailabilityReply = 5,
    PeerState = 6,
    PeerRemoval = 7,
    ItemRemoval = 8,
    DescriptorRequest = 9,
    Descriptor = 10,
}

impl TryFrom<u8> for MessageId {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::ChunkRequest),
            1 => Ok(MessageId::ChunkReply),
            2 => Ok(MessageId::ChunkData),
            3 => Ok(MessageId::AvailabilityUpdate),
            4 => Ok(MessageId::AvailabilityRequest),
            5 => Ok(MessageId::AvailabilityReply),
            6 => Ok(MessageId::PeerState),
            7 => Ok(MessageId::PeerRemoval),
            8 => Ok(MessageId::ItemRemoval),
            9 => Ok(MessageId::DescriptorRequest),
            10 => Ok(MessageId::Descriptor),
            _ => Err(ProtocolError::InvalidMessageId(value)),
        }
    }
}

/// Outcome a serving peer reports for one chunk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyState {
    /// The chunk bytes follow in a separate data message.
    DataIncluded = 0,
    /// The peer does not hold the chunk.
    NotAvailable = 1,
    /// The peer is out of upload slots.
    Busy = 2,
}

impl TryFrom<u8> for ReplyState {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ReplyState::DataIncluded),
            1 => Ok(ReplyState::NotAvailable),
            2 => Ok(ReplyState::Busy),
            _ => Err(ProtocolError::InvalidReplyState(value)),
        }
    }
}

/// Metadata half of a chunk reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReply {
    pub checksum: ItemChecksum,
    pub chunk: u8,
    pub state: ReplyState,
    /// Pairs this metadata with its data message from the same source.
    pub sequence: u32,
    pub source: PeerId,
}

/// Everything a peer needs to start assembling an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyDescriptor {
    pub checksum: ItemChecksum,
    pub total_bytes: u64,
    pub chunk_size: u32,
    /// The describing peer's registry, itself included.
    pub peers: Vec<PeerSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmMessage {
    ChunkRequest {
        checksum: ItemChecksum,
        chunk: u8,
        source: PeerId,
    },
    ChunkReply(ChunkReply),
    ChunkData {
        source: PeerId,
        sequence: u32,
        data: Bytes,
    },
    /// Unsolicited bitmap gossip.
    AvailabilityUpdate {
        checksum: ItemChecksum,
        source: PeerId,
        bitmap: ChunkBitmap,
        is_super_peer: bool,
    },
    /// Asks for a fresh bitmap and carries the requester's own.
    AvailabilityRequest {
        checksum: ItemChecksum,
        source: PeerId,
        bitmap: ChunkBitmap,
        is_super_peer: bool,
        want_peers: bool,
    },
    AvailabilityReply {
        checksum: ItemChecksum,
        source: PeerId,
        bitmap: ChunkBitmap,
        is_super_peer: bool,
        peers: Vec<PeerSnapshot>,
    },
    PeerState {
        checksum: ItemChecksum,
        source: PeerId,
        busy: bool,
        online: bool,
    },
    PeerRemoval {
        checksum: ItemChecksum,
        peer: PeerId,
    },
    ItemRemoval {
        checksum: ItemChecksum,
        source: PeerId,
        swarm_wide: bool,
    },
    DescriptorRequest {
        checksum: ItemChecksum,
        source: PeerId,
    },
    Descriptor(AssemblyDescriptor),
}

impl SwarmMessage {
    pub fn id(&self) -> MessageId {
        match self {
            SwarmMessage::ChunkRequest { .. } => MessageId::ChunkRequest,
            SwarmMessage::ChunkReply(_) => MessageId::ChunkReply,
            SwarmMessage::ChunkData { .. } => MessageId::ChunkData,
            SwarmMessage::AvailabilityUpdate { .. } => MessageId::AvailabilityUpdate,
            SwarmMessage::AvailabilityRequest { .. } => MessageId::AvailabilityRequest,
            SwarmMessage::AvailabilityReply { .. } => MessageId::AvailabilityReply,
            SwarmMessage::PeerState { .. } => MessageId::PeerState,
            SwarmMessage::PeerRemoval { .. } => MessageId::PeerRemoval,
            SwarmMessage::ItemRemoval { .. } => MessageId::ItemRemoval,
            SwarmMessage::DescriptorRequest { .. } => MessageId::DescriptorRequest,
            SwarmMessage::Descriptor(_) => MessageId::Descriptor,
        }
    }

    /// The item a message concerns. Data halves carry none.
    pub fn checksum(&self) -> Option<&ItemChecksum> {
        match self {
            SwarmMessage::ChunkRequest { checksum, .. }
            | SwarmMessage::AvailabilityUpdate { checksum, .. }
            | SwarmMessage::AvailabilityRequest { checksum, .. }
            | SwarmMessage::AvailabilityReply { checksum, .. }
            | SwarmMessage::PeerState { checksum, .. }
            | SwarmMessage::PeerRemoval { checksum, .. }
            | SwarmMessage::ItemRemoval { checksum, .. }
            | SwarmMessage::DescriptorRequest { checksum, .. } => Some(checksum),
            SwarmMessage::ChunkReply(reply) => Some(&reply.checksum),
            SwarmMessage::Descriptor(descriptor) => Some(&descriptor.checksum),
            SwarmMessage::ChunkData { .. } => None,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.id() as u8);

        match self {
            SwarmMessage::ChunkRequest {
                checksum,
                chunk,
                source,
            } => {
                buf.put_slice(checksum.as_bytes());
                buf.put_u8(*chunk);
                buf.put_slice(source.as_bytes());
            }
            SwarmMessage::ChunkReply(reply) => {
                buf.put_slice(reply.checksum.as_bytes());
                buf.put_u8(reply.chunk);
                buf.put_u8(reply.state as u8);
                buf.put_u32(reply.sequence);
                buf.put_slice(reply.source.as_bytes());
            }
            SwarmMessage::ChunkData {
                source,
                sequence,
                data,
            } => {
                buf.put_slice(source.as_bytes());
                buf.put_u32(*sequence);
                buf.put_u32(data.len() as u32);
                buf.put_slice(data);
            }
            SwarmMessage::AvailabilityUpdate {
                checksum,
                source,
                bitmap,
                is_super_peer,
            } => {
                buf.put_slice(checksum.as_bytes());
                buf.put_slice(source.as_bytes());
                buf.put_slice(&bitmap.to_bytes());
                buf.put_u8(*is_super_peer as u8);
            }
            SwarmMessage::AvailabilityRequest {
                checksum,
                source,
                bitmap,
                is_super_peer,
                want_peers,
            } => {
                buf.put_slice(checksum.as_bytes());
                buf.put_slice(source.as_bytes());
                buf.put_slice(&bitmap.to_bytes());
                buf.put_u8(*is_super_peer as u8);
                buf.put_u8(*want_peers as u8);
            }
            SwarmMessage::AvailabilityReply {
                checksum,
                source,
                bitmap,
                is_super_peer,
                peers,
            } => {
                buf.put_slice(checksum.as_bytes());
                buf.put_slice(source.as_bytes());
                buf.put_slice(&bitmap.to_bytes());
                buf.put_u8(*is_super_peer as u8);
                put_peers(&mut buf, peers);
            }
            SwarmMessage::PeerState {
                checksum,
                source,
                busy,
                online,
            } => {
                buf.put_slice(checksum.as_bytes());
                buf.put_slice(source.as_bytes());
                buf.put_u8(*busy as u8);
                buf.put_u8(*online as u8);
            }
            SwarmMessage::PeerRemoval { checksum, peer } => {
                buf.put_slice(checksum.as_bytes());
                buf.put_slice(peer.as_bytes());
            }
            SwarmMessage::ItemRemoval {
                checksum,
                source,
                swarm_wide,
            } => {
                buf.put_slice(checksum.as_bytes());
                buf.put_slice(source.as_bytes());
                buf.put_u8(*swarm_wide as u8);
            }
            SwarmMessage::DescriptorRequest { checksum, source } => {
                buf.put_slice(checksum.as_bytes());
                buf.put_slice(source.as_bytes());
            }
            SwarmMessage::Descriptor(descriptor) => {
                buf.put_slice(descriptor.checksum.as_bytes());
                buf.put_u64(descriptor.total_bytes);
                buf.put_u32(descriptor.chunk_size);
                put_peers(&mut buf, &descriptor.peers);
            }
        }

        buf.freeze()
    }

    pub fn decode(mut data: Bytes) -> Result<Self, ProtocolError> {
        need(&data, 1)?;
        let id = MessageId::try_from(data.get_u8())?;

        let message = match id {
            MessageId::ChunkRequest => SwarmMessage::ChunkRequest {
                checksum: get_checksum(&mut data)?,
                chunk: get_u8(&mut data)?,
                source: get_peer_id(&mut data)?,
            },
            MessageId::ChunkReply => SwarmMessage::ChunkReply(ChunkReply {
                checksum: get_checksum(&mut data)?,
                chunk: get_u8(&mut data)?,
                state: ReplyState::try_from(get_u8(&mut data)?)?,
                sequence: get_u32(&mut data)?,
                source: get_peer_id(&mut data)?,
            }),
            MessageId::ChunkData => {
                let source = get_peer_id(&mut data)?;
                let sequence = get_u32(&mut data)?;
                let len = get_u32(&mut data)? as usize;
                need(&data, len)?;
                SwarmMessage::ChunkData {
                    source,
                    sequence,
                    data: data.split_to(len),
                }
            }
            MessageId::AvailabilityUpdate => SwarmMessage::AvailabilityUpdate {
                checksum: get_checksum(&mut data)?,
                source: get_peer_id(&mut data)?,
                bitmap: get_bitmap(&mut data)?,
                is_super_peer: get_bool(&mut data)?,
            },
            MessageId::AvailabilityRequest => SwarmMessage::AvailabilityRequest {
                checksum: get_checksum(&mut data)?,
                source: get_peer_id(&mut data)?,
                bitmap: get_bitmap(&mut data)?,
                is_super_peer: get_bool(&mut data)?,
                want_peers: get_bool(&mut data)?,
            },
            MessageId::AvailabilityReply => SwarmMessage::AvailabilityReply {
                checksum: get_checksum(&mut data)?,
                source: get_peer_id(&mut data)?,
                bitmap: get_bitmap(&mut data)?,
                is_super_peer: get_bool(&mut data)?,
                peers: get_peers(&mut data)?,
            },
            MessageId::PeerState => SwarmMessage::PeerState {
                checksum: get_checksum(&mut data)?,
                source: get_peer_id(&mut data)?,
                busy: get_bool(&mut data)?,
                online: get_bool(&mut data)?,
            },
            MessageId::PeerRemoval => SwarmMessage::PeerRemoval {
                checksum: get_checksum(&mut data)?,
                peer: get_peer_id(&mut data)?,
            },
            MessageId::ItemRemoval => SwarmMessage::ItemRemoval {
                checksum: get_checksum(&mut data)?,
                source: get_peer_id(&mut data)?,
                swarm_wide: get_bool(&mut data)?,
            },
            MessageId::DescriptorRequest => SwarmMessage::DescriptorRequest {
                checksum: get_checksum(&mut data)?,
                source: get_peer_id(&mut data)?,
            },
            MessageId::Descriptor => {
                let checksum = get_checksum(&mut data)?;
                need(&data, 12)?;
                let total_bytes = data.get_u64();
                let chunk_size = data.get_u32();
                SwarmMessage::Descriptor(AssemblyDescriptor {
                    checksum,
                    total_bytes,
                    chunk_size,
                    peers: get_peers(&mut data)?,
                })
            }
        };

        if data.has_remaining() {
            return Err(ProtocolError::TrailingBytes(data.remaining()));
        }
        Ok(message)
    }
}

fn need(data: &Bytes, needed: usize) -> Result<(), ProtocolError> {
    if data.remaining() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            remaining: data.remaining(),
        });
    }
    Ok(())
}

fn get_u8(data: &mut Bytes) -> Result<u8, ProtocolError> {
    need(data, 1)?;
    Ok(data.get_u8())
}

fn get_bool(data: &mut Bytes) -> Result<bool, ProtocolError> {
    Ok(get_u8(data)? != 0)
}

fn get_u32(data: &mut Bytes) -> Result<u32, ProtocolError> {
    need(data, 4)?;
    Ok(data.get_u32())
}

fn get_checksum(data: &mut Bytes) -> Result<ItemChecksum, ProtocolError> {
    need(data, 32)?;
    let mut arr = [0u8; 32];
    data.copy_to_slice(&mut arr);
    Ok(ItemChecksum(arr))
}

fn get_peer_id(data: &mut Bytes) -> Result<PeerId, ProtocolError> {
    need(data, 20)?;
    let mut arr = [0u8; 20];
    data.copy_to_slice(&mut arr);
    Ok(PeerId(arr))
}

fn get_bitmap(data: &mut Bytes) -> Result<ChunkBitmap, ProtocolError> {
    need(data, BITMAP_BYTES)?;
    let bytes = data.split_to(BITMAP_BYTES);
    Ok(ChunkBitmap::from_bytes(&bytes))
}

fn put_addr(buf: &mut BytesMut, addr: &SocketAddr) {
    match addr {
        SocketAddr::V4(addr) => {
            buf.put_u8(4);
            buf.put_slice(&addr.ip().octets());
            buf.put_u16(addr.port());
        }
        SocketAddr::V6(addr) => {
            buf.put_u8(6);
            buf.put_slice(&addr.ip().octets());
            buf.put_u16(addr.port());
        }
    }
}

fn get_addr(data: &mut Bytes) -> Result<SocketAddr, ProtocolError> {
    match get_u8(data)? {
        4 => {
            need(data, 6)?;
            let mut ip = [0u8; 4];
            data.copy_to_slice(&mut ip);
            let port = data.get_u16();
            Ok(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(ip), port)))
        }
        6 => {
            need(data, 18)?;
            let mut ip = [0u8; 16];
            data.copy_to_slice(&mut ip);
            let port = data.get_u16();
            Ok(SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(ip), port, 0, 0)))
        }
        family => Err(ProtocolError::InvalidAddressFamily(family)),
    }
}

fn put_peers(buf: &mut BytesMut, peers: &[PeerSnapshot]) {
    buf.put_u16(peers.len() as u16);
    for peer in peers {
        buf.put_slice(peer.peer_id.as_bytes());
        put_addr(buf, &peer.addr);
        buf.put_slice(&peer.bitmap.to_bytes());
        buf.put_u8(peer.is_super_peer as u8);
    }
}

fn get_peers(data: &mut Bytes) -> Result<Vec<PeerSnapshot>, ProtocolError> {
    need(data, 2)?;
    let count = data.get_u16() as usize;
    let mut peers = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        peers.push(PeerSnapshot {
            peer_id: get_peer_id(data)?,
            addr: get_addr(data)?,
            bitmap: get_bitmap(data)?,
            is_super_peer: get_bool(data)?,
        });
    }
    Ok(peers)
}
