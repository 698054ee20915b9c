use super::{Transport, TransportError};
use crate::node::SwarmNode;
use crate::protocol::SwarmMessage;
use bytes::Bytes;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

type Envelope = (SocketAddr, Bytes);

/// In-process network of endpoints.
///
/// Messages are encoded on send and decoded on receipt, so everything that
/// crosses it goes through the wire codec. Delivery to one endpoint is in
/// order.
#[derive(Default)]
pub struct MemoryNetwork {
    endpoints: DashMap<SocketAddr, mpsc::UnboundedSender<Envelope>>,
    nodes: DashMap<SocketAddr, Weak<SwarmNode>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Opens an endpoint at `addr`, replacing any previous one.
    pub fn endpoint(self: &Arc<Self>, addr: SocketAddr) -> (Arc<MemoryTransport>, MemoryInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.endpoints.insert(addr, tx);
        let transport = Arc::new(MemoryTransport {
            addr,
            network: Arc::clone(self),
        });
        (transport, MemoryInbox { addr, rx })
    }

    /// Feeds an endpoint's inbox into `node` until the endpoint goes away.
    pub fn attach(&self, node: &Arc<SwarmNode>, mut inbox: MemoryInbox) -> JoinHandle<()> {
        self.nodes.insert(inbox.addr, Arc::downgrade(node));
        let node = Arc::downgrade(node);

        tokio::spawn(async move {
            while let Some((from, message)) = inbox.recv().await {
                let Some(node) = node.upgrade() else {
                    break;
                };
                let id = message.id();
                if let Err(e) = node.handle_message(from, message).await {
                    warn!("{:?} from {} failed: {}", id, from, e);
                }
            }
            trace!("inbox of {} closed", inbox.addr);
        })
    }

    pub fn is_connected(&self, addr: SocketAddr) -> bool {
        self.endpoints.contains_key(&addr)
    }

    /// Drops the endpoint at `addr` and reports the loss to every attached
    /// node.
    pub fn disconnect(&self, addr: SocketAddr) {
        self.endpoints.remove(&addr);
        self.nodes.remove(&addr);

        let nodes: Vec<Arc<SwarmNode>> = self
            .nodes
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        for node in nodes {
            node.on_connection_lost(addr);
        }
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, bytes: Bytes) -> Result<(), TransportError> {
        let endpoint = self
            .endpoints
            .get(&to)
            .ok_or(TransportError::Unreachable(to))?;
        endpoint
            .send((from, bytes))
            .map_err(|_| TransportError::Unreachable(to))
    }
}

/// One node's handle on a [`MemoryNetwork`].
pub struct MemoryTransport {
    addr: SocketAddr,
    network: Arc<MemoryNetwork>,
}

impl Transport for MemoryTransport {
    fn local_addrs(&self) -> Vec<SocketAddr> {
        vec![self.addr]
    }

    fn send(&self, to: SocketAddr, message: &SwarmMessage) -> Result<(), TransportError> {
        if !self.network.is_connected(self.addr) {
            return Err(TransportError::Closed);
        }
        self.network.deliver(self.addr, to, message.encode())
    }
}

/// Messages arriving at one endpoint.
pub struct MemoryInbox {
    addr: SocketAddr,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl MemoryInbox {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Next decodable message. Malformed messages are logged and skipped.
    pub async fn recv(&mut self) -> Option<(SocketAddr, SwarmMessage)> {
        loop {
            let (from, bytes) = self.rx.recv().await?;
            match SwarmMessage::decode(bytes) {
                Ok(message) => return Some((from, message)),
                Err(e) => warn!("dropping malformed message from {}: {}", from, e),
            }
        }
    }

    /// Like [`recv`](Self::recv) but returns `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<(SocketAddr, SwarmMessage)> {
        while let Ok((from, bytes)) = self.rx.try_recv() {
            match SwarmMessage::decode(bytes) {
                Ok(message) => return Some((from, message)),
                Err(e) => warn!("dropping malformed message from {}: {}", from, e),
            }
        }
        None
    }
}
