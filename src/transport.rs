//! Message transport seam.
//!
//! The engine only needs a reliable unicast send that reports unreachable
//! peers and the local listen addresses. Incoming
//! messages and connection losses are pushed into
//! [`SwarmNode::handle_message`] and [`SwarmNode::on_connection_lost`] by the
//! transport itself.
//!
//! [`MemoryNetwork`] is an in-process implementation that routes encoded
//! messages between nodes over channels.
//!
//! [`SwarmNode::handle_message`]: crate::node::SwarmNode::handle_message
//! [`SwarmNode::on_connection_lost`]: crate::node::SwarmNode::on_connection_lost

mod memory;

pub use memory::{MemoryInbox, MemoryNetwork, MemoryTransport};

use crate::protocol::SwarmMessage;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors reported by a transport send.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No connection to the peer could be used.
    #[error("peer unreachable: {0}")]
    Unreachable(SocketAddr),

    /// The transport is shutting down.
    #[error("transport closed")]
    Closed,
}

pub trait Transport: Send + Sync + 'static {
    /// Addresses this node listens on.
    fn local_addrs(&self) -> Vec<SocketAddr>;

    /// Queues a message for one peer.
    fn send(&self, to: SocketAddr, message: &SwarmMessage) -> Result<(), TransportError>;
}
