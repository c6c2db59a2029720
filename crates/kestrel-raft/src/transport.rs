//! Transport abstraction for Raft message delivery.
//!
//! The consensus core only needs "send this datagram to that node". Delivery
//! is unreliable: messages may be lost, duplicated or reordered, and the core
//! never waits for a reply. Inbound datagrams are handed to
//! `Replica::on_datagram` by whoever owns the receiving end (see `driver`).
//!
//! Implementations:
//! - `InMemoryTransport`: unbounded channels, for tests and in-process clusters
//! - `UdpTransport` (kestrelkv-server): one UDP socket per replica

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{RaftError, Result};
use crate::types::NodeId;

/// Outbound half of a transport.
///
/// `send` must not block: it either hands the payload off or fails fast.
/// Callers treat errors as a dropped message.
pub trait Transport: Send + Sync {
    fn send(&self, dst: &NodeId, payload: Bytes) -> Result<()>;
}

pub type DatagramSender = mpsc::UnboundedSender<Bytes>;
pub type DatagramReceiver = mpsc::UnboundedReceiver<Bytes>;

/// In-memory transport (local channels, no network).
///
/// Routes payloads to the inbox registered for the destination id. Replicas
/// and clients register the same way. Removing a route models a partition:
/// sends to it fail and the payload is lost.
#[derive(Clone)]
pub struct InMemoryTransport {
    routes: Arc<RwLock<HashMap<NodeId, DatagramSender>>>,
}

impl InMemoryTransport {
    /// `routes`: destination id → inbox sender.
    pub fn new(routes: HashMap<NodeId, DatagramSender>) -> Self {
        Self {
            routes: Arc::new(RwLock::new(routes)),
        }
    }

    pub fn add_peer(&self, peer_id: NodeId, sender: DatagramSender) {
        self.routes.write().insert(peer_id, sender);
    }

    pub fn remove_peer(&self, peer_id: &NodeId) {
        self.routes.write().remove(peer_id);
    }

    fn get_peer(&self, peer_id: &NodeId) -> Option<DatagramSender> {
        self.routes.read().get(peer_id).cloned()
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, dst: &NodeId, payload: Bytes) -> Result<()> {
        let peer = self
            .get_peer(dst)
            .ok_or_else(|| RaftError::PeerNotFound { peer: dst.clone() })?;

        peer.send(payload).map_err(|e| RaftError::Io {
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, e.to_string()),
        })
    }
}
