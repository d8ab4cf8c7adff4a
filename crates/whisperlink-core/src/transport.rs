//! Transport collaborator interface and the in-memory loopback
//!
//! The real device link lives outside this crate; the core sends through
//! [`Transport`] and receives deliveries on an mpsc queue of [`Inbound`]
//! values. [`LoopbackHub`] wires any number of in-process nodes together
//! for tests and the demo.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{LinkError, LinkResult};
use crate::protocol::AssetMetadata;
use crate::types::{NodeId, PeerNode};

/// Reader handle streaming one binary asset's bytes
pub type AssetReader = Box<dyn AsyncRead + Send + Unpin>;

/// A binary asset mid-delivery: its metadata map plus the byte stream
pub struct AssetTransfer {
    /// Metadata map sent alongside the asset
    pub metadata: AssetMetadata,
    /// The asset's bytes; fully drained during staging
    pub content: AssetReader,
}

impl AssetTransfer {
    /// Wrap an already-buffered payload as a transfer
    pub fn from_bytes(metadata: AssetMetadata, content: impl Into<Bytes>) -> Self {
        Self {
            metadata,
            content: Box::new(std::io::Cursor::new(content.into())),
        }
    }
}

impl std::fmt::Debug for AssetTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetTransfer")
            .field("metadata", &self.metadata)
            .field("content", &"<stream>")
            .finish()
    }
}

/// One inbound delivery from the transport
#[derive(Debug)]
pub enum Inbound {
    /// A topic message with an opaque byte payload
    Message {
        /// Topic the sender addressed
        topic: String,
        /// Raw payload bytes
        payload: Bytes,
        /// Sending peer
        from: NodeId,
    },
    /// A binary asset transfer
    Asset {
        /// Metadata and byte stream
        transfer: AssetTransfer,
        /// Sending peer
        from: NodeId,
    },
}

/// Sending side of the device link
///
/// Implementations wrap the platform's peer messaging primitive. A send
/// failure is terminal for that message; the protocol never retries on the
/// caller's behalf.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an opaque payload to one peer on a topic
    async fn send(&self, to: &NodeId, topic: &str, payload: Bytes) -> LinkResult<()>;

    /// Send a binary asset with its metadata map to one peer
    async fn send_asset(
        &self,
        to: &NodeId,
        metadata: AssetMetadata,
        content: Bytes,
    ) -> LinkResult<()>;

    /// Snapshot of currently reachable peers
    async fn connected_peers(&self) -> LinkResult<Vec<PeerNode>>;
}

/// In-memory hub connecting loopback transports
///
/// Use for tests and the demo. Deliveries are immediate and in order per
/// sender; a detached node becomes unreachable, which is how tests exercise
/// send failures.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    nodes: Arc<Mutex<HashMap<NodeId, LoopbackNode>>>,
}

struct LoopbackNode {
    peer: PeerNode,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl LoopbackHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node, returning its transport handle and inbound queue
    pub fn join(
        &self,
        node_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> (LoopbackTransport, mpsc::UnboundedReceiver<Inbound>) {
        let peer = PeerNode::new(node_id, display_name);
        let node_id = peer.node_id.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        self.nodes
            .lock()
            .insert(node_id.clone(), LoopbackNode { peer, inbound: tx });
        (
            LoopbackTransport {
                hub: self.clone(),
                local: node_id,
            },
            rx,
        )
    }

    /// Detach a node; subsequent sends to it fail
    pub fn leave(&self, node_id: &NodeId) {
        self.nodes.lock().remove(node_id);
    }

    fn deliver(&self, to: &NodeId, delivery: Inbound) -> LinkResult<()> {
        let nodes = self.nodes.lock();
        let node = nodes
            .get(to)
            .ok_or_else(|| LinkError::Transport(format!("peer {} not reachable", to)))?;
        node.inbound
            .send(delivery)
            .map_err(|_| LinkError::Transport(format!("peer {} stopped receiving", to)))
    }

    fn peers_except(&self, local: &NodeId) -> Vec<PeerNode> {
        self.nodes
            .lock()
            .values()
            .filter(|n| &n.peer.node_id != local)
            .map(|n| n.peer.clone())
            .collect()
    }
}

/// Loopback implementation of [`Transport`]
#[derive(Clone)]
pub struct LoopbackTransport {
    hub: LoopbackHub,
    local: NodeId,
}

impl LoopbackTransport {
    /// The node id this handle sends as
    pub fn local_id(&self) -> &NodeId {
        &self.local
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, to: &NodeId, topic: &str, payload: Bytes) -> LinkResult<()> {
        debug!(%to, topic, len = payload.len(), "loopback send");
        self.hub.deliver(
            to,
            Inbound::Message {
                topic: topic.to_string(),
                payload,
                from: self.local.clone(),
            },
        )
    }

    async fn send_asset(
        &self,
        to: &NodeId,
        metadata: AssetMetadata,
        content: Bytes,
    ) -> LinkResult<()> {
        debug!(%to, record_id = %metadata.record_id, len = content.len(), "loopback asset send");
        self.hub.deliver(
            to,
            Inbound::Asset {
                transfer: AssetTransfer::from_bytes(metadata, content),
                from: self.local.clone(),
            },
        )
    }

    async fn connected_peers(&self) -> LinkResult<Vec<PeerNode>> {
        Ok(self.hub.peers_except(&self.local))
    }
}
