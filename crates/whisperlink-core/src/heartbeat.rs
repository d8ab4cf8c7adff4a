//! Liveness probes over the heartbeat topic
//!
//! Any inbound payload that is not the fixed ack is treated as a probe and
//! answered with exactly one [`HEARTBEAT_ACK`]. Inbound acks are never
//! answered; two nodes probing each other would otherwise volley acks
//! forever. An ack instead resolves the pending probe for the sending peer,
//! if one is waiting.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::correlator::ResponseCorrelator;
use crate::error::LinkResult;
use crate::events::ServiceEvent;
use crate::protocol::{HEARTBEAT_ACK, HEARTBEAT_PROBE, TOPIC_HEARTBEAT};
use crate::transport::Transport;
use crate::types::NodeId;

/// Answers inbound probes and issues outbound ones
pub struct HeartbeatMonitor {
    transport: Arc<dyn Transport>,
    pending: ResponseCorrelator<()>,
    event_tx: broadcast::Sender<ServiceEvent>,
}

impl HeartbeatMonitor {
    /// Create a monitor over the given transport
    pub fn new(transport: Arc<dyn Transport>, event_tx: broadcast::Sender<ServiceEvent>) -> Self {
        Self {
            transport,
            pending: ResponseCorrelator::new(),
            event_tx,
        }
    }

    /// Handle one inbound heartbeat message
    pub async fn handle(&self, payload: Bytes, from: NodeId) -> LinkResult<()> {
        if payload.as_ref() == HEARTBEAT_ACK {
            if !self.pending.resolve(from.as_str(), ()) {
                debug!(%from, "heartbeat ack with no pending probe");
            }
            return Ok(());
        }

        trace!(%from, len = payload.len(), "answering heartbeat");
        self.transport
            .send(&from, TOPIC_HEARTBEAT, Bytes::from_static(HEARTBEAT_ACK))
            .await?;
        let _ = self.event_tx.send(ServiceEvent::HeartbeatAnswered { to: from });
        Ok(())
    }

    /// Probe a peer and wait for its acknowledgment
    ///
    /// Pending probes are keyed by peer, so at most one probe per peer is
    /// in flight; issuing another supersedes the first.
    pub async fn probe(&self, peer: &NodeId, timeout: Duration) -> LinkResult<()> {
        let reply = self.pending.register(peer.as_str(), timeout);
        debug!(%peer, "probing peer");
        if let Err(e) = self
            .transport
            .send(peer, TOPIC_HEARTBEAT, Bytes::from_static(HEARTBEAT_PROBE))
            .await
        {
            reply.cancel();
            return Err(e);
        }
        reply.wait().await
    }

    /// Drop pending probes whose awaiter is gone
    pub fn sweep_pending(&self) -> usize {
        self.pending.sweep_expired()
    }
}
