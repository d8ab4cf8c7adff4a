//! Service events published for observers
//!
//! The service broadcasts these so an embedding application (UI, status
//! surfaces) can observe protocol activity without hooking the components
//! themselves. Purely observational; nothing in the protocol reacts to its
//! own events.

use std::fmt;

use crate::protocol::{ConnectionStatus, TranscriptionResult};
use crate::types::NodeId;

/// Events emitted while the service runs
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// A transcription result arrived from a peer
    ResultReceived {
        /// Peer that sent the result
        from: NodeId,
        /// The result payload
        result: TranscriptionResult,
    },
    /// A peer announced its connection status
    ConnectionChanged {
        /// Peer that announced
        from: NodeId,
        /// The announced status
        status: ConnectionStatus,
    },
    /// A sync request was answered
    SyncServed {
        /// Peer that requested
        to: NodeId,
        /// Number of records in the reply
        records: usize,
        /// Whether the reply reported success
        success: bool,
    },
    /// An inbound audio asset reached its terminal outcome
    AssetCompleted {
        /// The record id the asset was keyed by
        record_id: String,
        /// Whether transcription succeeded
        success: bool,
    },
    /// A heartbeat probe was answered
    HeartbeatAnswered {
        /// Peer that probed
        to: NodeId,
    },
}

impl fmt::Display for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceEvent::ResultReceived { from, result } => {
                write!(f, "result {} from {}", result.record_id, from)
            }
            ServiceEvent::ConnectionChanged { from, status } => {
                write!(
                    f,
                    "peer {} {}",
                    from,
                    if status.is_connected { "connected" } else { "disconnected" }
                )
            }
            ServiceEvent::SyncServed { to, records, success } => {
                if *success {
                    write!(f, "served {} records to {}", records, to)
                } else {
                    write!(f, "sync for {} failed", to)
                }
            }
            ServiceEvent::AssetCompleted { record_id, success } => {
                write!(
                    f,
                    "asset {} {}",
                    record_id,
                    if *success { "transcribed" } else { "rejected" }
                )
            }
            ServiceEvent::HeartbeatAnswered { to } => write!(f, "heartbeat answered to {}", to),
        }
    }
}

impl ServiceEvent {
    /// The record id this event concerns, if any
    pub fn record_id(&self) -> Option<&str> {
        match self {
            ServiceEvent::ResultReceived { result, .. } => Some(&result.record_id),
            ServiceEvent::AssetCompleted { record_id, .. } => Some(record_id),
            _ => None,
        }
    }
}
