//! Transcription dispatch: staged audio in, correlated result out

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{LinkError, LinkResult};
use crate::ingest::StagedAsset;
use crate::protocol::{TranscriptionResult, TOPIC_RESULT};
use crate::transport::Transport;
use crate::types::now_ms;

/// Transcription engine collaborator
///
/// Implementations own the model lifecycle and inference; the dispatcher
/// only hands over a staged file path and waits for text.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    /// Transcribe the audio file at `path`, returning the raw text
    async fn transcribe(&self, path: &Path) -> LinkResult<String>;
}

/// Forwards staged audio to the engine and broadcasts the terminal result
///
/// The engine slot may be empty while the model is still loading; a
/// dispatch in that window produces an unavailable-engine failure result
/// rather than queueing. Exactly one result leaves per dispatch, and it
/// goes to every currently connected peer, not just the asset's sender.
pub struct TranscriptionDispatcher {
    transport: Arc<dyn Transport>,
    engine: RwLock<Option<Arc<dyn TranscriptionEngine>>>,
}

impl TranscriptionDispatcher {
    /// Create a dispatcher with an empty engine slot
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            engine: RwLock::new(None),
        }
    }

    /// Install or swap the engine
    pub fn set_engine(&self, engine: Arc<dyn TranscriptionEngine>) {
        *self.engine.write() = Some(engine);
        info!("transcription engine installed");
    }

    /// Whether an engine is currently installed
    pub fn engine_available(&self) -> bool {
        self.engine.read().is_some()
    }

    /// Run the engine over a staged asset and broadcast the outcome
    pub async fn dispatch(&self, asset: &StagedAsset) -> TranscriptionResult {
        let engine = self.engine.read().clone();
        let result = match engine {
            Some(engine) => match engine.transcribe(&asset.local_path).await {
                Ok(text) => {
                    let text = text.trim().to_string();
                    info!(record_id = %asset.record_id, chars = text.len(), "transcription complete");
                    TranscriptionResult::ok(&asset.record_id, text, now_ms())
                }
                Err(e) => {
                    warn!(record_id = %asset.record_id, error = %e, "transcription failed");
                    TranscriptionResult::failure(&asset.record_id, e.to_string(), now_ms())
                }
            },
            None => {
                warn!(record_id = %asset.record_id, "dispatch with no engine installed");
                TranscriptionResult::failure(
                    &asset.record_id,
                    LinkError::EngineUnavailable.to_string(),
                    now_ms(),
                )
            }
        };
        self.broadcast(&result).await;
        result
    }

    /// Broadcast a failure result for an asset rejected before dispatch
    ///
    /// The engine is never consulted on this path.
    pub async fn publish_rejection(&self, record_id: &str, error: &str) -> TranscriptionResult {
        let result = TranscriptionResult::failure(record_id, error, now_ms());
        self.broadcast(&result).await;
        result
    }

    /// Send a result to every currently connected peer
    ///
    /// Per-peer send failures are logged and never retried.
    async fn broadcast(&self, result: &TranscriptionResult) {
        let payload = match result.encode() {
            Ok(p) => Bytes::from(p),
            Err(e) => {
                warn!(record_id = %result.record_id, error = %e, "result encode failed");
                return;
            }
        };
        let peers = match self.transport.connected_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                warn!(record_id = %result.record_id, error = %e, "peer lookup failed, result dropped");
                return;
            }
        };
        if peers.is_empty() {
            warn!(record_id = %result.record_id, "no connected peers, result dropped");
            return;
        }
        for peer in peers {
            if let Err(e) = self
                .transport
                .send(&peer.node_id, TOPIC_RESULT, payload.clone())
                .await
            {
                warn!(to = %peer.node_id, record_id = %result.record_id, error = %e, "result send failed");
            }
        }
    }
}
