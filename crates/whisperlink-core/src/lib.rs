//! WhisperLink Core Library
//!
//! Note sync and audio transcription relay between paired devices.
//!
//! ## Overview
//!
//! WhisperLink keeps a primary device and its companion in step over an
//! unreliable message link. The companion pulls note records incrementally
//! by watermark timestamp, pushes voice recordings to the primary for
//! transcription, and hears the result back on a broadcast topic. All
//! traffic rides a small set of fixed topics over a pluggable transport.
//!
//! ## Core Principles
//!
//! - **Pull-based sync**: the requester owns its watermark; the responder
//!   is stateless and just filters
//! - **One reply per request**: every sync request and heartbeat gets
//!   exactly one answer, malformed ones included
//! - **Best-effort delivery**: a failed send is logged, never retried;
//!   requesters recover by asking again
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use whisperlink_core::{LinkConfig, LoopbackHub, NodeId, WhisperLink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = LoopbackHub::new();
//!     let (transport, inbound) = hub.join("watch", "Watch");
//!
//!     let service = WhisperLink::start(
//!         LinkConfig::default().with_device_name("Watch"),
//!         Arc::new(transport),
//!         inbound,
//!         notes,
//!     )
//!     .await?;
//!
//!     // Pull everything newer than the last sync
//!     let response = service.request_sync(&NodeId::new("phone"), 1_000).await?;
//!     for record in &response.records {
//!         println!("{}: {}", record.timestamp, record.text);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod config;
pub mod correlator;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod ingest;
pub mod protocol;
pub mod router;
pub mod service;
pub mod sync;
pub mod transcribe;
pub mod transport;
pub mod types;

// Re-exports
pub use audio::{encode_pcm_wav, probe_wav, WavInfo};
pub use config::{
    AudioLimits, EngineConfig, LinkConfig, MAX_AUDIO_DURATION_MS, MAX_AUDIO_SIZE_BYTES,
    SAMPLE_RATE_HZ,
};
pub use correlator::{PendingReply, ResponseCorrelator};
pub use error::{LinkError, LinkResult};
pub use events::ServiceEvent;
pub use heartbeat::HeartbeatMonitor;
pub use ingest::{AudioIngest, StagedAsset};
pub use protocol::{
    AssetMetadata, ConnectionStatus, SyncRequest, SyncResponse, TranscriptionResult,
    HEARTBEAT_ACK, HEARTBEAT_PROBE, TOPIC_AUDIO, TOPIC_CONNECTION, TOPIC_HEARTBEAT, TOPIC_RESULT,
    TOPIC_SYNC_REQUEST, TOPIC_SYNC_RESPONSE, UNKNOWN_REQUEST_ID,
};
pub use router::MessageRouter;
pub use service::WhisperLink;
pub use sync::{NoteSource, SyncCoordinator};
pub use transcribe::{TranscriptionDispatcher, TranscriptionEngine};
pub use transport::{
    AssetReader, AssetTransfer, Inbound, LoopbackHub, LoopbackTransport, Transport,
};
pub use types::{now_ms, NodeId, NoteRecord, PeerNode};
