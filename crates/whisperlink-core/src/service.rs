//! Main WhisperLink service - the primary entry point
//!
//! WhisperLink wires the router, sync coordinator, audio ingest pipeline,
//! transcription dispatcher, and heartbeat monitor over one transport:
//! - Inbound deliveries are routed by topic, each in its own task
//! - Binary audio assets bypass the router straight into ingest
//! - Requester-side calls correlate their replies and time out locally
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use whisperlink_core::{LinkConfig, LoopbackHub, NodeId, WhisperLink};
//!
//! let hub = LoopbackHub::new();
//! let (transport, inbound) = hub.join("phone", "Phone");
//!
//! let service = WhisperLink::start(
//!     LinkConfig::default().with_device_name("Phone"),
//!     Arc::new(transport),
//!     inbound,
//!     notes,
//! ).await?;
//!
//! // Ask a peer for everything newer than our watermark
//! let response = service.request_sync(&NodeId::new("watch"), 1_000).await?;
//!
//! // Push a recording for transcription; the result comes back as an event
//! let mut events = service.subscribe();
//! service.send_audio(&NodeId::new("watch"), "rec-1", "memo.wav", wav).await?;
//! ```

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::LinkResult;
use crate::events::ServiceEvent;
use crate::heartbeat::HeartbeatMonitor;
use crate::ingest::AudioIngest;
use crate::protocol::{
    AssetMetadata, ConnectionStatus, SyncResponse, TranscriptionResult, TOPIC_CONNECTION,
    TOPIC_HEARTBEAT, TOPIC_RESULT, TOPIC_SYNC_REQUEST, TOPIC_SYNC_RESPONSE,
};
use crate::router::MessageRouter;
use crate::sync::{NoteSource, SyncCoordinator};
use crate::transcribe::{TranscriptionDispatcher, TranscriptionEngine};
use crate::transport::{Inbound, Transport};
use crate::types::{now_ms, NodeId, PeerNode};

/// Capacity of the service event channel; slow subscribers lose old events
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Running protocol service over one transport
pub struct WhisperLink {
    config: LinkConfig,
    transport: Arc<dyn Transport>,
    sync: Arc<SyncCoordinator>,
    heartbeat: Arc<HeartbeatMonitor>,
    dispatcher: Arc<TranscriptionDispatcher>,
    event_tx: broadcast::Sender<ServiceEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WhisperLink {
    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Start the service: sweep staging, wire the topics, spawn the loops
    ///
    /// The transcription engine is not part of startup; install it whenever
    /// it finishes loading via [`set_engine`](Self::set_engine). Until then
    /// inbound audio is answered with an engine-unavailable failure result.
    pub async fn start(
        config: LinkConfig,
        transport: Arc<dyn Transport>,
        inbound: mpsc::UnboundedReceiver<Inbound>,
        notes: Arc<dyn NoteSource>,
    ) -> LinkResult<Self> {
        info!(
            device = %config.device_name,
            staging = %config.staging_dir.display(),
            "starting whisperlink service"
        );

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let dispatcher = Arc::new(TranscriptionDispatcher::new(transport.clone()));
        let ingest = Arc::new(AudioIngest::new(
            &config.staging_dir,
            config.audio,
            dispatcher.clone(),
            event_tx.clone(),
        ));
        // Staged files from a previous run are orphans; clear them before
        // the first asset lands.
        let swept = ingest.sweep().await?;
        if swept > 0 {
            info!(swept, "removed stale staging files");
        }

        let sync = Arc::new(SyncCoordinator::new(
            transport.clone(),
            notes,
            event_tx.clone(),
        ));
        let heartbeat = Arc::new(HeartbeatMonitor::new(transport.clone(), event_tx.clone()));

        let router = Arc::new(Self::wire_router(&sync, &heartbeat, &event_tx));

        let mut tasks = Vec::new();
        tasks.push(Self::spawn_inbound_loop(inbound, router, ingest));
        tasks.push(Self::spawn_sweep_loop(&config, &sync, &heartbeat));

        Ok(Self {
            config,
            transport,
            sync,
            heartbeat,
            dispatcher,
            event_tx,
            tasks: Mutex::new(tasks),
        })
    }

    fn wire_router(
        sync: &Arc<SyncCoordinator>,
        heartbeat: &Arc<HeartbeatMonitor>,
        event_tx: &broadcast::Sender<ServiceEvent>,
    ) -> MessageRouter {
        let mut router = MessageRouter::new();

        let coordinator = sync.clone();
        router.register(TOPIC_SYNC_REQUEST, move |payload, from| {
            let coordinator = coordinator.clone();
            async move { coordinator.handle_request(payload, from).await }
        });

        let coordinator = sync.clone();
        router.register(TOPIC_SYNC_RESPONSE, move |payload, from| {
            let coordinator = coordinator.clone();
            async move { coordinator.complete(payload, from).await }
        });

        let monitor = heartbeat.clone();
        router.register(TOPIC_HEARTBEAT, move |payload, from| {
            let monitor = monitor.clone();
            async move { monitor.handle(payload, from).await }
        });

        let events = event_tx.clone();
        router.register(TOPIC_RESULT, move |payload, from| {
            let events = events.clone();
            async move {
                let result = TranscriptionResult::decode(&payload)?;
                info!(
                    %from,
                    record_id = %result.record_id,
                    success = result.success,
                    "transcription result received"
                );
                let _ = events.send(ServiceEvent::ResultReceived { from, result });
                Ok(())
            }
        });

        let events = event_tx.clone();
        router.register(TOPIC_CONNECTION, move |payload, from| {
            let events = events.clone();
            async move {
                let status = ConnectionStatus::decode(&payload)?;
                debug!(%from, connected = status.is_connected, "connection status received");
                let _ = events.send(ServiceEvent::ConnectionChanged { from, status });
                Ok(())
            }
        });

        router
    }

    /// Drain the inbound queue, spawning one task per delivery so a slow
    /// handler never holds up the queue behind it
    fn spawn_inbound_loop(
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
        router: Arc<MessageRouter>,
        ingest: Arc<AudioIngest>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(delivery) = inbound.recv().await {
                match delivery {
                    Inbound::Message { topic, payload, from } => {
                        let router = router.clone();
                        tokio::spawn(async move {
                            router.dispatch(&topic, payload, from).await;
                        });
                    }
                    Inbound::Asset { transfer, from } => {
                        let ingest = ingest.clone();
                        tokio::spawn(async move {
                            ingest.handle(transfer, &from).await;
                        });
                    }
                }
            }
            debug!("inbound queue closed");
        })
    }

    /// Periodically drop pending operations whose awaiter is gone
    fn spawn_sweep_loop(
        config: &LinkConfig,
        sync: &Arc<SyncCoordinator>,
        heartbeat: &Arc<HeartbeatMonitor>,
    ) -> JoinHandle<()> {
        let interval = config.sweep_interval;
        let sync = sync.clone();
        let heartbeat = heartbeat.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it, there is nothing
            // pending yet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let swept = sync.sweep_pending() + heartbeat.sweep_pending();
                if swept > 0 {
                    debug!(swept, "swept abandoned pending operations");
                }
            }
        })
    }

    /// Abort every task the service spawned
    ///
    /// An asset mid-ingest may leave its staging file behind; the next
    /// start's sweep removes it.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.is_empty() {
            return;
        }
        info!(device = %self.config.device_name, "shutting down whisperlink service");
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sync Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Ask a peer for every note strictly newer than `last_sync_timestamp`
    pub async fn request_sync(
        &self,
        peer: &NodeId,
        last_sync_timestamp: i64,
    ) -> LinkResult<SyncResponse> {
        self.sync
            .request_sync(peer, last_sync_timestamp, self.config.sync_timeout)
            .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Audio Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Push an audio payload to a peer for transcription
    ///
    /// Pure passthrough: validation happens on the receiving side, and the
    /// transcription result comes back later on the result topic as a
    /// [`ServiceEvent::ResultReceived`].
    pub async fn send_audio(
        &self,
        peer: &NodeId,
        record_id: &str,
        file_name: &str,
        content: impl Into<Bytes>,
    ) -> LinkResult<()> {
        let metadata = AssetMetadata::new(record_id, file_name, now_ms());
        let content = content.into();
        debug!(%peer, record_id, len = content.len(), "sending audio asset");
        self.transport.send_asset(peer, metadata, content).await
    }

    /// Install the transcription engine once it has finished loading
    pub fn set_engine(&self, engine: Arc<dyn TranscriptionEngine>) {
        self.dispatcher.set_engine(engine);
    }

    /// Whether a transcription engine is installed
    pub fn engine_available(&self) -> bool {
        self.dispatcher.engine_available()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Peer Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Probe a peer's liveness, waiting for its acknowledgment
    pub async fn probe(&self, peer: &NodeId) -> LinkResult<()> {
        self.heartbeat.probe(peer, self.config.probe_timeout).await
    }

    /// Announce our connection status to every reachable peer
    ///
    /// Best-effort: a failed delivery is logged and skipped. Returns how
    /// many peers the announcement reached.
    pub async fn announce_connection(&self, is_connected: bool) -> LinkResult<usize> {
        let status = ConnectionStatus {
            is_connected,
            device_name: Some(self.config.device_name.clone()),
            last_connected_time: Some(now_ms()),
        };
        let payload = Bytes::from(status.encode()?);

        let peers = self.transport.connected_peers().await?;
        let mut delivered = 0;
        for peer in &peers {
            match self
                .transport
                .send(&peer.node_id, TOPIC_CONNECTION, payload.clone())
                .await
            {
                Ok(()) => delivered += 1,
                Err(e) => warn!(to = %peer.node_id, error = %e, "connection announce failed"),
            }
        }
        debug!(delivered, total = peers.len(), "announced connection status");
        Ok(delivered)
    }

    /// Peers currently reachable through the transport
    pub async fn connected_peers(&self) -> LinkResult<Vec<PeerNode>> {
        self.transport.connected_peers().await
    }

    /// The device name announced on the connection topic
    pub fn device_name(&self) -> &str {
        &self.config.device_name
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Events
    // ═══════════════════════════════════════════════════════════════════════

    /// Subscribe to service events
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.event_tx.subscribe()
    }
}

impl Drop for WhisperLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}
