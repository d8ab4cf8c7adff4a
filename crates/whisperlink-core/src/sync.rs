//! Incremental note sync between peers
//!
//! One coordinator plays both sides of the exchange. As responder it answers
//! inbound `sync_request` messages with the notes strictly newer than the
//! requester's watermark. As requester it sends a `sync_request`, parks the
//! correlation id in a [`ResponseCorrelator`], and waits for the matching
//! `sync_response` to come back.
//!
//! The watermark filter is strict: a note whose timestamp equals
//! `lastSyncTimestamp` was part of the previous sync and is not sent again.
//! Repeating a request with the same watermark therefore returns the same
//! records until new notes land, which is what lets peers retry freely.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::correlator::ResponseCorrelator;
use crate::error::LinkResult;
use crate::events::ServiceEvent;
use crate::protocol::{
    SyncRequest, SyncResponse, TOPIC_SYNC_REQUEST, TOPIC_SYNC_RESPONSE, UNKNOWN_REQUEST_ID,
};
use crate::transport::Transport;
use crate::types::{now_ms, NodeId, NoteRecord};

/// Note storage collaborator
///
/// The embedding application owns note persistence; the coordinator only
/// ever asks for the full current set and filters by watermark itself.
#[async_trait]
pub trait NoteSource: Send + Sync {
    /// All notes currently stored, in source order
    async fn list_notes(&self) -> LinkResult<Vec<NoteRecord>>;
}

/// Serves inbound sync requests and issues outbound ones
pub struct SyncCoordinator {
    transport: Arc<dyn Transport>,
    notes: Arc<dyn NoteSource>,
    pending: ResponseCorrelator<SyncResponse>,
    event_tx: broadcast::Sender<ServiceEvent>,
}

impl SyncCoordinator {
    /// Create a coordinator over the given transport and note source
    pub fn new(
        transport: Arc<dyn Transport>,
        notes: Arc<dyn NoteSource>,
        event_tx: broadcast::Sender<ServiceEvent>,
    ) -> Self {
        Self {
            transport,
            notes,
            pending: ResponseCorrelator::new(),
            event_tx,
        }
    }

    /// Answer one inbound `sync_request` message
    ///
    /// Every request gets a reply, decodable or not: the requester is
    /// blocked awaiting one, and silence would leave it to time out over
    /// what is really a malformed payload. An undecodable request carries
    /// no usable correlation id, so the failure reply goes out under
    /// [`UNKNOWN_REQUEST_ID`].
    pub async fn handle_request(&self, payload: Bytes, from: NodeId) -> LinkResult<()> {
        let response = match SyncRequest::decode(&payload) {
            Ok(request) => self.build_response(&request).await,
            Err(e) => {
                warn!(%from, error = %e, "undecodable sync request");
                SyncResponse::failure(UNKNOWN_REQUEST_ID, "parse error", now_ms())
            }
        };

        let records = response.records.len();
        let success = response.success;
        let payload = Bytes::from(response.encode()?);
        self.transport
            .send(&from, TOPIC_SYNC_RESPONSE, payload)
            .await?;

        let _ = self.event_tx.send(ServiceEvent::SyncServed {
            to: from,
            records,
            success,
        });
        Ok(())
    }

    async fn build_response(&self, request: &SyncRequest) -> SyncResponse {
        match self.notes.list_notes().await {
            Ok(notes) => {
                let total = notes.len();
                let records: Vec<NoteRecord> = notes
                    .into_iter()
                    .filter(|note| note.timestamp > request.last_sync_timestamp)
                    .collect();
                debug!(
                    request_id = %request.request_id,
                    after = request.last_sync_timestamp,
                    total,
                    matched = records.len(),
                    "sync request served"
                );
                SyncResponse::ok(&request.request_id, records, now_ms())
            }
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "note source failed");
                SyncResponse::failure(&request.request_id, e.to_string(), now_ms())
            }
        }
    }

    /// Ask a peer for every note strictly newer than `last_sync_timestamp`
    ///
    /// Returns the peer's response, which may itself report failure via
    /// `success: false`. Errors from this method are local: the send
    /// failed, or no response arrived before `timeout`.
    pub async fn request_sync(
        &self,
        peer: &NodeId,
        last_sync_timestamp: i64,
        timeout: Duration,
    ) -> LinkResult<SyncResponse> {
        let request = SyncRequest::new(last_sync_timestamp);
        let payload = Bytes::from(request.encode()?);
        let reply = self.pending.register(&request.request_id, timeout);

        debug!(
            %peer,
            request_id = %request.request_id,
            after = last_sync_timestamp,
            "requesting sync"
        );
        if let Err(e) = self.transport.send(peer, TOPIC_SYNC_REQUEST, payload).await {
            // Nothing will ever resolve this entry; fail now rather than
            // sitting out the timeout.
            reply.cancel();
            return Err(e);
        }
        reply.wait().await
    }

    /// Resolve an inbound `sync_response` into its pending request
    ///
    /// Responses that match nothing (late arrivals, replies to a requester
    /// that already gave up) are logged and dropped.
    pub async fn complete(&self, payload: Bytes, from: NodeId) -> LinkResult<()> {
        let response = SyncResponse::decode(&payload)?;
        let request_id = response.request_id.clone();
        if !self.pending.resolve(&request_id, response) {
            debug!(%from, %request_id, "sync response matched no pending request");
        }
        Ok(())
    }

    /// Drop pending requests whose awaiter is gone
    pub fn sweep_pending(&self) -> usize {
        self.pending.sweep_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::protocol::TOPIC_SYNC_REQUEST;
    use crate::transport::{Inbound, LoopbackHub};
    use parking_lot::Mutex;

    struct ScriptedNotes {
        notes: Mutex<Vec<NoteRecord>>,
        failure: Option<String>,
    }

    impl ScriptedNotes {
        fn with_notes(notes: Vec<NoteRecord>) -> Arc<Self> {
            Arc::new(Self {
                notes: Mutex::new(notes),
                failure: None,
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                notes: Mutex::new(Vec::new()),
                failure: Some(message.to_string()),
            })
        }
    }

    #[async_trait]
    impl NoteSource for ScriptedNotes {
        async fn list_notes(&self) -> LinkResult<Vec<NoteRecord>> {
            match &self.failure {
                Some(message) => Err(LinkError::NoteSource(message.clone())),
                None => Ok(self.notes.lock().clone()),
            }
        }
    }

    fn sample_notes() -> Vec<NoteRecord> {
        vec![
            NoteRecord::new("n1", "oldest", 500),
            NoteRecord::new("n2", "at watermark", 1000),
            NoteRecord::new("n3", "newer", 1500),
            NoteRecord::new("n4", "newest", 2000),
        ]
    }

    fn coordinator_on(
        hub: &LoopbackHub,
        node: &str,
        notes: Arc<dyn NoteSource>,
    ) -> (SyncCoordinator, tokio::sync::mpsc::UnboundedReceiver<Inbound>) {
        let (transport, rx) = hub.join(node, node);
        let (event_tx, _) = broadcast::channel(16);
        (
            SyncCoordinator::new(Arc::new(transport), notes, event_tx),
            rx,
        )
    }

    async fn next_response(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Inbound>) -> SyncResponse {
        match rx.recv().await.unwrap() {
            Inbound::Message { topic, payload, .. } => {
                assert_eq!(topic, TOPIC_SYNC_RESPONSE);
                SyncResponse::decode(&payload).unwrap()
            }
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_request_filters_strictly_after_watermark() {
        let hub = LoopbackHub::new();
        let (responder, _rx) = coordinator_on(&hub, "phone", ScriptedNotes::with_notes(sample_notes()));
        let (_requester, mut requester_rx) = hub.join("watch", "watch");

        let request = SyncRequest {
            request_id: "r1".to_string(),
            last_sync_timestamp: 1000,
        };
        responder
            .handle_request(Bytes::from(request.encode().unwrap()), NodeId::new("watch"))
            .await
            .unwrap();

        let response = next_response(&mut requester_rx).await;
        assert!(response.success);
        assert_eq!(response.request_id, "r1");
        let ids: Vec<&str> = response.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["n3", "n4"]);
    }

    #[tokio::test]
    async fn test_handle_request_watermark_at_newest_yields_empty() {
        let hub = LoopbackHub::new();
        let (responder, _rx) = coordinator_on(&hub, "phone", ScriptedNotes::with_notes(sample_notes()));
        let (_requester, mut requester_rx) = hub.join("watch", "watch");

        let request = SyncRequest {
            request_id: "r2".to_string(),
            last_sync_timestamp: 2000,
        };
        responder
            .handle_request(Bytes::from(request.encode().unwrap()), NodeId::new("watch"))
            .await
            .unwrap();

        let response = next_response(&mut requester_rx).await;
        assert!(response.success);
        assert!(response.records.is_empty());
        assert_eq!(response.request_id, "r2");
    }

    #[tokio::test]
    async fn test_undecodable_request_gets_failure_reply() {
        let hub = LoopbackHub::new();
        let (responder, _rx) = coordinator_on(&hub, "phone", ScriptedNotes::with_notes(sample_notes()));
        let (_requester, mut requester_rx) = hub.join("watch", "watch");

        responder
            .handle_request(Bytes::from_static(b"not json at all"), NodeId::new("watch"))
            .await
            .unwrap();

        let response = next_response(&mut requester_rx).await;
        assert!(!response.success);
        assert_eq!(response.request_id, UNKNOWN_REQUEST_ID);
        assert!(response.records.is_empty());
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn test_note_source_failure_echoes_request_id() {
        let hub = LoopbackHub::new();
        let (responder, _rx) = coordinator_on(&hub, "phone", ScriptedNotes::failing("store offline"));
        let (_requester, mut requester_rx) = hub.join("watch", "watch");

        let request = SyncRequest {
            request_id: "r3".to_string(),
            last_sync_timestamp: 0,
        };
        responder
            .handle_request(Bytes::from(request.encode().unwrap()), NodeId::new("watch"))
            .await
            .unwrap();

        let response = next_response(&mut requester_rx).await;
        assert!(!response.success);
        assert_eq!(response.request_id, "r3");
        assert!(response.records.is_empty());
        assert!(response.error.as_deref().unwrap().contains("store offline"));
    }

    #[tokio::test]
    async fn test_request_sync_round_trip() {
        let hub = LoopbackHub::new();
        let (responder, mut responder_rx) =
            coordinator_on(&hub, "phone", ScriptedNotes::with_notes(sample_notes()));
        let (requester, mut requester_rx) =
            coordinator_on(&hub, "watch", ScriptedNotes::with_notes(Vec::new()));

        // Pump both ends by hand; the service normally does this.
        tokio::spawn(async move {
            while let Some(Inbound::Message { topic, payload, from }) = responder_rx.recv().await {
                assert_eq!(topic, TOPIC_SYNC_REQUEST);
                responder.handle_request(payload, from).await.unwrap();
            }
        });
        let completer = Arc::new(requester);
        let pump = completer.clone();
        tokio::spawn(async move {
            while let Some(Inbound::Message { payload, from, .. }) = requester_rx.recv().await {
                pump.complete(payload, from).await.unwrap();
            }
        });

        let response = completer
            .request_sync(&NodeId::new("phone"), 1000, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.records.len(), 2);
        assert_eq!(completer.sweep_pending(), 0);
    }

    #[tokio::test]
    async fn test_request_sync_to_unreachable_peer_fails_fast() {
        let hub = LoopbackHub::new();
        let (requester, _rx) = coordinator_on(&hub, "watch", ScriptedNotes::with_notes(Vec::new()));

        let err = requester
            .request_sync(&NodeId::new("ghost"), 0, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Transport(_)));
        // The pending entry was withdrawn, not left for the sweep
        assert_eq!(requester.sweep_pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_sync_times_out_without_reply() {
        let hub = LoopbackHub::new();
        let (requester, _requester_rx) =
            coordinator_on(&hub, "watch", ScriptedNotes::with_notes(Vec::new()));
        // Peer exists but never answers
        let (_silent, _silent_rx) = hub.join("phone", "phone");

        let err = requester
            .request_sync(&NodeId::new("phone"), 0, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_unsolicited_response_is_dropped() {
        let hub = LoopbackHub::new();
        let (requester, _rx) = coordinator_on(&hub, "watch", ScriptedNotes::with_notes(Vec::new()));

        let stray = SyncResponse::ok("nobody-asked", Vec::new(), now_ms());
        requester
            .complete(Bytes::from(stray.encode().unwrap()), NodeId::new("phone"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_served_event_emitted() {
        let hub = LoopbackHub::new();
        let (transport, _rx) = hub.join("phone", "phone");
        let (_requester, _requester_rx) = hub.join("watch", "watch");
        let (event_tx, mut events) = broadcast::channel(16);
        let responder = SyncCoordinator::new(
            Arc::new(transport),
            ScriptedNotes::with_notes(sample_notes()),
            event_tx,
        );

        let request = SyncRequest {
            request_id: "r4".to_string(),
            last_sync_timestamp: 0,
        };
        responder
            .handle_request(Bytes::from(request.encode().unwrap()), NodeId::new("watch"))
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            ServiceEvent::SyncServed { to, records, success } => {
                assert_eq!(to, NodeId::new("watch"));
                assert_eq!(records, 4);
                assert!(success);
            }
            other => panic!("unexpected event: {}", other),
        }
    }
}
