//! Wire protocol between the primary and companion devices
//!
//! Payloads are JSON on a fixed set of topics. The field names are the
//! shared contract with peers already in the field, so they stay camelCase
//! on the wire regardless of how the Rust structs are named.
//!
//! ## Message Flow
//!
//! ```text
//! Companion                        Primary
//!    |                               |
//!    |-- sync_request {after: t} --->|
//!    |<- sync_response {records} ----|
//!    |                               |
//!    |-- audio asset {recordId} ---->|
//!    |        (stage, validate,      |
//!    |         transcribe)           |
//!    |<- result {recordId, text} ----|
//!    |                               |
//!    |-- heartbeat "ping" ---------->|
//!    |<- heartbeat "ack" ------------|
//! ```
//!
//! Decoding is tolerant by policy: unknown fields are ignored and absent
//! optional fields take documented defaults, so records written by older
//! peers still decode. Required fields (`requestId`, `recordId`, note
//! `id`/`text`/`timestamp`) fail the decode when absent.

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, LinkResult};
use crate::types::NoteRecord;

/// Topic for incremental sync requests (companion -> primary)
pub const TOPIC_SYNC_REQUEST: &str = "/whisper/sync_request";

/// Topic for sync responses (primary -> companion)
pub const TOPIC_SYNC_RESPONSE: &str = "/whisper/sync_response";

/// Topic identifying audio asset transfers (companion -> primary)
pub const TOPIC_AUDIO: &str = "/whisper/audio";

/// Topic for transcription results (primary -> companion)
pub const TOPIC_RESULT: &str = "/whisper/result";

/// Topic for liveness probes (either direction)
pub const TOPIC_HEARTBEAT: &str = "/whisper/heartbeat";

/// Topic for best-effort connection status notifications (either direction)
pub const TOPIC_CONNECTION: &str = "/whisper/connection";

/// Fixed acknowledgment payload for answered heartbeats
pub const HEARTBEAT_ACK: &[u8] = b"ack";

/// Payload carried by an outbound liveness probe
pub const HEARTBEAT_PROBE: &[u8] = b"ping";

/// Placeholder correlation id used when a request could not be decoded
pub const UNKNOWN_REQUEST_ID: &str = "unknown";

/// Request for all notes newer than a watermark timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Correlation id, unique per request, echoed in the response
    #[serde(rename = "requestId")]
    pub request_id: String,
    /// Watermark: only notes strictly newer than this are wanted
    #[serde(rename = "lastSyncTimestamp", default)]
    pub last_sync_timestamp: i64,
}

impl SyncRequest {
    /// Create a sync request with a fresh ULID correlation id
    pub fn new(last_sync_timestamp: i64) -> Self {
        Self {
            request_id: ulid::Ulid::new().to_string(),
            last_sync_timestamp,
        }
    }

    /// Encode to JSON bytes
    pub fn encode(&self) -> LinkResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| LinkError::Serialization(e.to_string()))
    }

    /// Decode from JSON bytes
    pub fn decode(data: &[u8]) -> LinkResult<Self> {
        serde_json::from_slice(data).map_err(|e| LinkError::Serialization(e.to_string()))
    }
}

/// Reply to a [`SyncRequest`]
///
/// Invariant: every record satisfies `timestamp > request.last_sync_timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Whether the notes were retrieved and filtered successfully
    pub success: bool,
    /// Filtered records, in note-source order
    #[serde(default)]
    pub records: Vec<NoteRecord>,
    /// Response generation time in milliseconds
    pub timestamp: i64,
    /// Echo of the request's correlation id
    #[serde(rename = "requestId")]
    pub request_id: String,
    /// Failure description when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResponse {
    /// Build a successful response carrying the filtered records
    pub fn ok(request_id: impl Into<String>, records: Vec<NoteRecord>, timestamp: i64) -> Self {
        Self {
            success: true,
            records,
            timestamp,
            request_id: request_id.into(),
            error: None,
        }
    }

    /// Build a failure response with no records
    pub fn failure(request_id: impl Into<String>, error: impl Into<String>, timestamp: i64) -> Self {
        Self {
            success: false,
            records: Vec::new(),
            timestamp,
            request_id: request_id.into(),
            error: Some(error.into()),
        }
    }

    /// Encode to JSON bytes
    pub fn encode(&self) -> LinkResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| LinkError::Serialization(e.to_string()))
    }

    /// Decode from JSON bytes
    pub fn decode(data: &[u8]) -> LinkResult<Self> {
        serde_json::from_slice(data).map_err(|e| LinkError::Serialization(e.to_string()))
    }
}

/// Terminal outcome of one audio ingest, broadcast to all peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Whether transcription produced text
    pub success: bool,
    /// Transcribed text, trimmed; empty on failure
    #[serde(default)]
    pub text: String,
    /// Result generation time in milliseconds
    pub timestamp: i64,
    /// The record id the source asset was keyed by
    #[serde(rename = "recordId")]
    pub record_id: String,
    /// Failure description when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranscriptionResult {
    /// Build a successful result
    pub fn ok(record_id: impl Into<String>, text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            success: true,
            text: text.into(),
            timestamp,
            record_id: record_id.into(),
            error: None,
        }
    }

    /// Build a failure result
    pub fn failure(record_id: impl Into<String>, error: impl Into<String>, timestamp: i64) -> Self {
        Self {
            success: false,
            text: String::new(),
            timestamp,
            record_id: record_id.into(),
            error: Some(error.into()),
        }
    }

    /// Encode to JSON bytes
    pub fn encode(&self) -> LinkResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| LinkError::Serialization(e.to_string()))
    }

    /// Decode from JSON bytes
    pub fn decode(data: &[u8]) -> LinkResult<Self> {
        serde_json::from_slice(data).map_err(|e| LinkError::Serialization(e.to_string()))
    }
}

/// Best-effort connection status notification
///
/// Observability only; nothing in the protocol depends on receiving these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Whether the announcing device considers the link up
    #[serde(rename = "isConnected")]
    pub is_connected: bool,
    /// Announcing device's human-readable name
    #[serde(rename = "deviceName", default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// When the announcing device last saw the link up, in milliseconds
    #[serde(rename = "lastConnectedTime", default, skip_serializing_if = "Option::is_none")]
    pub last_connected_time: Option<i64>,
}

impl ConnectionStatus {
    /// Status for a device that considers the link up right now
    pub fn connected(device_name: impl Into<String>, now_ms: i64) -> Self {
        Self {
            is_connected: true,
            device_name: Some(device_name.into()),
            last_connected_time: Some(now_ms),
        }
    }

    /// Encode to JSON bytes
    pub fn encode(&self) -> LinkResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| LinkError::Serialization(e.to_string()))
    }

    /// Decode from JSON bytes
    pub fn decode(data: &[u8]) -> LinkResult<Self> {
        serde_json::from_slice(data).map_err(|e| LinkError::Serialization(e.to_string()))
    }
}

/// Metadata map accompanying a binary audio asset
///
/// These keys are snake_case on the wire, unlike the JSON message bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    /// Record id the asset belongs to; keys the staging file name
    pub record_id: String,
    /// Sender-side file name, informational only
    pub file_name: String,
    /// Sender-side capture time in milliseconds
    pub timestamp: i64,
}

impl AssetMetadata {
    /// Create asset metadata
    pub fn new(record_id: impl Into<String>, file_name: impl Into<String>, timestamp: i64) -> Self {
        Self {
            record_id: record_id.into(),
            file_name: file_name.into(),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_strings_are_fixed() {
        assert_eq!(TOPIC_SYNC_REQUEST, "/whisper/sync_request");
        assert_eq!(TOPIC_SYNC_RESPONSE, "/whisper/sync_response");
        assert_eq!(TOPIC_AUDIO, "/whisper/audio");
        assert_eq!(TOPIC_RESULT, "/whisper/result");
        assert_eq!(TOPIC_HEARTBEAT, "/whisper/heartbeat");
        assert_eq!(TOPIC_CONNECTION, "/whisper/connection");
    }

    #[test]
    fn test_heartbeat_payloads_are_distinct() {
        // An ack that looked like a probe would bounce between two nodes
        // forever.
        assert_ne!(HEARTBEAT_ACK, HEARTBEAT_PROBE);
    }

    #[test]
    fn test_sync_request_wire_names() {
        let req = SyncRequest {
            request_id: "r1".to_string(),
            last_sync_timestamp: 1000,
        };
        let json: serde_json::Value = serde_json::from_slice(&req.encode().unwrap()).unwrap();
        assert_eq!(json["requestId"], "r1");
        assert_eq!(json["lastSyncTimestamp"], 1000);
    }

    #[test]
    fn test_sync_request_unique_ids() {
        let a = SyncRequest::new(0);
        let b = SyncRequest::new(0);
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_sync_request_decode_defaults_watermark() {
        let req = SyncRequest::decode(br#"{"requestId":"r1"}"#).unwrap();
        assert_eq!(req.last_sync_timestamp, 0);
    }

    #[test]
    fn test_sync_request_decode_requires_request_id() {
        assert!(SyncRequest::decode(br#"{"lastSyncTimestamp":5}"#).is_err());
    }

    #[test]
    fn test_sync_response_roundtrip() {
        let resp = SyncResponse::ok("r1", vec![NoteRecord::new("n1", "hello", 1500)], 2000);
        let decoded = SyncResponse::decode(&resp.encode().unwrap()).unwrap();
        assert!(decoded.success);
        assert_eq!(decoded.request_id, "r1");
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].text, "hello");
        assert!(decoded.error.is_none());
    }

    #[test]
    fn test_sync_response_failure_has_no_records() {
        let resp = SyncResponse::failure("r2", "store offline", 2000);
        assert!(!resp.success);
        assert!(resp.records.is_empty());
        assert_eq!(resp.error.as_deref(), Some("store offline"));
    }

    #[test]
    fn test_sync_response_omits_absent_error() {
        let resp = SyncResponse::ok("r1", vec![], 2000);
        let json: serde_json::Value = serde_json::from_slice(&resp.encode().unwrap()).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["requestId"], "r1");
    }

    #[test]
    fn test_transcription_result_trims_nothing_itself() {
        // Trimming is the dispatcher's job; the message carries text verbatim
        let result = TranscriptionResult::ok("rec1", "  spaced  ", 100);
        let decoded = TranscriptionResult::decode(&result.encode().unwrap()).unwrap();
        assert_eq!(decoded.text, "  spaced  ");
        assert_eq!(decoded.record_id, "rec1");
    }

    #[test]
    fn test_transcription_result_failure_wire_names() {
        let result = TranscriptionResult::failure("rec1", "invalid audio", 100);
        let json: serde_json::Value = serde_json::from_slice(&result.encode().unwrap()).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["recordId"], "rec1");
        assert_eq!(json["error"], "invalid audio");
        assert_eq!(json["text"], "");
    }

    #[test]
    fn test_connection_status_roundtrip() {
        let status = ConnectionStatus::connected("pixel-9", 12345);
        let decoded = ConnectionStatus::decode(&status.encode().unwrap()).unwrap();
        assert!(decoded.is_connected);
        assert_eq!(decoded.device_name.as_deref(), Some("pixel-9"));
        assert_eq!(decoded.last_connected_time, Some(12345));
    }

    #[test]
    fn test_connection_status_decode_minimal() {
        let decoded = ConnectionStatus::decode(br#"{"isConnected":false}"#).unwrap();
        assert!(!decoded.is_connected);
        assert!(decoded.device_name.is_none());
        assert!(decoded.last_connected_time.is_none());
    }

    #[test]
    fn test_asset_metadata_wire_names() {
        let meta = AssetMetadata::new("rec1", "note.wav", 500);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["record_id"], "rec1");
        assert_eq!(json["file_name"], "note.wav");
        assert_eq!(json["timestamp"], 500);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(SyncRequest::decode(b"not json").is_err());
        assert!(SyncResponse::decode(b"{broken").is_err());
        assert!(TranscriptionResult::decode(b"").is_err());
    }
}
