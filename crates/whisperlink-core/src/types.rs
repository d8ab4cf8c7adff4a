//! Core types for WhisperLink

use serde::{Deserialize, Serialize};

/// Opaque identifier for a reachable peer device
///
/// Assigned by the transport layer; the core never interprets its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    /// Create a NodeId from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Read-only view of a connected peer
///
/// Sourced from the transport on demand; never cached beyond a single
/// operation, since the set of reachable peers changes between calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerNode {
    /// Transport-assigned identifier
    pub node_id: NodeId,
    /// Human-readable device name
    pub display_name: String,
}

impl PeerNode {
    /// Create a new peer view
    pub fn new(node_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            node_id: NodeId::new(node_id),
            display_name: display_name.into(),
        }
    }
}

/// A single note as observed during a sync exchange
///
/// Owned by the note source collaborator; the core reads and filters,
/// never mutates. Wire encoding uses the field names the original peers
/// agreed on (`isImportant`, `duration`, `isSynced`); decoding tolerates
/// records written by older peers that omitted the optional flags:
/// missing `isImportant` defaults to false, missing `duration` to 0, and
/// missing `isSynced` to true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteRecord {
    /// Unique identifier
    pub id: String,
    /// Note text content
    pub text: String,
    /// Creation time in milliseconds, monotonic per writer
    pub timestamp: i64,
    /// Whether the note is flagged important
    #[serde(rename = "isImportant", default)]
    pub important: bool,
    /// Source audio duration in milliseconds, 0 when unknown
    #[serde(rename = "duration", default)]
    pub duration_ms: i64,
    /// Whether this record has been reconciled before
    #[serde(rename = "isSynced", default = "default_synced")]
    pub synced: bool,
}

fn default_synced() -> bool {
    true
}

impl NoteRecord {
    /// Create a new note record
    pub fn new(id: impl Into<String>, text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            timestamp,
            important: false,
            duration_ms: 0,
            synced: true,
        }
    }

    /// Set the important flag
    pub fn with_important(mut self, important: bool) -> Self {
        self.important = important;
        self
    }

    /// Set the source audio duration
    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
