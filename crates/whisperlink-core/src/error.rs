//! Error types for WhisperLink

use thiserror::Error;

/// Main error type for WhisperLink operations
#[derive(Error, Debug)]
pub enum LinkError {
    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Note source collaborator failed to retrieve notes
    #[error("Note source error: {0}")]
    NoteSource(String),

    /// Transcription engine returned an error
    #[error("Transcription engine error: {0}")]
    Engine(String),

    /// Transcription engine has not been initialized yet
    #[error("Transcription engine not available")]
    EngineUnavailable,

    /// Transport-level send or peer lookup failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Pending operation deadline expired before a reply arrived
    #[error("Timed out waiting for reply to {0}")]
    Timeout(String),

    /// Pending operation slot was dropped or superseded
    #[error("Correlation error: {0}")]
    Correlation(String),

    /// Audio payload failed validation
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Whether this error means an audio payload was rejected before dispatch.
    pub fn is_rejection(&self) -> bool {
        matches!(self, LinkError::InvalidAudio(_))
    }
}

/// Result type alias using LinkError
pub type LinkResult<T> = Result<T, LinkError>;
