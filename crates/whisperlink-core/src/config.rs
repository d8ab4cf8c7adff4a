//! Protocol constants and service configuration
//!
//! The audio limits are a shared contract: both peers must agree on them or
//! the companion will push payloads the primary rejects. Everything else in
//! here is local tuning.

use std::path::PathBuf;
use std::time::Duration;

/// Expected audio sample rate in Hz (mismatches are logged, not rejected)
pub const SAMPLE_RATE_HZ: u32 = 16_000;

/// Maximum accepted audio duration in milliseconds (hard reject above)
pub const MAX_AUDIO_DURATION_MS: i64 = 60_000;

/// Maximum accepted audio payload size in bytes (hard reject above)
pub const MAX_AUDIO_SIZE_BYTES: u64 = 512_000;

/// File name prefix for staged audio payloads
pub const STAGING_PREFIX: &str = "whisper_audio_";

/// File name extension for staged audio payloads
pub const STAGING_EXTENSION: &str = "wav";

/// Upper bound on transcription worker threads
const MAX_ENGINE_THREADS: usize = 8;

/// Validation limits for inbound audio payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioLimits {
    /// Expected sample rate (Hz)
    pub sample_rate_hz: u32,
    /// Maximum decoded duration (ms)
    pub max_duration_ms: i64,
    /// Maximum payload size (bytes)
    pub max_size_bytes: u64,
}

impl Default for AudioLimits {
    fn default() -> Self {
        Self {
            sample_rate_hz: SAMPLE_RATE_HZ,
            max_duration_ms: MAX_AUDIO_DURATION_MS,
            max_size_bytes: MAX_AUDIO_SIZE_BYTES,
        }
    }
}

/// Service-level configuration
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Directory where inbound audio payloads are staged
    pub staging_dir: PathBuf,
    /// Audio validation limits
    pub audio: AudioLimits,
    /// How long a sync requester waits for the correlated response
    pub sync_timeout: Duration,
    /// How long a heartbeat probe waits for the acknowledgment
    pub probe_timeout: Duration,
    /// Interval between sweeps of expired pending operations
    pub sweep_interval: Duration,
    /// Human-readable name announced on the connection topic
    pub device_name: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            staging_dir: std::env::temp_dir().join("whisperlink"),
            audio: AudioLimits::default(),
            sync_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(5),
            device_name: "whisperlink".to_string(),
        }
    }
}

impl LinkConfig {
    /// Override the staging directory
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Override the announced device name
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }
}

/// Engine-side transcription settings
///
/// Handed to engine implementations by the embedding application. Not part
/// of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Transcription language code
    pub language: String,
    /// Worker threads for inference
    pub threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            language: "zh-TW".to_string(),
            threads: optimal_thread_count(),
        }
    }
}

/// Worker thread count clamped to what inference gains from
pub fn optimal_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_ENGINE_THREADS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_match_protocol_constants() {
        let limits = AudioLimits::default();
        assert_eq!(limits.sample_rate_hz, 16_000);
        assert_eq!(limits.max_duration_ms, 60_000);
        assert_eq!(limits.max_size_bytes, 512_000);
    }

    #[test]
    fn test_optimal_thread_count_bounded() {
        let threads = optimal_thread_count();
        assert!(threads >= 1);
        assert!(threads <= MAX_ENGINE_THREADS);
    }

    #[test]
    fn test_config_builders() {
        let config = LinkConfig::default()
            .with_staging_dir("/tmp/stage")
            .with_device_name("watch");
        assert_eq!(config.staging_dir, PathBuf::from("/tmp/stage"));
        assert_eq!(config.device_name, "watch");
    }
}
