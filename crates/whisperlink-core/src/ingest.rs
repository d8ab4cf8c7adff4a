//! Audio ingest: staging, validation, and temp-file lifecycle
//!
//! One asset moves strictly through notified -> staged -> validated ->
//! dispatched, and every path out produces exactly one terminal
//! [`TranscriptionResult`](crate::protocol::TranscriptionResult) and removes
//! the staged file. Concurrent ingests for different record ids never touch
//! the same file; two ingests for the same record id race, and whichever
//! write validation observes wins.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::audio::probe_wav;
use crate::config::{AudioLimits, STAGING_EXTENSION, STAGING_PREFIX};
use crate::error::{LinkError, LinkResult};
use crate::events::ServiceEvent;
use crate::transcribe::TranscriptionDispatcher;
use crate::transport::AssetTransfer;
use crate::types::NodeId;

/// A fully received binary payload pending validation and dispatch
#[derive(Debug, Clone)]
pub struct StagedAsset {
    /// Record id the asset is keyed by
    pub record_id: String,
    /// Where the payload was staged
    pub local_path: PathBuf,
    /// Staged size in bytes
    pub size_bytes: u64,
    /// Duration decoded during validation, when known
    pub declared_duration_ms: Option<i64>,
}

/// Receives binary asset notifications and owns their temp-file lifecycle
pub struct AudioIngest {
    staging_dir: PathBuf,
    limits: AudioLimits,
    dispatcher: Arc<TranscriptionDispatcher>,
    event_tx: broadcast::Sender<ServiceEvent>,
}

impl AudioIngest {
    /// Create the pipeline; run [`sweep`](Self::sweep) before first use
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        limits: AudioLimits,
        dispatcher: Arc<TranscriptionDispatcher>,
        event_tx: broadcast::Sender<ServiceEvent>,
    ) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            limits,
            dispatcher,
            event_tx,
        }
    }

    /// Delete leftover staged files from a prior run
    pub async fn sweep(&self) -> LinkResult<usize> {
        Self::sweep_dir(&self.staging_dir).await
    }

    /// Delete files matching the staging naming convention under `dir`
    pub async fn sweep_dir(dir: &Path) -> LinkResult<usize> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let suffix = format!(".{}", STAGING_EXTENSION);
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(STAGING_PREFIX) || !name.ends_with(&suffix) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    debug!(file = name, "removed stale staged file");
                    removed += 1;
                }
                Err(e) => warn!(file = name, error = %e, "failed to remove stale staged file"),
            }
        }
        if removed > 0 {
            info!(removed, dir = %dir.display(), "staging sweep complete");
        }
        Ok(removed)
    }

    /// Deterministic staging path for a record id
    ///
    /// Path-hostile characters in the id are replaced so the file always
    /// lands inside the staging directory.
    pub fn staging_path(&self, record_id: &str) -> PathBuf {
        let safe: String = record_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.staging_dir
            .join(format!("{}{}.{}", STAGING_PREFIX, safe, STAGING_EXTENSION))
    }

    /// Run one asset through the full lifecycle
    ///
    /// Never returns an error to the dispatch loop: failures become failure
    /// results so the sender always hears back.
    pub async fn handle(&self, transfer: AssetTransfer, from: &NodeId) {
        let record_id = transfer.metadata.record_id.clone();
        let path = self.staging_path(&record_id);
        debug!(
            %from,
            record_id = %record_id,
            file = %transfer.metadata.file_name,
            "audio asset notified"
        );

        let result = match self.stage_and_validate(transfer, &path).await {
            Ok(staged) => self.dispatcher.dispatch(&staged).await,
            Err(e) => {
                warn!(record_id = %record_id, error = %e, "asset rejected before dispatch");
                let reason = if e.is_rejection() {
                    "invalid audio".to_string()
                } else {
                    e.to_string()
                };
                self.dispatcher.publish_rejection(&record_id, &reason).await
            }
        };

        // Cleanup runs on every outcome, success or failure
        Self::remove_staged(&path).await;

        let _ = self.event_tx.send(ServiceEvent::AssetCompleted {
            record_id,
            success: result.success,
        });
    }

    async fn stage_and_validate(
        &self,
        transfer: AssetTransfer,
        path: &Path,
    ) -> LinkResult<StagedAsset> {
        let mut staged = self.stage(transfer, path).await?;
        self.validate(&mut staged).await?;
        Ok(staged)
    }

    /// Pull the full byte stream into the staging file (last write wins)
    async fn stage(&self, transfer: AssetTransfer, path: &Path) -> LinkResult<StagedAsset> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;

        // Reading is bounded: one byte past the size limit is enough to
        // prove the payload oversized without spooling it all to disk.
        let mut limited = transfer.content.take(self.limits.max_size_bytes + 1);
        let mut file = tokio::fs::File::create(path).await?;
        let copied = tokio::io::copy(&mut limited, &mut file).await?;
        file.flush().await?;

        debug!(record_id = %transfer.metadata.record_id, bytes = copied, "asset staged");
        Ok(StagedAsset {
            record_id: transfer.metadata.record_id,
            local_path: path.to_path_buf(),
            size_bytes: copied,
            declared_duration_ms: None,
        })
    }

    /// Apply the acceptance checks, refreshing facts from the file itself
    ///
    /// The size and content are re-read from disk rather than trusted from
    /// the staging step, so a concurrent overwrite for the same record id
    /// is judged by what actually landed.
    async fn validate(&self, staged: &mut StagedAsset) -> LinkResult<()> {
        let meta = match tokio::fs::metadata(&staged.local_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(LinkError::InvalidAudio("staged file missing".to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        staged.size_bytes = meta.len();

        if staged.size_bytes == 0 {
            return Err(LinkError::InvalidAudio("empty payload".to_string()));
        }
        if staged.size_bytes > self.limits.max_size_bytes {
            return Err(LinkError::InvalidAudio(format!(
                "{} bytes exceeds the {} byte limit",
                staged.size_bytes, self.limits.max_size_bytes
            )));
        }

        let bytes = tokio::fs::read(&staged.local_path).await?;
        let info = probe_wav(&bytes)?;
        let duration_ms = info.duration_ms();
        staged.declared_duration_ms = Some(duration_ms);

        if duration_ms > self.limits.max_duration_ms {
            return Err(LinkError::InvalidAudio(format!(
                "{} ms exceeds the {} ms limit",
                duration_ms, self.limits.max_duration_ms
            )));
        }
        if info.sample_rate != self.limits.sample_rate_hz {
            // Tolerated: the engine resamples
            warn!(
                record_id = %staged.record_id,
                got = info.sample_rate,
                expected = self.limits.sample_rate_hz,
                "sample rate mismatch"
            );
        }

        debug!(
            record_id = %staged.record_id,
            bytes = staged.size_bytes,
            duration_ms,
            "asset validated"
        );
        Ok(())
    }

    async fn remove_staged(path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "staged file removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove staged file"),
        }
    }
}
