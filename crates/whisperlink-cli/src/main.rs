//! WhisperLink CLI
//!
//! Thin wrapper around whisperlink-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Run a scripted phone <-> watch exchange over the loopback transport
//! whisperlink demo
//!
//! # Inspect an audio file against the acceptance limits
//! whisperlink probe recording.wav
//!
//! # Remove leftover staged audio files
//! whisperlink sweep
//! whisperlink --staging-dir /tmp/whisperlink sweep
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};

use whisperlink_core::{
    encode_pcm_wav, probe_wav, AudioIngest, AudioLimits, LinkConfig, LinkResult, LoopbackHub,
    NodeId, NoteRecord, NoteSource, ServiceEvent, TranscriptionEngine, TranscriptionResult,
    WhisperLink, SAMPLE_RATE_HZ,
};

/// WhisperLink - companion-device note sync and transcription relay
#[derive(Parser)]
#[command(name = "whisperlink")]
#[command(version = "0.1.0")]
#[command(about = "WhisperLink - companion-device note sync and transcription relay")]
#[command(
    long_about = "Keeps a primary device and its companion in step: incremental note sync by watermark, audio push for transcription, and heartbeat liveness checks, all over a pluggable message transport."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Staging directory for audio payloads (default: cache dir)
    #[arg(short, long, global = true)]
    staging_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted phone <-> watch exchange over the loopback transport
    Demo,

    /// Inspect an audio file against the acceptance limits
    Probe {
        /// Path to the audio file
        file: PathBuf,
    },

    /// Remove leftover staged audio files from the staging directory
    Sweep,
}

// ============================================================================
// Demo Collaborators
// ============================================================================

/// Fixed note store backing the demo's primary device
struct DemoNotes(Vec<NoteRecord>);

impl DemoNotes {
    fn seeded() -> Self {
        Self(vec![
            NoteRecord::new("note-1", "Pick up dry cleaning", 500),
            NoteRecord::new("note-2", "Call the dentist", 1_000),
            NoteRecord::new("note-3", "Water the plants", 1_500).with_important(true),
            NoteRecord::new("note-4", "Buy oat milk", 2_000),
        ])
    }

    fn empty() -> Self {
        Self(Vec::new())
    }
}

#[async_trait]
impl NoteSource for DemoNotes {
    async fn list_notes(&self) -> LinkResult<Vec<NoteRecord>> {
        Ok(self.0.clone())
    }
}

/// Engine that fakes a transcript from the staged file
struct DemoEngine;

#[async_trait]
impl TranscriptionEngine for DemoEngine {
    async fn transcribe(&self, path: &Path) -> LinkResult<String> {
        let len = tokio::fs::metadata(path).await?.len();
        Ok(format!("(demo transcript of {} staged bytes)", len))
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn run_demo(staging_dir: &Path) -> Result<()> {
    let hub = LoopbackHub::new();

    // Primary: holds the notes and the engine
    let (phone_transport, phone_inbound) = hub.join("phone", "Phone");
    let phone = WhisperLink::start(
        LinkConfig::default()
            .with_device_name("phone")
            .with_staging_dir(staging_dir.join("phone")),
        Arc::new(phone_transport),
        phone_inbound,
        Arc::new(DemoNotes::seeded()),
    )
    .await?;
    phone.set_engine(Arc::new(DemoEngine));

    // Companion: empty store, no engine of its own
    let (watch_transport, watch_inbound) = hub.join("watch", "Watch");
    let watch = WhisperLink::start(
        LinkConfig::default()
            .with_device_name("watch")
            .with_staging_dir(staging_dir.join("watch")),
        Arc::new(watch_transport),
        watch_inbound,
        Arc::new(DemoNotes::empty()),
    )
    .await?;

    let phone_id = NodeId::new("phone");
    println!("whisperlink demo: phone <-> watch over loopback");
    println!();

    watch.probe(&phone_id).await?;
    println!("heartbeat: phone acknowledged");

    let delivered = watch.announce_connection(true).await?;
    println!("connection: announced to {} peer(s)", delivered);

    let response = watch.request_sync(&phone_id, 1_000).await?;
    println!(
        "sync: {} note(s) newer than watermark 1000",
        response.records.len()
    );
    for record in &response.records {
        println!(
            "  [{}]{} {}",
            record.timestamp,
            if record.important { " !" } else { "" },
            record.text
        );
    }

    let mut events = watch.subscribe();

    // Half a second of silence still exercises the full pipeline
    let wav = encode_pcm_wav(SAMPLE_RATE_HZ, 1, 16, &vec![0u8; 16_000]);
    watch
        .send_audio(&phone_id, "demo-rec-1", "memo.wav", wav)
        .await?;
    let result = wait_result(&mut events, "demo-rec-1").await?;
    if !result.success {
        bail!(
            "demo transcription failed: {}",
            result.error.unwrap_or_default()
        );
    }
    println!("transcription: {} -> \"{}\"", result.record_id, result.text);

    // Not audio at all; the primary rejects it and says so
    watch
        .send_audio(&phone_id, "demo-rec-2", "noise.bin", vec![9u8; 128])
        .await?;
    let rejected = wait_result(&mut events, "demo-rec-2").await?;
    println!(
        "rejection: {} -> {}",
        rejected.record_id,
        rejected.error.unwrap_or_default()
    );

    phone.shutdown();
    watch.shutdown();
    Ok(())
}

/// Wait for the transcription result for one record id
async fn wait_result(
    events: &mut tokio::sync::broadcast::Receiver<ServiceEvent>,
    record_id: &str,
) -> Result<TranscriptionResult> {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .context("timed out waiting for transcription result")??;
        if let ServiceEvent::ResultReceived { result, .. } = event {
            if result.record_id == record_id {
                return Ok(result);
            }
        }
    }
}

async fn run_probe(file: &Path) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let limits = AudioLimits::default();

    println!("{}: {} bytes", file.display(), bytes.len());

    let info = match probe_wav(&bytes) {
        Ok(info) => info,
        Err(e) => {
            println!("  unreadable: {}", e);
            println!("  verdict: rejected");
            return Ok(());
        }
    };

    println!(
        "  format: {} Hz, {} channel(s), {} bits",
        info.sample_rate, info.channels, info.bits_per_sample
    );
    println!("  duration: {} ms", info.duration_ms());

    let mut verdicts = Vec::new();
    if bytes.len() as u64 > limits.max_size_bytes {
        verdicts.push(format!(
            "size over the {} byte limit",
            limits.max_size_bytes
        ));
    }
    if info.duration_ms() > limits.max_duration_ms {
        verdicts.push(format!(
            "duration over the {} ms limit",
            limits.max_duration_ms
        ));
    }
    if info.sample_rate != limits.sample_rate_hz {
        println!(
            "  note: sample rate differs from the expected {} Hz (tolerated)",
            limits.sample_rate_hz
        );
    }

    if verdicts.is_empty() {
        println!("  verdict: accepted");
    } else {
        for verdict in &verdicts {
            println!("  {}", verdict);
        }
        println!("  verdict: rejected");
    }
    Ok(())
}

async fn run_sweep(dir: &Path) -> Result<()> {
    let removed = AudioIngest::sweep_dir(dir).await?;
    println!("removed {} staged file(s) from {}", removed, dir.display());
    Ok(())
}

// ============================================================================
// Wiring
// ============================================================================

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Default staging directory (<cache dir>/whisperlink)
fn default_staging_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("whisperlink")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let staging_dir = cli.staging_dir.unwrap_or_else(default_staging_dir);

    match cli.command {
        Commands::Demo => run_demo(&staging_dir).await,
        Commands::Probe { file } => run_probe(&file).await,
        Commands::Sweep => run_sweep(&staging_dir).await,
    }
}
