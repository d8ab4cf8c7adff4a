//! CLI Integration Tests
//!
//! These tests run the compiled binary end-to-end and verify the wiring
//! between the CLI and the core library.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use whisperlink_core::encode_pcm_wav;

// ============================================================================
// Test Utilities
// ============================================================================

fn cli_cmd() -> Command {
    Command::cargo_bin("whisperlink").expect("Failed to find whisperlink binary")
}

// ============================================================================
// Probe Command Tests
// ============================================================================

#[test]
fn test_probe_accepts_valid_wav() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("memo.wav");
    // One second at the expected rate
    std::fs::write(&file, encode_pcm_wav(16_000, 1, 16, &vec![0u8; 32_000])).unwrap();

    cli_cmd()
        .arg("probe")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("16000 Hz"))
        .stdout(predicate::str::contains("duration: 1000 ms"))
        .stdout(predicate::str::contains("verdict: accepted"));
}

#[test]
fn test_probe_rejects_garbage() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("noise.bin");
    std::fs::write(&file, b"definitely not audio").unwrap();

    cli_cmd()
        .arg("probe")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("unreadable"))
        .stdout(predicate::str::contains("verdict: rejected"));
}

#[test]
fn test_probe_rejects_overlong_audio() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("lecture.wav");
    // 61 seconds at a low sample rate: small on disk, over the duration cap
    std::fs::write(&file, encode_pcm_wav(1_000, 1, 16, &vec![0u8; 122_000])).unwrap();

    cli_cmd()
        .arg("probe")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("duration over"))
        .stdout(predicate::str::contains("verdict: rejected"));
}

#[test]
fn test_probe_missing_file_fails() {
    cli_cmd()
        .arg("probe")
        .arg("/nonexistent/never.wav")
        .assert()
        .failure();
}

// ============================================================================
// Sweep Command Tests
// ============================================================================

#[test]
fn test_sweep_removes_staged_files() {
    let dir = TempDir::new().unwrap();
    let staged = dir.path().join("whisper_audio_rec1.wav");
    let unrelated = dir.path().join("keep.txt");
    std::fs::write(&staged, b"junk").unwrap();
    std::fs::write(&unrelated, b"keep").unwrap();

    cli_cmd()
        .arg("--staging-dir")
        .arg(dir.path())
        .arg("sweep")
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 1 staged file(s)"));

    assert!(!staged.exists());
    assert!(unrelated.exists());
}

#[test]
fn test_sweep_missing_dir_reports_zero() {
    let dir = TempDir::new().unwrap();

    cli_cmd()
        .arg("--staging-dir")
        .arg(dir.path().join("never_created"))
        .arg("sweep")
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 0 staged file(s)"));
}

// ============================================================================
// Demo Command Tests
// ============================================================================

#[test]
fn test_demo_completes() {
    let dir = TempDir::new().unwrap();

    cli_cmd()
        .arg("--staging-dir")
        .arg(dir.path())
        .arg("demo")
        .assert()
        .success()
        .stdout(predicate::str::contains("heartbeat: phone acknowledged"))
        .stdout(predicate::str::contains("sync: 2 note(s)"))
        .stdout(predicate::str::contains("transcription: demo-rec-1"))
        .stdout(predicate::str::contains("rejection: demo-rec-2"));
}
