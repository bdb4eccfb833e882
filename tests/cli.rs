//! CLI integration tests for the keel binary.
//!
//! Each test uses an isolated temp directory for the store, ensuring tests
//! can run in parallel safely.

#![allow(deprecated)] // Command::cargo_bin deprecation only affects custom build dirs

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use keel::store::migrations::LATEST_SCHEMA_VERSION;
use predicates::prelude::*;
use serde_json::{Value, json};

struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    fn data_dir(&self) -> PathBuf {
        self.temp_dir.path().join("data")
    }

    fn data_dir_str(&self) -> String {
        self.data_dir().to_string_lossy().to_string()
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("keel").expect("failed to find binary");
        cmd.env("NO_COLOR", "1")
            .args(["--data-dir", &self.data_dir_str()]);
        cmd
    }

    fn open(&self) -> assert_cmd::assert::Assert {
        self.cmd().args(["open", "--json"]).assert()
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self.cmd().args(args).output().expect("failed to run command");
        assert!(
            output.status.success(),
            "command failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("failed to parse JSON")
    }

    fn status_json(&self) -> Value {
        self.json(&["status", "--json"])
    }

    /// Writes an identity service export and returns its path.
    fn write_snapshot(&self, snapshot: &Value) -> PathBuf {
        let file = self.temp_dir.child("snapshot.json");
        file.write_str(&snapshot.to_string())
            .expect("failed to write snapshot");
        file.path().to_path_buf()
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn snapshot() -> Value {
    json!({
        "owners": [{
            "identity": "01",
            "display_name": "Me",
            "contacts": [
                {"identity": "0a", "display_name": "Alice", "established_channel_count": 1},
                {"identity": "0b", "display_name": "Bob", "established_channel_count": 1},
                {"identity": "0c", "display_name": "Carol", "one_to_one": false}
            ],
            "groups_v1": [
                {"group_uid": "aa", "name": "Climbing", "members": ["0a", "0b"]}
            ]
        }]
    })
}

// ============================================================================
// Open Command Tests
// ============================================================================

#[test]
fn open_creates_store_and_key_file() {
    let ctx = TestContext::new();

    ctx.open().success();

    assert!(ctx.data_dir().join("app_database").exists());
    let key = std::fs::read_to_string(ctx.data_dir().join(".store_key"))
        .expect("failed to read key file");
    assert_eq!(key.trim().len(), 64);
}

#[test]
fn open_reports_latest_schema_version() {
    let ctx = TestContext::new();

    let output = ctx.json(&["open", "--json"]);

    assert_eq!(output["schema_version"], LATEST_SCHEMA_VERSION);
    assert!(output["outcome"].is_string());
    assert!(output["path"].as_str().unwrap().ends_with("app_database"));
}

#[test]
fn open_is_idempotent() {
    let ctx = TestContext::new();

    ctx.open().success();
    ctx.open().success();

    let key_before = std::fs::read(ctx.data_dir().join(".store_key")).unwrap();
    ctx.open().success();
    let key_after = std::fs::read(ctx.data_dir().join(".store_key")).unwrap();
    assert_eq!(key_before, key_after);
}

#[test]
fn open_prints_text_summary() {
    let ctx = TestContext::new();

    ctx.cmd()
        .arg("open")
        .assert()
        .success()
        .stdout(predicate::str::contains("Schema version: 9"));
}

// ============================================================================
// Status Command Tests
// ============================================================================

#[test]
fn status_requires_existing_store() {
    let ctx = TestContext::new();

    ctx.cmd()
        .args(["status", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Store not found"));
}

#[test]
fn status_counts_empty_store() {
    let ctx = TestContext::new();
    ctx.open().success();

    let status = ctx.status_json();
    assert_eq!(status["owned_identities"], 0);
    assert_eq!(status["messages"], 0);
}

// ============================================================================
// Reconcile Command Tests
// ============================================================================

#[test]
fn reconcile_applies_snapshot() {
    let ctx = TestContext::new();
    ctx.open().success();
    let snapshot = ctx.write_snapshot(&snapshot());

    let report = ctx.json(&["reconcile", "--snapshot", &path_str(&snapshot), "--json"]);
    assert_eq!(report["applied"]["contacts_inserted"], 3);
    assert_eq!(report["failures"].as_array().unwrap().len(), 0);

    let status = ctx.status_json();
    assert_eq!(status["owned_identities"], 1);
    assert_eq!(status["contacts"], 3);
    assert_eq!(status["groups_v1"], 1);
    // Alice, Bob and the group; Carol is not one-to-one.
    assert_eq!(status["discussions"], 3);
}

#[test]
fn reconcile_twice_applies_nothing() {
    let ctx = TestContext::new();
    ctx.open().success();
    let snapshot = ctx.write_snapshot(&snapshot());
    let snapshot = path_str(&snapshot);

    ctx.cmd()
        .args(["reconcile", "--snapshot", &snapshot])
        .assert()
        .success();
    ctx.cmd()
        .args(["reconcile", "--snapshot", &snapshot])
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied 0 changes"));
}

#[test]
fn reconcile_single_owner_leaves_others_alone() {
    let ctx = TestContext::new();
    ctx.open().success();
    let snapshot = ctx.write_snapshot(&snapshot());

    ctx.cmd()
        .args(["reconcile", "--snapshot", &path_str(&snapshot), "--owner", "02"])
        .assert()
        .success();

    assert_eq!(ctx.status_json()["contacts"], 0);
}

#[test]
fn reconcile_rejects_invalid_owner() {
    let ctx = TestContext::new();
    ctx.open().success();
    let snapshot = ctx.write_snapshot(&snapshot());

    ctx.cmd()
        .args(["reconcile", "--snapshot", &path_str(&snapshot), "--owner", "zz"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid owned identity"));
}

#[test]
fn reconcile_rejects_malformed_snapshot() {
    let ctx = TestContext::new();
    ctx.open().success();
    let file = ctx.temp_dir.child("broken.json");
    file.write_str("{ not json").unwrap();

    ctx.cmd()
        .args(["reconcile", "--snapshot", &path_str(file.path())])
        .assert()
        .failure();
}

// ============================================================================
// Recover Command Tests
// ============================================================================

#[test]
fn recover_runs_every_step() {
    let ctx = TestContext::new();
    ctx.open().success();
    let snapshot = ctx.write_snapshot(&snapshot());

    let report = ctx.json(&["recover", "--snapshot", &path_str(&snapshot), "--json"]);
    let steps = report["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 8);
    assert_eq!(steps[0]["step"], "confirm_sent_messages");
    assert_eq!(steps[7]["step"], "apply_retention");
    assert!(steps.iter().all(|s| s["outcome"] == "completed"));
}

#[test]
fn recover_prints_step_table() {
    let ctx = TestContext::new();
    ctx.open().success();
    let snapshot = ctx.write_snapshot(&snapshot());

    ctx.cmd()
        .args(["recover", "--snapshot", &path_str(&snapshot)])
        .assert()
        .success()
        .stdout(predicate::str::contains("delete_stray_fyles"))
        .stdout(predicate::str::contains("changes"));
}

// ============================================================================
// Run Command Tests
// ============================================================================

#[test]
fn run_once_reconciles_and_recovers() {
    let ctx = TestContext::new();
    let snapshot = ctx.write_snapshot(&snapshot());
    let config = ctx.temp_dir.child("keel.toml");
    config
        .write_str("recovery_delay_ms = 0\nworker_threads = 1\n")
        .unwrap();

    ctx.cmd()
        .args([
            "--config",
            &path_str(config.path()),
            "run",
            "--snapshot",
            &path_str(&snapshot),
            "--once",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("apply_retention"));

    assert_eq!(ctx.status_json()["contacts"], 3);
}

#[test]
fn invalid_config_is_rejected() {
    let ctx = TestContext::new();
    let config = ctx.temp_dir.child("keel.toml");
    config.write_str("worker_threads = 0\n").unwrap();

    ctx.cmd()
        .args(["--config", &path_str(config.path()), "open"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("worker_threads"));
}
