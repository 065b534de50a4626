//! Integration tests for the `rehau-bridge` binary.
//!
//! Argument parsing, config handling and the offline `topics` listing;
//! nothing here needs a broker.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

const SNAPSHOT: &str = r#"{
  "installations": [{
    "id": "inst-1",
    "unique": "u-1",
    "name": "Home",
    "mode": "heat",
    "groups": [{
      "name": "Ground",
      "zones": [
        { "id": "aaa111", "number": 1, "controller": 0, "name": "Living",
          "channels": [{ "id": "ch-a", "temperature": 680, "setpoint": 680 }] },
        { "id": "bbb222", "number": 1, "controller": 1, "name": "Office",
          "channels": [{ "id": "ch-b", "temperature": 700, "setpoint": 680 }] }
      ]
    }]
  }]
}"#;

// ── Helpers ─────────────────────────────────────────────────────────

/// The binary with an isolated environment: no user config, no
/// `REHAU_BRIDGE_*` overrides.
fn bridge_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("rehau-bridge");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("REHAU_BRIDGE_CONFIG")
        .env_remove("REHAU_BRIDGE_LOG_FILE")
        .env_remove("RUST_LOG");
    cmd
}

fn write(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = bridge_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "expected usage in:\n{stderr}");
}

#[test]
fn test_help_lists_subcommands() {
    let home = tempfile::tempdir().unwrap();
    bridge_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("Home Assistant")
            .and(predicate::str::contains("run"))
            .and(predicate::str::contains("topics"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    bridge_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("rehau-bridge"));
}

#[test]
fn test_completions_bash() {
    let home = tempfile::tempdir().unwrap();
    bridge_cmd(home.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("rehau-bridge"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    let home = tempfile::tempdir().unwrap();
    let path = home.path().join("custom.toml");
    bridge_cmd(home.path())
        .args(["config", "path", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_config_show_masks_secrets() {
    let home = tempfile::tempdir().unwrap();
    let path = write(
        home.path(),
        "config.toml",
        "[vendor]\nemail = \"me@example.com\"\ntoken = \"super-secret\"\n",
    );
    bridge_cmd(home.path())
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("me@example.com")
                .and(predicate::str::contains("********"))
                .and(predicate::str::contains("super-secret").not()),
        );
}

#[test]
fn test_environment_overrides_file() {
    let home = tempfile::tempdir().unwrap();
    let path = write(home.path(), "config.toml", "[bridge]\ncommand_max_retries = 1\n");
    bridge_cmd(home.path())
        .env("REHAU_BRIDGE_BRIDGE__COMMAND_MAX_RETRIES", "7")
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("command_max_retries = 7"));
}

#[test]
fn test_run_without_account_is_a_usage_error() {
    let home = tempfile::tempdir().unwrap();
    let path = write(home.path(), "config.toml", "");
    bridge_cmd(home.path())
        .args(["run", "--config"])
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("vendor.email"));
}

#[test]
fn test_run_rejects_negative_interval() {
    let home = tempfile::tempdir().unwrap();
    let path = write(
        home.path(),
        "config.toml",
        "[vendor]\nemail = \"me@example.com\"\nhost = \"broker.example.com\"\ntoken = \"t\"\n\
         installations_file = \"/nonexistent.json\"\n\n[bridge]\ncommand_retry_timeout_seconds = -1\n",
    );
    bridge_cmd(home.path())
        .args(["run", "--config"])
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("command_retry_timeout_seconds"));
}

// ── Topics ──────────────────────────────────────────────────────────

#[test]
fn test_topics_from_snapshot() {
    let home = tempfile::tempdir().unwrap();
    let snapshot = write(home.path(), "installations.json", SNAPSHOT);
    bridge_cmd(home.path())
        .args(["topics", "--file"])
        .arg(&snapshot)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("homeassistant/climate/rehau_aaa111/state")
                .and(predicate::str::contains("homeassistant/climate/rehau_bbb222/state"))
                .and(predicate::str::contains("temperature_command")),
        );
}

#[test]
fn test_topics_json_output() {
    let home = tempfile::tempdir().unwrap();
    let snapshot = write(home.path(), "installations.json", SNAPSHOT);
    let output = bridge_cmd(home.path())
        .args(["topics", "-o", "json", "--file"])
        .arg(&snapshot)
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let zones = json["zones"].as_object().unwrap();
    assert_eq!(zones.len(), 2);
    assert!(zones.contains_key("aaa111"));
    assert!(zones.contains_key("bbb222"));
}

#[test]
fn test_topics_missing_snapshot_fails() {
    let home = tempfile::tempdir().unwrap();
    bridge_cmd(home.path())
        .args(["topics", "--file"])
        .arg(home.path().join("absent.json"))
        .assert()
        .failure();
}
