//! Integration tests for the `quebridge` binary.
//!
//! Argument parsing, config handling, and error exits, all without a live
//! cloud service.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// A `quebridge` command whose config and data directories live under
/// `home`, with every `QUEBRIDGE_*` variable cleared.
fn quebridge_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("quebridge");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env_remove("QUEBRIDGE_PROFILE")
        .env_remove("QUEBRIDGE_USERNAME")
        .env_remove("QUEBRIDGE_PASSWORD")
        .env_remove("QUEBRIDGE_LOG_FORMAT")
        .env_remove("RUST_LOG");
    cmd
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = quebridge_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    quebridge_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("pair"))
            .and(predicate::str::contains("status"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    quebridge_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("quebridge"));
}

#[test]
fn test_completions_bash() {
    let home = tempfile::tempdir().unwrap();
    quebridge_cmd(home.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_invalid_log_format_rejected() {
    let home = tempfile::tempdir().unwrap();
    quebridge_cmd(home.path())
        .args(["--log-format", "xml", "config", "path"])
        .assert()
        .code(2);
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_under_config_home() {
    let home = tempfile::tempdir().unwrap();
    quebridge_cmd(home.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_init_then_show() {
    let home = tempfile::tempdir().unwrap();

    quebridge_cmd(home.path())
        .args(["config", "init", "--username", "user@example.com", "--serial", "ABC123"])
        .assert()
        .success();

    quebridge_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[profiles.default]")
                .and(predicate::str::contains("user@example.com"))
                .and(predicate::str::contains("ABC123")),
        );
}

#[test]
fn test_config_show_lists_transport_settings() {
    let home = tempfile::tempdir().unwrap();
    let config_dir = home.path().join("config").join("quebridge");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        "[profiles.default]\nusername = \"user@example.com\"\npassword = \"hunter2\"\n\
         retry_delays = [\"1s\", \"10s\"]\ncircuit_breaker_threshold = 3\n\
         circuit_breaker_cooldown = \"45s\"\nbearer_failure_max = 4\n",
    )
    .unwrap();

    quebridge_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("retry_delays = [\"1s\", \"10s\"]")
                .and(predicate::str::contains("circuit_breaker_threshold = 3"))
                .and(predicate::str::contains("circuit_breaker_cooldown = \"45s\""))
                .and(predicate::str::contains("bearer_failure_max = 4"))
                .and(predicate::str::contains("hunter2").not()),
        );
}

#[test]
fn test_config_init_refuses_to_overwrite() {
    let home = tempfile::tempdir().unwrap();
    let init = |extra: &[&str]| {
        let mut cmd = quebridge_cmd(home.path());
        cmd.args(["config", "init", "--username", "user@example.com"])
            .args(extra);
        cmd
    };

    init(&[]).assert().success();
    init(&[]).assert().code(2).stderr(predicate::str::contains("--force"));
    init(&["--force"]).assert().success();
}

// ── Errors ──────────────────────────────────────────────────────────

#[test]
fn test_run_without_profile_fails() {
    let home = tempfile::tempdir().unwrap();
    quebridge_cmd(home.path())
        .arg("run")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_bad_duration_is_a_usage_error() {
    let home = tempfile::tempdir().unwrap();
    let config_dir = home.path().join("config").join("quebridge");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        "[profiles.default]\nusername = \"user@example.com\"\ncommand_expiry = \"soon\"\n",
    )
    .unwrap();

    quebridge_cmd(home.path())
        .env("QUEBRIDGE_PASSWORD", "hunter2")
        .arg("pair")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("command_expiry"));
}
