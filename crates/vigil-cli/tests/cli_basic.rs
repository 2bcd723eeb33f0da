//! Basic CLI E2E tests.
//!
//! Each test runs the `vigil` binary against its own temporary home
//! directory, so config and database never leak between tests.

use std::path::Path;
use std::process::Command;

/// Run a CLI command with `home` as the home directory and return output.
fn run_cli(home: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_vigil"))
        .args(args)
        .env("HOME", home)
        .env_remove("VIGIL_ENV")
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn run_json(home: &Path, args: &[&str]) -> serde_json::Value {
    let (stdout, stderr, code) = run_cli(home, args);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    serde_json::from_str(&stdout).expect("Failed to parse JSON output")
}

#[test]
fn test_countdown_before_window() {
    let home = tempfile::tempdir().unwrap();
    let json = run_json(
        home.path(),
        &["countdown", "22:00-22:30", "--at", "2024-12-02T21:59:58Z"],
    );
    assert_eq!(json["countdown"]["hours"], 0);
    assert_eq!(json["countdown"]["minutes"], 0);
    assert_eq!(json["countdown"]["seconds"], 2);
}

#[test]
fn test_countdown_malformed_window_has_no_countdown() {
    let home = tempfile::tempdir().unwrap();
    let json = run_json(home.path(), &["countdown", "not-a-window"]);
    assert!(json["countdown"].is_null());
}

#[test]
fn test_assign_list_and_show() {
    let home = tempfile::tempdir().unwrap();
    let assigned = run_json(home.path(), &["slot", "assign", "user-1", "22:00-22:30"]);
    assert_eq!(assigned["slot"]["status"], "active");
    let slot_id = assigned["slot"]["id"].as_str().unwrap().to_string();

    let listed = run_json(home.path(), &["slot", "list", "--owner", "user-1"]);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let shown = run_json(home.path(), &["slot", "show", &slot_id]);
    assert_eq!(shown["owner"], "user-1");
    assert_eq!(shown["window"], "22:00-22:30");
    assert!(shown["countdown"].is_object());
}

#[test]
fn test_second_assign_of_same_window_fails() {
    let home = tempfile::tempdir().unwrap();
    run_json(home.path(), &["slot", "assign", "user-1", "22:00-22:30"]);
    let (_, stderr, code) = run_cli(home.path(), &["slot", "assign", "user-1", "22:00-22:30"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"), "{stderr}");
}

#[test]
fn test_attend_twice_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    let assigned = run_json(home.path(), &["slot", "assign", "user-1", "06:00-06:30"]);
    let slot_id = assigned["slot"]["id"].as_str().unwrap().to_string();

    let attended = run_json(home.path(), &["attend", &slot_id, "--duration-min", "30"]);
    assert_eq!(attended["record"]["attended"], true);
    assert_eq!(attended["record"]["duration_secs"], 1800);

    let (_, stderr, code) = run_cli(home.path(), &["attend", &slot_id]);
    assert_eq!(code, 1);
    assert!(stderr.contains("already recorded"), "{stderr}");

    let progress = run_json(home.path(), &["stats", "progress", "user-1"]);
    assert_eq!(progress["day_streak"], 1);
}

#[test]
fn test_skip_and_reactivate() {
    let home = tempfile::tempdir().unwrap();
    let assigned = run_json(home.path(), &["slot", "assign", "user-1", "06:00-06:30"]);
    let slot_id = assigned["slot"]["id"].as_str().unwrap().to_string();

    let skipped = run_json(home.path(), &["slot", "skip", &slot_id]);
    assert_eq!(skipped["slot"]["status"], "skipped");
    let resumed = run_json(home.path(), &["slot", "reactivate", &slot_id]);
    assert_eq!(resumed["slot"]["status"], "active");

    let (_, stderr, code) = run_cli(home.path(), &["slot", "reactivate", &slot_id]);
    assert_eq!(code, 0, "{stderr}");
}

#[test]
fn test_stats_for_unknown_user_fails() {
    let home = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(home.path(), &["stats", "progress", "ghost"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("not found"), "{stderr}");
}

#[test]
fn test_coverage_of_empty_window_is_zero() {
    let home = tempfile::tempdir().unwrap();
    let json = run_json(home.path(), &["stats", "coverage", "03:00-03:30", "--days", "7"]);
    assert_eq!(json["coverage_percent"], 0);
    assert_eq!(json["lookback_days"], 7);
}

#[test]
fn test_maintain_reports_json() {
    let home = tempfile::tempdir().unwrap();
    run_json(home.path(), &["slot", "assign", "user-1", "22:00-22:30"]);
    let report = run_json(home.path(), &["maintain"]);
    assert_eq!(report["slots_checked"], 1);
    assert!(report["failures"].as_array().unwrap().is_empty());
}

#[test]
fn test_watch_stops_after_ticks() {
    let home = tempfile::tempdir().unwrap();
    run_cli(home.path(), &["config", "set", "watch.tick_ms", "10"]);
    let (_, stderr, code) = run_cli(home.path(), &["watch", "--ticks", "3"]);
    assert_eq!(code, 0, "{stderr}");
}

#[test]
fn test_config_get_set() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(home.path(), &["config", "get", "policy.release_threshold"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "5");

    let (_, _, code) = run_cli(home.path(), &["config", "set", "policy.skip_grace_days", "7"]);
    assert_eq!(code, 0);
    let (stdout, _, _) = run_cli(home.path(), &["config", "get", "policy.skip_grace_days"]);
    assert_eq!(stdout.trim(), "7");

    let (_, stderr, code) = run_cli(home.path(), &["config", "set", "policy.nope", "1"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));
}
