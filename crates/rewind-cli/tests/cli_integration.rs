//! CLI Integration Tests
//!
//! Runs the `rewind` binary end to end:
//! - `demo` records a log directory
//! - `info --json` reports it
//! - `dump --kind` filters entries
//! - `convert` rewrites it in the other format
//! - `verify` replays both copies against their snapshots
//!
//! # Running Tests
//! ```bash
//! cargo test -p rewind-cli --test cli_integration
//! ```

use std::path::Path;
use std::process::{Command, Output};

fn rewind(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rewind"))
        .args(args)
        .env_remove("REWIND_LOG")
        .output()
        .expect("failed to run rewind")
}

fn ok(args: &[&str]) -> String {
    let out = rewind(args);
    assert!(
        out.status.success(),
        "rewind {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn path(p: &Path) -> &str {
    p.to_str().unwrap()
}

/// A config that snapshots before every top-level call and keeps four
fn write_config(dir: &Path) -> std::path::PathBuf {
    let file = dir.join("rewind.toml");
    std::fs::write(&file, "snap_interval_ms = 0\nsnap_history_length = 4\n").unwrap();
    file
}

// ===== Recording and Inspection =====

#[test]
fn test_demo_then_info() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path());
    let log = tmp.path().join("log");
    let stdout = ok(&[
        "-c",
        path(&config),
        "demo",
        "--out",
        path(&log),
        "--ticks",
        "6",
    ]);
    assert!(stdout.contains("Recorded 6 ticks"));

    let info = ok(&["info", path(&log), "--json"]);
    let info: serde_json::Value = serde_json::from_str(&info).unwrap();
    assert_eq!(info["format"], "text");
    assert_eq!(info["snap_history_length"], 4);
    assert_eq!(info["snapshots"].as_array().unwrap().len(), 4);
    assert_eq!(info["script_loads"], 1);
    assert!(info["per_kind"]["ExternalCall"].as_u64().unwrap() >= 4);
}

#[test]
fn test_dump_filters_by_kind() {
    let tmp = tempfile::tempdir().unwrap();
    let log = tmp.path().join("log");
    ok(&["demo", "--out", path(&log), "--ticks", "3"]);

    let lines = ok(&["dump", path(&log), "--kind", "callexistingfunctionbegin", "--json"]);
    let entries: Vec<serde_json::Value> = lines
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e["kind"] == "CallExistingFunctionBegin"));
    let times: Vec<i64> = entries.iter().map(|e| e["time"].as_i64().unwrap()).collect();
    assert!(times.windows(2).all(|w| w[0] < w[1]));

    let all = ok(&["dump", path(&log)]);
    let window = ok(&[
        "dump",
        path(&log),
        "--from",
        &times[1].to_string(),
        "--to",
        &times[1].to_string(),
    ]);
    assert_eq!(window.lines().count(), 1);
    assert!(all.lines().count() > 3);
}

// ===== Conversion and Verification =====

#[test]
fn test_convert_and_verify() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path());
    let text = tmp.path().join("text");
    let binary = tmp.path().join("binary");
    ok(&["-c", path(&config), "demo", "-o", path(&text), "-t", "8"]);

    let stdout = ok(&["convert", path(&text), path(&binary), "--to", "binary"]);
    assert!(stdout.contains("binary"));
    let info: serde_json::Value =
        serde_json::from_str(&ok(&["info", path(&binary), "--json"])).unwrap();
    assert_eq!(info["format"], "binary");

    for dir in [&text, &binary] {
        let stdout = ok(&["verify", path(dir)]);
        assert!(stdout.starts_with("OK"), "{}", stdout);
        assert!(stdout.contains("3 snapshots checked"), "{}", stdout);
    }
}

#[test]
fn test_convert_onto_itself_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let log = tmp.path().join("log");
    ok(&["demo", "--out", path(&log), "--ticks", "1"]);
    assert!(!rewind(&["convert", path(&log), path(&log)]).status.success());
}

#[test]
fn test_verify_missing_directory_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let out = rewind(&["verify", path(&tmp.path().join("nothing"))]);
    assert!(!out.status.success());
}
