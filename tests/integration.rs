//! Integration tests for recorder-gateway
//!
//! Full recording needs a headed Chrome and a recording server.
//! These tests cover the CLI surface only.

use std::process::Command;

fn run(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "--quiet", "--bin", "recorder-gateway", "--"])
        .args(args)
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .output()
        .expect("Failed to execute command")
}

#[test]
fn test_help_command() {
    let output = run(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("recorder-gateway"), "{stdout}");
    for sub in ["record", "click-at-bbox", "scroll-into-view", "text-in-bbox"] {
        assert!(stdout.contains(sub), "help should list {sub}");
    }
}

#[test]
fn test_version_command() {
    let output = run(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "{stdout}");
}

#[test]
fn test_record_help_lists_lifecycle() {
    let output = run(&["record", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    for sub in ["start", "pause", "resume", "stop", "status"] {
        assert!(stdout.contains(sub), "record help should list {sub}");
    }
}

#[test]
fn test_call_without_daemon_fails() {
    let output = run(&["--socket", "/tmp/recorder-gateway-missing.sock", "screenshot"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to connect to daemon"), "{stderr}");
}
