//! End-to-end tests against real worker processes.
//!
//! Shell scripts stand in for the worker binary so the full spawn,
//! handshake, supervision, and termination path runs over real pipes and
//! real signals.

#![cfg(unix)]

use drover_core::{BridgeConfig, BridgeError, ProcessState, WorkerBridge};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

/// Write a worker script and return the directory keeping it alive plus
/// its path
fn script_worker(body: &str) -> (TempDir, String) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("worker.sh");
    std::fs::write(&path, body).expect("write worker script");
    let path = path.to_str().expect("utf-8 path").to_string();
    (dir, path)
}

/// A worker that answers the handshake and the basic tool methods
const ECHO_WORKER: &str = r#"#!/bin/sh
echo "[worker] scripted shell worker ready" >&2
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/')
  case "$line" in
    *'"initialize"'*)
      printf '{"id":%s,"result":{"protocolVersion":"2024-11-05","serverInfo":{"name":"sh-worker","version":"0"}}}\n' "$id"
      ;;
    *'"tools/list"'*)
      printf '{"id":%s,"result":{"tools":[{"name":"echo","description":"Echo arguments back"}]}}\n' "$id"
      ;;
    *'"tools/call"'*)
      printf '{"id":%s,"result":{"ok":true}}\n' "$id"
      ;;
  esac
done
"#;

/// A worker that completes the handshake, then dies shortly afterwards
const DYING_WORKER: &str = r#"#!/bin/sh
IFS= read -r line
id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/')
printf '{"id":%s,"result":{"protocolVersion":"2024-11-05"}}\n' "$id"
sleep 0.2
exit 1
"#;

fn sh_config(script: &str) -> BridgeConfig {
    BridgeConfig::new("/bin/sh").with_arg(script)
}

async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Test a full session over a real subprocess
#[tokio::test]
async fn test_session_against_shell_worker() {
    let (_dir, script) = script_worker(ECHO_WORKER);
    let bridge = WorkerBridge::new(sh_config(&script));

    bridge.start().await.expect("start shell worker");
    assert_eq!(bridge.state(), ProcessState::Initialized);

    let tools = bridge.list_tools().await.expect("list tools");
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");
    assert_eq!(bridge.state(), ProcessState::Running);

    let result = bridge
        .call_tool("echo", json!({ "text": "hello" }))
        .await
        .expect("call tool");
    assert_eq!(result["ok"], true);

    bridge.close().await.expect("close bridge");
    assert_eq!(bridge.state(), ProcessState::Closed);
}

/// Test that a mute worker fails the handshake and gets terminated
#[tokio::test]
async fn test_mute_worker_fails_handshake() {
    let config = BridgeConfig::new("/bin/sh")
        .with_arg("-c")
        .with_arg("sleep 30")
        .with_initialize_timeout(Duration::from_millis(200));
    let bridge = WorkerBridge::new(config);

    let started = std::time::Instant::now();
    let err = bridge.start().await.unwrap_err();

    assert!(matches!(err, BridgeError::Startup { .. }));
    assert_eq!(bridge.state(), ProcessState::Stopped);
    // Handshake budget plus termination, nowhere near the 30s sleep.
    assert!(started.elapsed() < Duration::from_secs(10));
}

/// Test that repeated real crashes exhaust the restart budget
#[tokio::test]
async fn test_crashing_worker_exhausts_restart_budget() {
    let (_dir, script) = script_worker(DYING_WORKER);
    let config = sh_config(&script)
        .with_watchdog_interval(Duration::from_millis(50))
        .with_restart_cooldown(Duration::ZERO)
        .with_restart_delay(Duration::from_millis(1))
        .with_max_restart_attempts(2);
    let bridge = WorkerBridge::new(config);

    bridge.start().await.expect("initial start");
    assert_eq!(bridge.state(), ProcessState::Initialized);

    // The worker dies after the handshake; the watchdog notices and
    // restarts it, which only a recovery path can signal as Running
    // without any call being made.
    wait_for("first automatic restart", || {
        bridge.state() == ProcessState::Running
    })
    .await;

    // Every incarnation dies the same way until the budget runs out.
    wait_for("permanent failure", || {
        bridge.state() == ProcessState::PermanentlyDown
    })
    .await;

    let err = bridge.call_tool("echo", json!({})).await.unwrap_err();
    assert!(matches!(err, BridgeError::State { .. }));

    bridge.close().await.expect("close bridge");
}
