// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level integration tests: a manager driving real watchers
//! against fake machines, end to end.

use drover_model::{FakeMachine, Machine};
use drover_watchers::{Manager, WatcherDef, WatcherRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn def(json: serde_json::Value) -> WatcherDef {
    serde_json::from_value(json).expect("definition must parse")
}

async fn eventually(mut check: impl FnMut() -> bool, what: &str) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn file_watcher_full_lifecycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let machine = Arc::new(FakeMachine::new("web"));
    machine.set_directory(dir.path());

    let manager = Manager::new(Arc::new(WatcherRegistry::with_builtin_watchers()));
    manager.set_machine(machine.clone());

    let defs = vec![def(serde_json::json!({
        "name": "manifest",
        "type": "file",
        "fail_transition": "vanished",
        "success_transition": "updated",
        "interval": "500ms",
        "properties": {"path": "manifest.json"},
    }))];

    let shutdown = CancellationToken::new();
    manager.run(&defs, shutdown.clone()).expect("manager starts");

    // no file yet: the fail transition fires
    eventually(
        || machine.transitions().contains(&"vanished".to_string()),
        "missing file to fail",
    )
    .await;

    // the file appears: the success transition fires
    std::fs::write(dir.path().join("manifest.json"), b"{}").expect("write");
    eventually(
        || machine.transitions().contains(&"updated".to_string()),
        "new file to trigger",
    )
    .await;

    let state = manager.watcher_state("manifest").expect("watcher state");
    assert_eq!(state["type"], "file");
    assert_eq!(
        state["protocol"],
        "io.drover.machine.watcher.file.v1.state"
    );

    shutdown.cancel();
}

#[tokio::test]
async fn expression_watcher_reacts_to_machine_data() {
    let machine = Arc::new(FakeMachine::new("orders"));
    machine.set_state("running");

    let manager = Manager::new(Arc::new(WatcherRegistry::with_builtin_watchers()));
    manager.set_machine(machine.clone());

    let defs = vec![def(serde_json::json!({
        "name": "backlog",
        "type": "expression",
        "fail_transition": "overloaded",
        "success_transition": "drained",
        "interval": "1s",
        "properties": {
            "success_when": "data.backlog == 0",
            "fail_when": "data.backlog > 10",
        },
    }))];

    machine
        .data_put("backlog", serde_json::json!(50))
        .expect("data put");

    let shutdown = CancellationToken::new();
    manager.run(&defs, shutdown.clone()).expect("manager starts");

    eventually(
        || machine.transitions().contains(&"overloaded".to_string()),
        "fail_when to match",
    )
    .await;

    machine
        .data_put("backlog", serde_json::json!(0))
        .expect("data put");
    manager.notify_state_change();

    eventually(
        || machine.transitions().contains(&"drained".to_string()),
        "success_when to match",
    )
    .await;

    shutdown.cancel();
}

#[tokio::test]
async fn eligibility_gating_follows_machine_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("flag"), b"x").expect("write");

    let machine = Arc::new(FakeMachine::new("gated"));
    machine.set_directory(dir.path());
    machine.set_state("paused");

    let manager = Manager::new(Arc::new(WatcherRegistry::with_builtin_watchers()));
    manager.set_machine(machine.clone());

    let defs = vec![def(serde_json::json!({
        "name": "flag",
        "type": "file",
        "state_match": ["active"],
        "success_transition": "noticed",
        "interval": "500ms",
        "properties": {"path": "flag"},
    }))];

    let shutdown = CancellationToken::new();
    manager.run(&defs, shutdown.clone()).expect("manager starts");

    // ineligible: several poll intervals pass without a transition
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(machine.transitions().is_empty());

    // becoming eligible triggers the pending change detection
    machine.set_state("active");
    manager.notify_state_change();

    eventually(
        || machine.transitions().contains(&"noticed".to_string()),
        "eligibility to unlock the watcher",
    )
    .await;

    shutdown.cancel();
}

#[tokio::test]
async fn exec_watcher_runs_commands_through_the_manager() {
    let dir = tempfile::tempdir().expect("tempdir");
    let machine = Arc::new(FakeMachine::new("runner"));
    machine.set_directory(dir.path());

    let manager = Manager::new(Arc::new(WatcherRegistry::with_builtin_watchers()));
    manager.set_machine(machine.clone());

    let out = dir.path().join("ran");
    let defs = vec![def(serde_json::json!({
        "name": "toucher",
        "type": "exec",
        "success_transition": "ran",
        "interval": "500ms",
        "properties": {
            "command": format!("touch {}", out.display()),
            "timeout": "5s",
        },
    }))];

    let shutdown = CancellationToken::new();
    manager.run(&defs, shutdown.clone()).expect("manager starts");

    eventually(
        || machine.transitions().contains(&"ran".to_string()),
        "exec success",
    )
    .await;
    assert!(out.exists());

    shutdown.cancel();
}

#[tokio::test]
async fn shutdown_stops_all_watcher_activity() {
    let machine = Arc::new(FakeMachine::new("quiet"));

    let manager = Manager::new(Arc::new(WatcherRegistry::with_builtin_watchers()));
    manager.set_machine(machine.clone());

    let defs = vec![def(serde_json::json!({
        "name": "beat",
        "type": "expression",
        "success_transition": "tick",
        "interval": "1s",
        "properties": {"success_when": "true"},
    }))];

    let shutdown = CancellationToken::new();
    manager.run(&defs, shutdown.clone()).expect("manager starts");

    eventually(
        || !machine.notifications().is_empty(),
        "first evaluation",
    )
    .await;

    shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let after_shutdown = machine.notifications().len();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(machine.notifications().len(), after_shutdown);
}
