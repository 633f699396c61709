// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use drover_model::{FakeHttpManager, FakeMachine};

fn watcher_with(
    machine: Arc<FakeMachine>,
    properties: serde_json::Value,
    active_states: Vec<String>,
) -> Arc<SwitchWatcher> {
    build(
        WatcherSpec {
            machine,
            name: "power".to_string(),
            active_states,
            required_states: vec![],
            fail_event: "switched_off".to_string(),
            success_event: "switched_on".to_string(),
            interval: String::new(),
            announce_interval: Duration::ZERO,
            properties: properties.as_object().cloned().unwrap_or_default(),
        },
        HTTP_SWITCH_TYPE,
    )
    .unwrap()
}

#[test]
fn initial_state_must_be_on_or_off() {
    let machine = Arc::new(FakeMachine::new("m1"));
    let result = build(
        WatcherSpec {
            machine,
            name: "power".to_string(),
            active_states: vec![],
            required_states: vec![],
            fail_event: String::new(),
            success_event: String::new(),
            interval: String::new(),
            announce_interval: Duration::ZERO,
            properties: serde_json::json!({"initial_state": "sideways"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        },
        HOME_ASSISTANT_TYPE,
    );

    assert!(result.is_err());
}

#[test]
fn presses_transition_and_publish() {
    let machine = Arc::new(FakeMachine::new("m1"));
    let watcher = watcher_with(machine.clone(), serde_json::json!({}), vec![]);

    watcher.handle_press(Press::On).unwrap();
    assert_eq!(watcher.previous(), State::On);

    watcher.handle_press(Press::Off).unwrap();
    assert_eq!(watcher.previous(), State::Off);

    assert_eq!(machine.transitions(), vec!["switched_on", "switched_off"]);
    assert_eq!(machine.notifications().len(), 2);
}

#[test]
fn no_transition_presses_only_sync_state() {
    let machine = Arc::new(FakeMachine::new("m1"));
    let watcher = watcher_with(machine.clone(), serde_json::json!({}), vec![]);

    watcher.handle_press(Press::OnNoTransition).unwrap();
    assert_eq!(watcher.previous(), State::On);

    watcher.handle_press(Press::OffNoTransition).unwrap();
    assert_eq!(watcher.previous(), State::Off);

    // state published but no FSM transitions fired
    assert!(machine.transitions().is_empty());
    assert_eq!(machine.notifications().len(), 2);
}

#[test]
fn turn_on_rejected_while_disabled() {
    let machine = Arc::new(FakeMachine::new("m1"));
    machine.set_state("maintenance");
    let watcher = watcher_with(
        machine,
        serde_json::json!({"disable_when": ["maintenance"]}),
        vec![],
    );

    assert!(matches!(watcher.turn_on(), Err(SwitchError::Disabled)));
    assert!(matches!(watcher.turn_off(), Err(SwitchError::Disabled)));
}

#[test]
fn turn_on_rejected_while_ineligible() {
    let machine = Arc::new(FakeMachine::new("m1"));
    machine.set_state("booting");
    let watcher = watcher_with(machine, serde_json::json!({}), vec!["running".to_string()]);

    assert!(matches!(watcher.turn_on(), Err(SwitchError::NotActive)));
}

#[test]
fn accepted_press_lands_in_the_channel() {
    let machine = Arc::new(FakeMachine::new("m1"));
    let watcher = watcher_with(machine, serde_json::json!({}), vec![]);

    assert!(watcher.turn_on().unwrap());

    let mut rx = watcher.press_rx.lock().unwrap().take().unwrap();
    assert_eq!(rx.try_recv().unwrap(), Press::On);
}

#[test]
fn machine_state_sync_injects_no_transition_presses() {
    let machine = Arc::new(FakeMachine::new("m1"));
    let watcher = watcher_with(
        machine.clone(),
        serde_json::json!({"on_when": ["running"], "off_when": ["stopped"]}),
        vec![],
    );
    let mut rx = watcher.press_rx.lock().unwrap().take().unwrap();

    machine.set_state("running");
    watcher.sync_with_machine_state();
    assert_eq!(rx.try_recv().unwrap(), Press::OnNoTransition);

    machine.set_state("stopped");
    watcher.sync_with_machine_state();
    assert_eq!(rx.try_recv().unwrap(), Press::OffNoTransition);

    // unrelated states inject nothing
    machine.set_state("other");
    watcher.sync_with_machine_state();
    assert!(rx.try_recv().is_err());
}

#[test]
fn switch_status_reflects_previous_state() {
    let machine = Arc::new(FakeMachine::new("m1"));
    let watcher = watcher_with(machine, serde_json::json!({"annotations": {"room": "lab"}}), vec![]);

    let status = watcher.status();
    assert!(!status.is_on);
    assert_eq!(status.status, "unknown");

    watcher.handle_press(Press::On).unwrap();
    let status = watcher.status();
    assert!(status.is_on);
    assert_eq!(status.status, "on");

    let detail = status.detail.unwrap_or_default();
    assert_eq!(detail["annotations"]["room"], "lab");
    assert_eq!(detail["is_on"], true);
}

#[tokio::test]
async fn run_registers_and_shutdown_deregisters() {
    let machine = Arc::new(FakeMachine::new("m1"));
    let http = Arc::new(FakeHttpManager::new());
    machine.set_http_manager(http.clone());

    let watcher = watcher_with(machine, serde_json::json!({}), vec![]);
    let shutdown = CancellationToken::new();

    let handle = tokio::spawn(Arc::clone(&watcher).run(shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(http.switches(), vec![("m1".to_string(), "power".to_string())]);

    shutdown.cancel();
    handle.await.unwrap();
    assert!(http.switches().is_empty());
}

#[tokio::test]
async fn home_assistant_initial_state_applies_before_presses() {
    let machine = Arc::new(FakeMachine::new("m1"));
    let watcher = build(
        WatcherSpec {
            machine,
            name: "power".to_string(),
            active_states: vec![],
            required_states: vec![],
            fail_event: String::new(),
            success_event: String::new(),
            interval: String::new(),
            announce_interval: Duration::ZERO,
            properties: serde_json::json!({"initial_state": "on"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        },
        HOME_ASSISTANT_TYPE,
    )
    .unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&watcher).run(shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(watcher.previous(), State::On);
    assert_eq!(watcher.watcher_type(), "homeassistant");

    shutdown.cancel();
    handle.await.unwrap();
}
