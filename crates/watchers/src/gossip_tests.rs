// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use drover_model::FakeMachine;
use yare::parameterized;

fn spec_with(
    machine: Arc<FakeMachine>,
    properties: serde_json::Value,
    active_states: Vec<String>,
) -> WatcherSpec {
    WatcherSpec {
        machine,
        name: "announce".to_string(),
        active_states,
        required_states: vec![],
        fail_event: String::new(),
        success_event: String::new(),
        interval: "1s".to_string(),
        announce_interval: Duration::ZERO,
        properties: properties.as_object().cloned().unwrap_or_default(),
    }
}

#[test]
fn freeform_requires_subject_and_payload() {
    let machine = Arc::new(FakeMachine::new("m1"));

    assert!(build(spec_with(
        machine.clone(),
        serde_json::json!({"payload": "x"}),
        vec![]
    ))
    .is_err());
    assert!(build(spec_with(
        machine,
        serde_json::json!({"subject": "x"}),
        vec![]
    ))
    .is_err());
}

#[test]
fn registration_builds_the_member_subject() {
    let machine = Arc::new(FakeMachine::new("m1"));
    let watcher = build(spec_with(
        machine,
        serde_json::json!({"registration": {
            "cluster": "web",
            "service": "app",
            "protocol": "http",
            "ip": "192.0.2.1",
            "port": 8080,
            "priority": 1,
        }}),
        vec![],
    ))
    .unwrap();

    assert_eq!(
        watcher.subject,
        "drover.hoist.web.app.member.http.192.0.2.1.P.8080.1"
    );
    assert_eq!(watcher.payload, "1");
}

#[test]
fn registration_prefix_overrides_the_default() {
    let machine = Arc::new(FakeMachine::new("m1"));
    let watcher = build(spec_with(
        machine,
        serde_json::json!({"registration": {
            "cluster": "web",
            "service": "app",
            "protocol": "http",
            "ip": "192.0.2.1",
            "port": 8080,
            "prefix": "services",
        }}),
        vec![],
    ))
    .unwrap();

    assert!(watcher.subject.starts_with("services.web.app.member"));
}

#[parameterized(
    bad_cluster = { serde_json::json!({"cluster": "9bad", "service": "s", "protocol": "p", "ip": "192.0.2.1", "port": 1}) },
    bad_service = { serde_json::json!({"cluster": "c", "service": "no spaces", "protocol": "p", "ip": "192.0.2.1", "port": 1}) },
    bad_protocol = { serde_json::json!({"cluster": "c", "service": "s", "protocol": "p*p", "ip": "192.0.2.1", "port": 1}) },
    bad_ip = { serde_json::json!({"cluster": "c", "service": "s", "protocol": "p", "ip": "localhost", "port": 1}) },
    missing_port = { serde_json::json!({"cluster": "c", "service": "s", "protocol": "p", "ip": "192.0.2.1"}) },
)]
fn invalid_registrations_are_rejected(registration: serde_json::Value) {
    let machine = Arc::new(FakeMachine::new("m1"));
    assert!(build(spec_with(
        machine,
        serde_json::json!({"registration": registration}),
        vec![]
    ))
    .is_err());
}

#[test]
fn registration_conflicts_with_subject_or_payload() {
    let machine = Arc::new(FakeMachine::new("m1"));
    let err = build(spec_with(
        machine,
        serde_json::json!({
            "subject": "x",
            "registration": {
                "cluster": "c", "service": "s", "protocol": "p",
                "ip": "192.0.2.1", "port": 1,
            }
        }),
        vec![],
    ))
    .unwrap_err();

    assert!(err.to_string().contains("registration"));
}

#[test]
fn publish_renders_templates_and_records_state() {
    let machine = Arc::new(FakeMachine::new("m1"));
    machine.set_facts(serde_json::json!({"dc": "east"}));
    let connector = machine.fake_connector();

    let watcher = build(spec_with(
        machine,
        serde_json::json!({
            "subject": "status.{{ facts.dc }}",
            "payload": "{{ name }} alive",
        }),
        vec![],
    ))
    .unwrap();

    watcher.publish_once();

    let published = connector.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "status.east");
    assert_eq!(published[0].1, b"m1 alive");

    let state = watcher.current_state();
    assert_eq!(state["subject"], "status.east");
    assert_eq!(state["payload"], "m1 alive");
    assert!(state["published"].as_i64().unwrap_or(0) > 0);
}

#[tokio::test(start_paused = true)]
async fn eligibility_flip_starts_and_stops_the_publish_loop() {
    let machine = Arc::new(FakeMachine::new("m1"));
    machine.set_state("up");
    let connector = machine.fake_connector();

    let watcher = build(spec_with(
        machine.clone(),
        serde_json::json!({"subject": "beat", "payload": "1"}),
        vec!["up".to_string()],
    ))
    .unwrap();
    let shutdown = CancellationToken::new();

    Arc::clone(&watcher).watch(&shutdown);
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(watcher.mutable().state, State::Running);

    // two interval ticks publish twice more
    for _ in 0..2 {
        tokio::time::advance(Duration::from_millis(1100)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }
    let count = connector.published().len();
    assert!(count >= 3, "expected at least 3 publishes, got {count}");

    // machine leaves the active state, the loop is cancelled
    machine.set_state("down");
    Arc::clone(&watcher).watch(&shutdown);
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(watcher.mutable().state, State::Stopped);

    let after_stop = connector.published().len();
    tokio::time::advance(Duration::from_secs(5)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(connector.published().len(), after_stop);

    shutdown.cancel();
}
