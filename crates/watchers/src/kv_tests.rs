// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use drover_model::{FakeKvBucket, FakeMachine, Machine};

fn watcher_with(
    properties: serde_json::Value,
) -> (Arc<KvWatcher>, Arc<FakeMachine>, Arc<FakeKvBucket>) {
    let machine = Arc::new(FakeMachine::new("m1"));
    let bucket = Arc::new(FakeKvBucket::new());
    machine.set_kv_bucket(bucket.clone());

    let watcher = build(WatcherSpec {
        machine: machine.clone(),
        name: "config".to_string(),
        active_states: vec![],
        required_states: vec![],
        fail_event: "kv_failed".to_string(),
        success_event: "kv_changed".to_string(),
        interval: "1s".to_string(),
        announce_interval: Duration::ZERO,
        properties: properties.as_object().cloned().unwrap_or_default(),
    })
    .unwrap();

    (watcher, machine, bucket)
}

fn props() -> serde_json::Value {
    serde_json::json!({"bucket": "CFG", "key": "spec"})
}

/// Run one poll with the minimum-spacing guard reset.
fn poll(watcher: &KvWatcher) -> (State, Option<KvError>) {
    watcher.mutable().last_poll = None;
    watcher.poll()
}

#[test]
fn bucket_and_key_are_required() {
    let machine = Arc::new(FakeMachine::new("m1"));
    machine.set_kv_bucket(Arc::new(FakeKvBucket::new()));

    let missing_bucket = build(WatcherSpec {
        machine: machine.clone(),
        name: "w".to_string(),
        active_states: vec![],
        required_states: vec![],
        fail_event: String::new(),
        success_event: String::new(),
        interval: String::new(),
        announce_interval: Duration::ZERO,
        properties: serde_json::Map::new(),
    });
    assert!(missing_bucket.is_err());

    let missing_key = build(WatcherSpec {
        machine,
        name: "w".to_string(),
        active_states: vec![],
        required_states: vec![],
        fail_event: String::new(),
        success_event: String::new(),
        interval: String::new(),
        announce_interval: Duration::ZERO,
        properties: serde_json::json!({"bucket": "CFG"})
            .as_object()
            .cloned()
            .unwrap_or_default(),
    });
    assert!(missing_key.is_err());
}

#[test]
fn watch_mode_is_rejected_as_unsupported() {
    let machine = Arc::new(FakeMachine::new("m1"));
    machine.set_kv_bucket(Arc::new(FakeKvBucket::new()));

    let err = build(WatcherSpec {
        machine,
        name: "w".to_string(),
        active_states: vec![],
        required_states: vec![],
        fail_event: String::new(),
        success_event: String::new(),
        interval: String::new(),
        announce_interval: Duration::ZERO,
        properties: serde_json::json!({"bucket": "CFG", "key": "spec", "mode": "watch"})
            .as_object()
            .cloned()
            .unwrap_or_default(),
    })
    .unwrap_err();

    assert!(err.to_string().contains("watch mode not supported"));
}

#[test]
fn unknown_modes_are_rejected() {
    let machine = Arc::new(FakeMachine::new("m1"));
    machine.set_kv_bucket(Arc::new(FakeKvBucket::new()));

    let err = build(WatcherSpec {
        machine,
        name: "w".to_string(),
        active_states: vec![],
        required_states: vec![],
        fail_event: String::new(),
        success_event: String::new(),
        interval: String::new(),
        announce_interval: Duration::ZERO,
        properties: serde_json::json!({"bucket": "CFG", "key": "spec", "mode": "stream"})
            .as_object()
            .cloned()
            .unwrap_or_default(),
    })
    .unwrap_err();

    assert!(err.to_string().contains("'poll' or 'watch'"));
}

#[test]
fn value_whitespace_does_not_affect_decoding() {
    assert_eq!(
        parse_value(b"\n   \t{\"spec\": \"foo\"}\t  \n"),
        parse_value(b"{\"spec\": \"foo\"}")
    );
    assert_eq!(
        parse_value(b"\n   \t{\"spec\": \"foo\"}\t  \n"),
        serde_json::json!({"spec": "foo"})
    );
}

#[test]
fn scalar_values_decode_as_trimmed_strings() {
    assert_eq!(parse_value(b"  hello \n"), serde_json::json!("hello"));
}

#[test]
fn arrays_decode_as_json() {
    assert_eq!(parse_value(b"[1, 2]"), serde_json::json!([1, 2]));
}

#[test]
fn malformed_json_falls_back_to_string() {
    assert_eq!(parse_value(b"{not json}"), serde_json::json!("{not json}"));
}

#[test]
fn first_value_is_a_change_written_to_data() {
    let (watcher, machine, bucket) = watcher_with(props());
    bucket.put("spec", br#"{"replicas": 3}"#.to_vec(), 1);

    let (state, _) = poll(&watcher);
    assert_eq!(state, State::Changed);
    assert_eq!(
        machine.data_get("CFG_spec"),
        Some(serde_json::json!({"replicas": 3}))
    );

    watcher.handle_state(state, None).unwrap();
    assert_eq!(machine.transitions(), vec!["kv_changed"]);
}

#[test]
fn unchanged_value_does_not_transition() {
    let (watcher, machine, bucket) = watcher_with(props());
    bucket.put("spec", b"v1".to_vec(), 1);

    let (state, _) = poll(&watcher);
    watcher.handle_state(state, None).unwrap();

    let (state, _) = poll(&watcher);
    assert_eq!(state, State::Unchanged);
    watcher.handle_state(state, None).unwrap();

    assert_eq!(machine.transitions(), vec!["kv_changed"]);
}

#[test]
fn missing_key_with_no_history_is_unchanged() {
    let (watcher, machine, _bucket) = watcher_with(props());

    let (state, _) = poll(&watcher);
    assert_eq!(state, State::Unchanged);
    assert!(machine.transitions().is_empty());
}

#[test]
fn deleted_key_with_history_is_a_change() {
    let (watcher, machine, bucket) = watcher_with(props());
    bucket.put("spec", b"v1".to_vec(), 1);

    let (state, _) = poll(&watcher);
    assert_eq!(state, State::Changed);

    bucket.delete("spec");
    let (state, _) = poll(&watcher);
    assert_eq!(state, State::Changed);
    assert_eq!(machine.data_get("CFG_spec"), None);
}

#[test]
fn matching_update_transitions_only_after_a_real_update() {
    let (watcher, _machine, bucket) = watcher_with(serde_json::json!({
        "bucket": "CFG",
        "key": "spec",
        "on_matching_update": true,
    }));
    bucket.put("spec", b"v1".to_vec(), 4);

    // first sighting is the real update
    let (state, _) = poll(&watcher);
    assert_eq!(state, State::Changed);

    // same value, same sequence: unchanged
    let (state, _) = poll(&watcher);
    assert_eq!(state, State::Unchanged);

    // same value, advanced sequence: changed because of the flag
    bucket.put("spec", b"v1".to_vec(), 5);
    let (state, _) = poll(&watcher);
    assert_eq!(state, State::Changed);
}

#[test]
fn matching_update_guards_the_startup_transient() {
    let (watcher, machine, bucket) = watcher_with(serde_json::json!({
        "bucket": "CFG",
        "key": "spec",
        "on_matching_update": true,
    }));

    // the machine already held the value from a previous run
    machine
        .data_put("CFG_spec", serde_json::json!("v1"))
        .unwrap();
    bucket.put("spec", b"v1".to_vec(), 9);

    // identical value and no observed update yet: no transition even
    // though the store sequence is ahead of our zero
    let (state, _) = poll(&watcher);
    assert_eq!(state, State::Unchanged);
}

#[test]
fn on_successful_get_changes_every_read() {
    let (watcher, _machine, bucket) = watcher_with(serde_json::json!({
        "bucket": "CFG",
        "key": "spec",
        "on_successful_get": true,
    }));
    bucket.put("spec", b"v1".to_vec(), 1);

    let (state, _) = poll(&watcher);
    assert_eq!(state, State::Changed);
    let (state, _) = poll(&watcher);
    assert_eq!(state, State::Changed);
}

#[test]
fn bucket_prefix_can_be_disabled() {
    let (watcher, machine, bucket) = watcher_with(serde_json::json!({
        "bucket": "CFG",
        "key": "spec",
        "bucket_prefix": false,
    }));
    bucket.put("spec", b"v1".to_vec(), 1);

    let (state, _) = poll(&watcher);
    assert_eq!(state, State::Changed);
    assert_eq!(machine.data_get("spec"), Some(serde_json::json!("v1")));
}

#[test]
fn overlapping_polls_are_skipped() {
    let (watcher, _machine, bucket) = watcher_with(props());
    bucket.put("spec", b"v1".to_vec(), 1);

    watcher.mutable().polling = true;
    let (state, _) = poll(&watcher);
    assert_eq!(state, State::Skipped);
}

#[test]
fn poll_spacing_enforces_the_interval() {
    let (watcher, _machine, bucket) = watcher_with(props());
    bucket.put("spec", b"v1".to_vec(), 1);

    let (state, _) = poll(&watcher);
    assert_eq!(state, State::Changed);

    // a poll right after the last one is suppressed
    let (state, _) = watcher.poll();
    assert_eq!(state, State::Skipped);
}

#[test]
fn ineligible_watcher_skips() {
    let machine = Arc::new(FakeMachine::new("m1"));
    machine.set_kv_bucket(Arc::new(FakeKvBucket::new()));
    machine.set_state("off");

    let watcher = build(WatcherSpec {
        machine,
        name: "config".to_string(),
        active_states: vec!["on".to_string()],
        required_states: vec![],
        fail_event: String::new(),
        success_event: String::new(),
        interval: "1s".to_string(),
        announce_interval: Duration::ZERO,
        properties: props().as_object().cloned().unwrap_or_default(),
    })
    .unwrap();

    let (state, _) = poll(&watcher);
    assert_eq!(state, State::Skipped);
}
