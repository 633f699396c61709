// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use drover_model::FakeMachine;
use yare::parameterized;

fn spec_with(
    machine: Arc<FakeMachine>,
    properties: serde_json::Value,
    interval: &str,
) -> WatcherSpec {
    WatcherSpec {
        machine,
        name: "disk".to_string(),
        active_states: vec![],
        required_states: vec![],
        fail_event: String::new(),
        success_event: String::new(),
        interval: interval.to_string(),
        announce_interval: Duration::ZERO,
        properties: properties.as_object().cloned().unwrap_or_default(),
    }
}

fn machine_in_tempdir() -> (Arc<FakeMachine>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let machine = Arc::new(FakeMachine::new("m1"));
    machine.set_directory(dir.path());
    (machine, dir)
}

#[parameterized(
    ok = { 0, State::Ok },
    warning = { 1, State::Warning },
    critical = { 2, State::Critical },
    unknown = { 3, State::Unknown },
    out_of_range = { 99, State::Unknown },
    negative = { -1, State::Unknown },
)]
fn exit_codes_map_to_states(code: i32, expected: State) {
    assert_eq!(State::from_exit_code(code), expected);
}

#[test]
fn plugin_or_builtin_is_required() {
    let (machine, _dir) = machine_in_tempdir();

    assert!(build(spec_with(machine.clone(), serde_json::json!({}), "")).is_err());
    assert!(build(spec_with(
        machine,
        serde_json::json!({"plugin": "check_disk", "builtin": "heartbeat"}),
        ""
    ))
    .is_err());
}

#[test]
fn status_file_builtin_requires_path_and_age() {
    let (machine, _dir) = machine_in_tempdir();

    assert!(build(spec_with(
        machine.clone(),
        serde_json::json!({"builtin": "status_file"}),
        ""
    ))
    .is_err());
    assert!(build(spec_with(
        machine.clone(),
        serde_json::json!({"builtin": "status_file", "status_file": "/run/status.json"}),
        ""
    ))
    .is_err());
    assert!(build(spec_with(
        machine,
        serde_json::json!({
            "builtin": "status_file",
            "status_file": "/run/status.json",
            "last_message": "5m",
        }),
        ""
    ))
    .is_ok());
}

#[test]
fn unsupported_builtins_fail_construction() {
    let (machine, _dir) = machine_in_tempdir();
    let err = build(spec_with(
        machine,
        serde_json::json!({"builtin": "teleport"}),
        "",
    ))
    .unwrap_err();

    assert!(err.to_string().contains("teleport"));
}

#[tokio::test]
async fn plugin_exit_codes_reach_the_state() {
    let (machine, _dir) = machine_in_tempdir();
    let watcher = build(spec_with(
        machine,
        serde_json::json!({"plugin": "sh -c 'echo CRITICAL: disk full; exit 2'", "timeout": "5s"}),
        "1s",
    ))
    .unwrap();

    let (state, err) = watcher.watch().await;
    assert_eq!(state, State::Critical, "{err:?}");
    assert!(watcher.mutable().previous_output.contains("disk full"));
}

#[tokio::test]
async fn transitions_use_the_state_name_as_event() {
    let (machine, _dir) = machine_in_tempdir();
    let watcher = build(spec_with(
        machine.clone(),
        serde_json::json!({"plugin": "true", "timeout": "5s"}),
        "1s",
    ))
    .unwrap();

    let (state, err) = watcher.watch().await;
    assert_eq!(state, State::Ok);
    watcher.handle_check(state, false, err).unwrap();

    assert_eq!(machine.transitions(), vec!["OK"]);
    assert_eq!(machine.notifications().len(), 1);
}

#[tokio::test]
async fn perf_data_is_parsed_from_plugin_output() {
    let (machine, _dir) = machine_in_tempdir();
    let watcher = build(spec_with(
        machine,
        serde_json::json!({"plugin": "sh -c 'echo \"OK | users=3;5;10\"'", "timeout": "5s"}),
        "1s",
    ))
    .unwrap();

    let (state, _) = watcher.watch().await;
    assert_eq!(state, State::Ok);

    let perf = watcher.mutable().previous_perf_data.clone();
    assert_eq!(perf.len(), 1);
    assert_eq!(perf[0].label, "users");
    assert_eq!(perf[0].value, 3.0);
}

#[test]
fn history_is_bounded() {
    let (machine, _dir) = machine_in_tempdir();
    let watcher = build(spec_with(
        machine,
        serde_json::json!({"builtin": "heartbeat"}),
        "1s",
    ))
    .unwrap();

    for _ in 0..(MAX_HISTORY + 5) {
        watcher.handle_check(State::Ok, false, None).unwrap();
    }

    assert_eq!(watcher.mutable().history.len(), MAX_HISTORY);
}

#[test]
fn skipped_and_unchecked_states_do_nothing() {
    let (machine, _dir) = machine_in_tempdir();
    let watcher = build(spec_with(
        machine.clone(),
        serde_json::json!({"builtin": "heartbeat"}),
        "1s",
    ))
    .unwrap();

    watcher.handle_check(State::Skipped, false, None).unwrap();
    watcher.handle_check(State::NotChecked, false, None).unwrap();

    assert!(machine.transitions().is_empty());
    assert!(machine.notifications().is_empty());
}

#[test]
fn external_transitions_update_prometheus_without_transitioning() {
    let (machine, _dir) = machine_in_tempdir();
    let watcher = build(spec_with(
        machine.clone(),
        serde_json::json!({"builtin": "heartbeat"}),
        "1s",
    ))
    .unwrap();

    watcher.handle_check(State::Critical, true, None).unwrap();
    assert_eq!(watcher.mutable().previous, State::Critical);
    assert!(machine.transitions().is_empty());
    assert!(machine.notifications().is_empty());
}

#[test]
fn early_rechecks_are_suppressed_but_force_overrides() {
    let (machine, _dir) = machine_in_tempdir();
    let watcher = build(spec_with(
        machine,
        serde_json::json!({"builtin": "heartbeat"}),
        "1m",
    ))
    .unwrap();

    assert!(watcher.should_check());
    watcher.mutable().previous_check = Some(Instant::now());

    // right after a check: suppressed
    assert!(!watcher.should_check());

    // a FORCE_CHECK induced force flag bypasses the spacing once
    watcher.mutable().force = true;
    assert!(watcher.should_check());
    assert!(!watcher.should_check());
}

#[test]
fn nagios_named_machine_states_sync_the_recorded_state() {
    let (machine, _dir) = machine_in_tempdir();
    let watcher = build(spec_with(
        machine.clone(),
        serde_json::json!({"builtin": "heartbeat"}),
        "1s",
    ))
    .unwrap();

    machine.set_state("WARNING");
    drover_model::Watcher::notify_state_change(watcher.as_ref());
    assert_eq!(watcher.mutable().previous, State::Warning);

    machine.set_state("FORCE_CHECK");
    drover_model::Watcher::notify_state_change(watcher.as_ref());
    assert!(watcher.mutable().force);
    assert!(watcher.core.signal_pending());
}

#[test]
fn status_file_builtin_checks_message_age() {
    let dir = tempfile::tempdir().unwrap();
    let status = dir.path().join("status.json");
    let now = chrono::Utc::now().timestamp();

    std::fs::write(
        &status,
        serde_json::json!({"timestamp": now - 10}).to_string(),
    )
    .unwrap();
    let (state, output) = builtin::status_file(&status, Duration::from_secs(60), now);
    assert_eq!(state, State::Ok);
    assert!(output.starts_with("OK"));

    let (state, output) = builtin::status_file(&status, Duration::from_secs(5), now);
    assert_eq!(state, State::Critical);
    assert!(output.starts_with("CRITICAL"));

    let (state, _) = builtin::status_file(
        &dir.path().join("missing.json"),
        Duration::from_secs(5),
        now,
    );
    assert_eq!(state, State::Unknown);
}

#[test]
fn prometheus_textfile_is_regenerated_wholesale() {
    let dir = tempfile::tempdir().unwrap();

    prometheus::update_status("prom-m1", "promdisk", 0, Some(dir.path())).unwrap();
    prometheus::update_status("prom-m1", "promload", 2, Some(dir.path())).unwrap();

    let content =
        std::fs::read_to_string(dir.path().join(prometheus::TEXTFILE_NAME)).unwrap();
    assert!(content.contains(r#"machine="prom-m1",watcher="promdisk"} 0"#));
    assert!(content.contains(r#"machine="prom-m1",watcher="promload"} 2"#));
    assert!(content.starts_with("# HELP"));

    prometheus::delete_status("prom-m1", "promdisk", Some(dir.path())).unwrap();
    let content =
        std::fs::read_to_string(dir.path().join(prometheus::TEXTFILE_NAME)).unwrap();
    assert!(!content.contains(r#"machine="prom-m1",watcher="promdisk""#));
    assert!(content.contains(r#"machine="prom-m1",watcher="promload""#));
}

#[test]
fn current_state_snapshot_shape() {
    let (machine, _dir) = machine_in_tempdir();
    let watcher = build(spec_with(
        machine,
        serde_json::json!({"builtin": "heartbeat", "annotations": {"team": "infra"}}),
        "1s",
    ))
    .unwrap();

    watcher.handle_check(State::Warning, false, None).unwrap();

    let state = watcher.current_state();
    assert_eq!(state["status"], "WARNING");
    assert_eq!(state["status_code"], 1);
    assert_eq!(state["annotations"]["team"], "infra");
    assert_eq!(state["history"].as_array().map(|h| h.len()), Some(1));
}
