// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn parses_full_definition() {
    let def: WatcherDef = serde_json::from_value(serde_json::json!({
        "name": "deploy",
        "type": "archive",
        "state_match": ["ready", "waiting"],
        "required_states": [
            {"machine_name": "network", "machine_state": "up"}
        ],
        "fail_transition": "failed",
        "success_transition": "deployed",
        "interval": "1m",
        "announce_interval": "5m",
        "properties": {"source": "https://example.net/app.tgz"}
    }))
    .unwrap();

    assert_eq!(def.name, "deploy");
    assert_eq!(def.watcher_type, "archive");
    assert_eq!(def.state_match, vec!["ready", "waiting"]);
    assert_eq!(def.required_states.len(), 1);
    assert_eq!(def.required_states[0].machine_name, "network");
    assert_eq!(def.parse_announce_interval().unwrap(), Duration::from_secs(300));
}

#[test]
fn minimal_definition_defaults() {
    let def: WatcherDef = serde_json::from_value(serde_json::json!({
        "name": "w",
        "type": "file",
    }))
    .unwrap();

    assert!(def.state_match.is_empty());
    assert!(def.required_states.is_empty());
    assert!(def.fail_transition.is_empty());
    assert_eq!(def.parse_announce_interval().unwrap(), Duration::ZERO);
}

#[test]
fn announce_interval_below_one_minute_is_rejected() {
    let def = WatcherDef {
        announce_interval: "30s".to_string(),
        ..WatcherDef::default()
    };

    assert!(def.parse_announce_interval().is_err());
}

#[test]
fn announce_interval_zero_disables() {
    let def = WatcherDef {
        announce_interval: "0".to_string(),
        ..WatcherDef::default()
    };

    assert_eq!(def.parse_announce_interval().unwrap(), Duration::ZERO);
}

#[test]
fn announce_interval_garbage_is_an_error() {
    let def = WatcherDef {
        announce_interval: "whenever".to_string(),
        ..WatcherDef::default()
    };

    assert!(def.parse_announce_interval().is_err());
}
