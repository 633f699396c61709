// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
struct Props {
    command: String,
    #[serde(default, deserialize_with = "string_list")]
    environment: Vec<String>,
    #[serde(default = "zero_duration", deserialize_with = "lenient_duration")]
    timeout: Duration,
}

fn map(json: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match json {
        serde_json::Value::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}

#[test]
fn decodes_typed_properties() {
    let props: Props = decode(&map(serde_json::json!({
        "command": "check_disk",
        "environment": ["A=1", "B=2"],
        "timeout": "10s",
    })))
    .unwrap();

    assert_eq!(props.command, "check_disk");
    assert_eq!(props.environment, vec!["A=1", "B=2"]);
    assert_eq!(props.timeout, Duration::from_secs(10));
}

#[test]
fn unknown_fields_are_configuration_errors() {
    let err = decode::<Props>(&map(serde_json::json!({
        "command": "x",
        "comand_typo": "y",
    })))
    .unwrap_err();

    assert!(err.to_string().contains("comand_typo"));
}

#[test]
fn missing_required_field_is_an_error() {
    assert!(decode::<Props>(&map(serde_json::json!({"timeout": "1s"}))).is_err());
}

#[test]
fn string_list_accepts_comma_joined_strings() {
    let props: Props = decode(&map(serde_json::json!({
        "command": "x",
        "environment": "A=1, B=2,  C=3",
    })))
    .unwrap();

    assert_eq!(props.environment, vec!["A=1", "B=2", "C=3"]);
}

#[test]
fn zero_and_empty_durations_decode_to_zero() {
    for raw in ["0", "", "  "] {
        let props: Props = decode(&map(serde_json::json!({
            "command": "x",
            "timeout": raw,
        })))
        .unwrap();
        assert_eq!(props.timeout, Duration::ZERO, "raw {:?}", raw);
    }
}

#[test]
fn numeric_durations_decode_as_seconds() {
    let props: Props = decode(&map(serde_json::json!({
        "command": "x",
        "timeout": 5,
    })))
    .unwrap();

    assert_eq!(props.timeout, Duration::from_secs(5));
}
