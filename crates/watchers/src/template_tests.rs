// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use drover_model::FakeMachine;

fn machine_with_facts() -> FakeMachine {
    let machine = FakeMachine::new("web");
    machine.set_facts(serde_json::json!({
        "os": {"family": "debian"},
        "cpus": 8,
    }));
    machine
        .data_put("release", serde_json::json!("v1.2.3"))
        .unwrap();
    machine
}

#[test]
fn renders_context_variables() {
    let machine = machine_with_facts();
    machine.set_state("ready");

    let out = render(&machine, "{{ name }} is {{ state }}").unwrap();
    assert_eq!(out, "web is ready");
}

#[test]
fn renders_nested_facts_and_data() {
    let machine = machine_with_facts();

    let out = render(
        &machine,
        "https://repo/{{ facts.os.family }}/{{ data.release }}.tgz",
    )
    .unwrap();
    assert_eq!(out, "https://repo/debian/v1.2.3.tgz");
}

#[test]
fn lookup_returns_default_for_missing_paths() {
    let machine = machine_with_facts();

    let out = render(&machine, "{{ lookup('facts.os.family', 'unknown') }}").unwrap();
    assert_eq!(out, "debian");

    let out = render(&machine, "{{ lookup('facts.nope.nope', 'unknown') }}").unwrap();
    assert_eq!(out, "unknown");
}

#[test]
fn malformed_templates_error() {
    let machine = machine_with_facts();
    assert!(render(&machine, "{{ unclosed").is_err());
}

#[test]
fn evaluates_boolean_expressions() {
    let machine = machine_with_facts();
    machine.set_state("ready");

    assert!(evaluate(&machine, "state == 'ready'").unwrap());
    assert!(!evaluate(&machine, "state == 'degraded'").unwrap());
    assert!(evaluate(&machine, "facts.cpus > 4").unwrap());
}

#[test]
fn expression_errors_surface() {
    let machine = machine_with_facts();
    assert!(evaluate(&machine, "state ==").is_err());
}

#[test]
fn lookup_path_walks_arrays() {
    let doc = serde_json::json!({"items": [{"id": 1}, {"id": 2}]});
    assert_eq!(
        lookup_path(&doc, "items.1.id"),
        Some(&serde_json::json!(2))
    );
    assert_eq!(lookup_path(&doc, "items.9.id"), None);
}
