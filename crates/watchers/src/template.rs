// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Template rendering against a machine's facts and data.
//!
//! Watcher properties like archive sources or gossip subjects may contain
//! `{{ ... }}` templates. They render against a context of the machine's
//! facts, data store and identity, plus a `lookup(query, default)` helper
//! doing dot-path resolution over `{facts, data}`.

use crate::error::CheckError;
use drover_model::Machine;
use minijinja::value::Value as TemplateValue;
use minijinja::Environment;
use serde_json::Value;

/// Resolve a dot-separated path like `facts.os.family` inside a JSON
/// document. Array elements address by index.
fn lookup_path<'a>(root: &'a Value, query: &str) -> Option<&'a Value> {
    let mut current = root;

    for part in query.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn build_env(machine: &dyn Machine) -> Environment<'static> {
    let mut env = Environment::new();

    let searchable = serde_json::json!({
        "facts": machine.facts(),
        "data": machine.data(),
    });

    env.add_function(
        "lookup",
        move |query: String, default: TemplateValue| -> TemplateValue {
            match lookup_path(&searchable, &query) {
                Some(found) => TemplateValue::from_serialize(found),
                None => default,
            }
        },
    );

    env
}

fn build_context(machine: &dyn Machine) -> TemplateValue {
    TemplateValue::from_serialize(serde_json::json!({
        "facts": machine.facts(),
        "data": machine.data(),
        "state": machine.state(),
        "name": machine.name(),
        "identity": machine.identity(),
        "version": machine.version(),
    }))
}

/// Render a template string against the machine context.
pub fn render(machine: &dyn Machine, template: &str) -> Result<String, CheckError> {
    let env = build_env(machine);
    let tmpl = env
        .template_from_str(template)
        .map_err(|e| CheckError::Template(e.to_string()))?;

    tmpl.render(build_context(machine))
        .map_err(|e| CheckError::Template(e.to_string()))
}

/// Evaluate a boolean expression against the machine context.
///
/// Non-boolean results use template truthiness: empty strings, zero and
/// undefined are false.
pub fn evaluate(machine: &dyn Machine, expression: &str) -> Result<bool, CheckError> {
    let env = build_env(machine);
    let compiled = env
        .compile_expression(expression)
        .map_err(|e| CheckError::Template(e.to_string()))?;

    let result = compiled
        .eval(build_context(machine))
        .map_err(|e| CheckError::Template(e.to_string()))?;

    Ok(result.is_true())
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
