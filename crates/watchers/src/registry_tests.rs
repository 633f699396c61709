// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use async_trait::async_trait;
use drover_model::FakeMachine;
use tokio_util::sync::CancellationToken;

struct NullWatcher;

#[async_trait]
impl Watcher for NullWatcher {
    fn name(&self) -> String {
        "null".to_string()
    }

    fn watcher_type(&self) -> String {
        "null".to_string()
    }

    fn announce_interval(&self) -> Duration {
        Duration::ZERO
    }

    fn notify_state_change(&self) {}

    fn current_state(&self) -> Value {
        Value::Null
    }

    async fn run(self: Arc<Self>, _shutdown: CancellationToken) {}
}

fn null_constructor(_spec: WatcherSpec) -> Result<Arc<dyn Watcher>, ConfigError> {
    Ok(Arc::new(NullWatcher))
}

#[test]
fn register_rejects_duplicates() {
    let mut registry = WatcherRegistry::new();

    registry
        .register("custom", Arc::new(null_constructor))
        .unwrap();
    let err = registry
        .register("custom", Arc::new(null_constructor))
        .unwrap_err();

    assert!(err.to_string().contains("already registered"));
}

#[test]
fn builtin_registry_knows_all_types() {
    let registry = WatcherRegistry::with_builtin_watchers();

    assert_eq!(
        registry.known_types(),
        vec![
            "archive",
            "exec",
            "expression",
            "file",
            "gossip",
            "homeassistant",
            "httpswitch",
            "kv",
            "metric",
            "nagios",
            "schedule",
            "timer",
        ]
    );
}

#[test]
fn constructor_dispatch() {
    let mut registry = WatcherRegistry::new();
    registry
        .register("custom", Arc::new(null_constructor))
        .unwrap();

    assert!(registry.constructor("custom").is_some());
    assert!(registry.constructor("missing").is_none());

    let spec = WatcherSpec {
        machine: Arc::new(FakeMachine::new("m1")),
        name: "w1".to_string(),
        active_states: vec![],
        required_states: vec![],
        fail_event: String::new(),
        success_event: String::new(),
        interval: String::new(),
        announce_interval: Duration::ZERO,
        properties: Map::new(),
    };

    let constructor = registry.constructor("custom").unwrap();
    let watcher = constructor(spec).unwrap();
    assert_eq!(watcher.name(), "null");
}
