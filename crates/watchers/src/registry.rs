// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watcher type registry.
//!
//! Maps type tags to constructors. The registry is an explicit object
//! owned by the host and handed to each manager, not process-global
//! state; registering the same type twice is a fail-fast configuration
//! error.

use crate::error::ConfigError;
use drover_model::{ForeignMachineState, Machine, Watcher};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything a watcher constructor needs, uniform across all types.
pub struct WatcherSpec {
    pub machine: Arc<dyn Machine>,
    pub name: String,
    /// FSM states in which checks run, empty means always
    pub active_states: Vec<String>,
    /// Foreign machine states that must all hold
    pub required_states: Vec<ForeignMachineState>,
    pub fail_event: String,
    pub success_event: String,
    /// Raw interval string, parsed per type with per-type minimums
    pub interval: String,
    pub announce_interval: Duration,
    pub properties: Map<String, Value>,
}

/// Constructs a watcher from its resolved definition.
pub type WatcherConstructor =
    Arc<dyn Fn(WatcherSpec) -> Result<Arc<dyn Watcher>, ConfigError> + Send + Sync>;

/// Registry of watcher constructors keyed by type tag.
#[derive(Default)]
pub struct WatcherRegistry {
    constructors: HashMap<String, WatcherConstructor>,
}

impl WatcherRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in watcher type registered.
    pub fn with_builtin_watchers() -> Self {
        let mut registry = Self::new();

        let builtins: [(&str, WatcherConstructor); 12] = [
            (crate::exec::WATCHER_TYPE, Arc::new(crate::exec::new)),
            (crate::file::WATCHER_TYPE, Arc::new(crate::file::new)),
            (crate::archive::WATCHER_TYPE, Arc::new(crate::archive::new)),
            (
                crate::schedule::WATCHER_TYPE,
                Arc::new(crate::schedule::new),
            ),
            (
                crate::expression::WATCHER_TYPE,
                Arc::new(crate::expression::new),
            ),
            (crate::timer::WATCHER_TYPE, Arc::new(crate::timer::new)),
            (crate::kv::WATCHER_TYPE, Arc::new(crate::kv::new)),
            (crate::gossip::WATCHER_TYPE, Arc::new(crate::gossip::new)),
            (
                crate::switches::HTTP_SWITCH_TYPE,
                Arc::new(crate::switches::new_http_switch),
            ),
            (
                crate::switches::HOME_ASSISTANT_TYPE,
                Arc::new(crate::switches::new_home_assistant),
            ),
            (crate::nagios::WATCHER_TYPE, Arc::new(crate::nagios::new)),
            (crate::metric::WATCHER_TYPE, Arc::new(crate::metric::new)),
        ];

        for (wtype, constructor) in builtins {
            // the names are distinct literals, registration cannot fail
            let _ = registry.register(wtype, constructor);
        }

        registry
    }

    /// Register a constructor for a type tag. Registering a tag twice is
    /// an error.
    pub fn register(
        &mut self,
        wtype: &str,
        constructor: WatcherConstructor,
    ) -> Result<(), ConfigError> {
        if self.constructors.contains_key(wtype) {
            return Err(ConfigError::Invalid(format!(
                "watcher type {} is already registered",
                wtype
            )));
        }

        self.constructors.insert(wtype.to_string(), constructor);

        Ok(())
    }

    /// Look up the constructor for a type tag.
    pub fn constructor(&self, wtype: &str) -> Option<WatcherConstructor> {
        self.constructors.get(wtype).cloned()
    }

    /// The registered type tags, sorted.
    pub fn known_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
