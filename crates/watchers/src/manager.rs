// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-machine watcher manager.
//!
//! One manager supervises all watchers of one machine: it instantiates
//! them from their definitions through the registry, starts each under its
//! own task, runs an announce ticker per watcher that wants one, and fans
//! machine state changes out to every watcher. All tasks share the
//! machine's cancellation token; cancelling it is the only shutdown
//! signal.

use crate::def::WatcherDef;
use crate::error::ManagerError;
use crate::registry::{WatcherRegistry, WatcherSpec};
use drover_model::{Machine, Watcher};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Manages the watchers of a single machine.
pub struct Manager {
    registry: Arc<WatcherRegistry>,
    machine: Mutex<Option<Arc<dyn Machine>>>,
    watchers: Mutex<HashMap<String, Arc<dyn Watcher>>>,
}

impl Manager {
    pub fn new(registry: Arc<WatcherRegistry>) -> Self {
        Self {
            registry,
            machine: Mutex::new(None),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Bind the machine this manager will manage.
    pub fn set_machine(&self, machine: Arc<dyn Machine>) {
        *locked(&self.machine) = Some(machine);
    }

    fn bound_machine(&self) -> Result<Arc<dyn Machine>, ManagerError> {
        locked(&self.machine).clone().ok_or(ManagerError::NoMachine)
    }

    /// Add a watcher, enforcing name uniqueness within the machine.
    pub fn add_watcher(&self, watcher: Arc<dyn Watcher>) -> Result<(), ManagerError> {
        let mut watchers = locked(&self.watchers);

        if watchers.contains_key(&watcher.name()) {
            return Err(ManagerError::DuplicateWatcher(watcher.name()));
        }

        watchers.insert(watcher.name(), watcher);

        Ok(())
    }

    /// Current state snapshot for a watcher, None for unknown names.
    pub fn watcher_state(&self, name: &str) -> Option<Value> {
        locked(&self.watchers).get(name).map(|w| w.current_state())
    }

    /// Names of the managed watchers, sorted.
    pub fn watcher_names(&self) -> Vec<String> {
        let mut names: Vec<String> = locked(&self.watchers).keys().cloned().collect();
        names.sort();
        names
    }

    /// Tell every watcher the machine changed state so eligibility is
    /// re-evaluated now rather than at the next tick.
    pub fn notify_state_change(&self) {
        for watcher in locked(&self.watchers).values() {
            watcher.notify_state_change();
        }
    }

    /// Release external registrations held by the watchers. Called after
    /// the shared token was cancelled, before the machine is dropped.
    pub fn delete(&self) {
        if let Ok(machine) = self.bound_machine() {
            tracing::info!(machine = %machine.name(), "stopping manager");
        }

        for watcher in locked(&self.watchers).values() {
            watcher.delete();
        }
    }

    fn configure_watchers(&self, defs: &[WatcherDef]) -> Result<(), ManagerError> {
        let machine = self.bound_machine()?;

        for def in defs {
            let announce =
                def.parse_announce_interval()
                    .map_err(|e| ManagerError::Construction {
                        wtype: def.watcher_type.clone(),
                        name: def.name.clone(),
                        source: e,
                    })?;

            tracing::info!(
                machine = %machine.name(),
                watcher = %def.name,
                "starting {} watcher",
                def.watcher_type
            );

            let constructor = self
                .registry
                .constructor(&def.watcher_type)
                .ok_or_else(|| ManagerError::UnknownType(def.watcher_type.clone()))?;

            let watcher = constructor(WatcherSpec {
                machine: Arc::clone(&machine),
                name: def.name.clone(),
                active_states: def.state_match.clone(),
                required_states: def.required_states.clone(),
                fail_event: def.fail_transition.clone(),
                success_event: def.success_transition.clone(),
                interval: def.interval.clone(),
                announce_interval: announce,
                properties: def.properties.clone(),
            })
            .map_err(|e| ManagerError::Construction {
                wtype: def.watcher_type.clone(),
                name: def.name.clone(),
                source: e,
            })?;

            self.add_watcher(watcher)?;
        }

        Ok(())
    }

    /// Configure all defined watchers and start them.
    ///
    /// Each watcher runs on its own task; watchers with an announce
    /// interval get a second task republishing their current state on a
    /// fixed tick whether or not anything changed, which doubles as a
    /// liveness heartbeat for external consumers. All tasks stop when the
    /// token is cancelled.
    pub fn run(&self, defs: &[WatcherDef], shutdown: CancellationToken) -> Result<(), ManagerError> {
        let machine = self.bound_machine()?;

        self.configure_watchers(defs)?;

        for watcher in locked(&self.watchers).values() {
            tokio::spawn(Arc::clone(watcher).run(shutdown.clone()));

            if watcher.announce_interval() > std::time::Duration::ZERO {
                tokio::spawn(announce_watcher_state(
                    Arc::clone(&machine),
                    Arc::clone(watcher),
                    shutdown.clone(),
                ));
            }
        }

        Ok(())
    }
}

async fn announce_watcher_state(
    machine: Arc<dyn Machine>,
    watcher: Arc<dyn Watcher>,
    shutdown: CancellationToken,
) {
    let mut tick = tokio::time::interval(watcher.announce_interval());
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // the first tick of a tokio interval fires immediately, announcing
    // starts one interval in
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                machine.notify_watcher_state(&watcher.name(), watcher.current_state());
            }

            _ = shutdown.cancelled() => {
                tracing::info!(machine = %machine.name(), watcher = %watcher.name(), "stopping announces on shutdown");
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
