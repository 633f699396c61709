// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The machine host: directory scanning and the registry of running
//! machines.

use crate::loader::{HostError, MachineLoader};
use drover_model::Machine;
use drover_watchers::{Manager, WatcherDef, WatcherRegistry};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SCAN_INTERVAL: Duration = Duration::from_secs(10);

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Status of one running machine, for listing without reaching into the
/// FSM internals.
#[derive(Debug, Clone)]
pub struct MachineInfo {
    pub name: String,
    pub version: String,
    pub state: String,
    pub path: PathBuf,
    pub instance_id: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

struct ManagedMachine {
    path: PathBuf,
    loaded_at: chrono::DateTime<chrono::Utc>,
    machine: Arc<dyn Machine>,
    watchers: Vec<WatcherDef>,
    manager: Arc<Manager>,
    token: CancellationToken,
    started: bool,
}

/// Hosts a directory of machines: every direct subdirectory is loaded as
/// a machine and supervised until its directory disappears or the host
/// shuts down. A machine that fails to load is logged and skipped, never
/// fatal to the host.
pub struct Host {
    source: PathBuf,
    loader: Arc<dyn MachineLoader>,
    registry: Arc<WatcherRegistry>,
    scan_interval: Duration,
    machines: Mutex<Vec<ManagedMachine>>,
}

impl Host {
    pub fn new(
        source: impl Into<PathBuf>,
        loader: Arc<dyn MachineLoader>,
        registry: Arc<WatcherRegistry>,
    ) -> Self {
        Self {
            source: source.into(),
            loader,
            registry,
            scan_interval: SCAN_INTERVAL,
            machines: Mutex::new(Vec::new()),
        }
    }

    /// Override the directory rescan cadence.
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    fn is_machine_dir(path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };

        path.is_dir() && !name.starts_with('.') && name != "tmp" && !name.ends_with("-temp")
    }

    fn is_loaded(&self, path: &Path) -> bool {
        locked(&self.machines).iter().any(|m| m.path == path)
    }

    /// Attempt to load every machine directory not yet loaded. Failures
    /// are logged and skipped.
    fn load_from_source(&self) -> Result<(), HostError> {
        if !self.source.is_dir() {
            tracing::debug!(
                source = %self.source.display(),
                "machine source directory does not exist, skipping"
            );
            return Ok(());
        }

        let entries = std::fs::read_dir(&self.source).map_err(HostError::Source)?;

        for entry in entries.flatten() {
            let path = entry.path();

            if !Self::is_machine_dir(&path) || self.is_loaded(&path) {
                continue;
            }

            tracing::info!(path = %path.display(), "attempting to load machine");

            match self.loader.load(&path) {
                Ok(loaded) => {
                    tracing::warn!(
                        machine = %loaded.machine.name(),
                        version = %loaded.machine.version(),
                        path = %path.display(),
                        "loaded machine"
                    );

                    locked(&self.machines).push(ManagedMachine {
                        path,
                        loaded_at: chrono::Utc::now(),
                        machine: loaded.machine,
                        watchers: loaded.watchers,
                        manager: Arc::new(Manager::new(Arc::clone(&self.registry))),
                        token: CancellationToken::new(),
                        started: false,
                    });
                }

                Err(e) => {
                    tracing::error!(path = %path.display(), "could not load machine: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Start managers for machines loaded but not yet running. A machine
    /// whose watchers fail to configure is removed again.
    fn start_machines(&self, shutdown: &CancellationToken) {
        let mut failed: Vec<PathBuf> = Vec::new();

        {
            let mut machines = locked(&self.machines);

            for managed in machines.iter_mut().filter(|m| !m.started) {
                managed.manager.set_machine(Arc::clone(&managed.machine));

                let token = shutdown.child_token();
                managed.token = token.clone();

                match managed.manager.run(&managed.watchers, token) {
                    Ok(()) => managed.started = true,
                    Err(e) => {
                        tracing::error!(
                            machine = %managed.machine.name(),
                            "could not start machine: {}",
                            e
                        );
                        failed.push(managed.path.clone());
                    }
                }
            }

            machines.retain(|m| !failed.contains(&m.path));
        }
    }

    /// Stop and drop machines whose directory disappeared from disk.
    fn clean_missing(&self) {
        let mut machines = locked(&self.machines);

        machines.retain(|managed| {
            if managed.path.exists() {
                return true;
            }

            tracing::info!(
                machine = %managed.machine.name(),
                path = %managed.path.display(),
                "machine no longer on disk, terminating"
            );

            managed.token.cancel();
            managed.manager.delete();

            false
        });
    }

    /// Run the host until the token is cancelled: an initial scan and
    /// start, then a periodic rescan picking up new, changed and removed
    /// machine directories.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), HostError> {
        self.load_from_source()?;
        self.start_machines(&shutdown);

        let mut tick = tokio::time::interval(self.scan_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.clean_missing();
                    if let Err(e) = self.load_from_source() {
                        tracing::error!(source = %self.source.display(), "could not scan machine source: {}", e);
                    }
                    self.start_machines(&shutdown);
                }

                _ = shutdown.cancelled() => {
                    tracing::info!("host stopping on shutdown");
                    self.stop_all();
                    return Ok(());
                }
            }
        }
    }

    fn stop_all(&self) {
        for managed in locked(&self.machines).iter() {
            managed.token.cancel();
            managed.manager.delete();
        }
    }

    /// Status of all running machines.
    pub fn status(&self) -> Vec<MachineInfo> {
        locked(&self.machines)
            .iter()
            .map(|managed| MachineInfo {
                name: managed.machine.name(),
                version: managed.machine.version(),
                state: managed.machine.state(),
                path: managed.path.clone(),
                instance_id: managed.machine.instance_id(),
                start_time: managed.loaded_at,
            })
            .collect()
    }

    /// Fire a transition on a running machine by name and tell its
    /// watchers the state may have changed.
    pub fn transition(&self, machine: &str, event: &str) -> Result<(), HostError> {
        let machines = locked(&self.machines);

        let managed = machines
            .iter()
            .find(|m| m.machine.name() == machine)
            .ok_or_else(|| HostError::UnknownMachine(machine.to_string()))?;

        managed.machine.transition(event)?;
        managed.manager.notify_state_change();

        Ok(())
    }

    /// Current state snapshot of one watcher on one machine.
    pub fn watcher_state(&self, machine: &str, watcher: &str) -> Option<serde_json::Value> {
        locked(&self.machines)
            .iter()
            .find(|m| m.machine.name() == machine)
            .and_then(|m| m.manager.watcher_state(watcher))
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
