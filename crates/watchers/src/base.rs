// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The base every watcher type embeds.
//!
//! Carries the fields and behaviors shared by all watchers: name and type
//! tag, eligibility gating against the machine state and required foreign
//! machine states, fail/success transition helpers, the pending re-check
//! signal, templating and governor entry.

use crate::error::{CheckError, ConfigError};
use crate::template;
use drover_model::{ForeignMachineState, GovernorSlot, Machine, MachineError};
use serde_json::Value;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

impl std::fmt::Debug for WatcherCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherCore").finish_non_exhaustive()
    }
}

/// Common state shared by every watcher type.
pub struct WatcherCore {
    name: String,
    wtype: String,
    machine: Arc<dyn Machine>,
    active_states: Vec<String>,
    required_states: Vec<ForeignMachineState>,
    fail_event: String,
    success_event: String,
    announce_interval: Duration,
    signal_tx: mpsc::Sender<()>,
    signal_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl WatcherCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        wtype: &str,
        announce_interval: Duration,
        active_states: Vec<String>,
        required_states: Vec<ForeignMachineState>,
        machine: Arc<dyn Machine>,
        fail_event: &str,
        success_event: &str,
    ) -> Result<Self, ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::Missing("name"));
        }
        if wtype.is_empty() {
            return Err(ConfigError::Missing("watcher type"));
        }

        // capacity 1: a pending signal already means "re-check", further
        // signals are dropped rather than queued
        let (signal_tx, signal_rx) = mpsc::channel(1);

        Ok(Self {
            name: name.to_string(),
            wtype: wtype.to_string(),
            machine,
            active_states,
            required_states,
            fail_event: fail_event.to_string(),
            success_event: success_event.to_string(),
            announce_interval,
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn watcher_type(&self) -> &str {
        &self.wtype
    }

    pub fn announce_interval(&self) -> Duration {
        self.announce_interval
    }

    pub fn machine(&self) -> &Arc<dyn Machine> {
        &self.machine
    }

    pub fn success_event(&self) -> &str {
        &self.success_event
    }

    pub fn fail_event(&self) -> &str {
        &self.fail_event
    }

    /// Signal that eligibility should be re-evaluated. Non-blocking: when
    /// a signal is already pending this one is dropped.
    pub fn notify_state_change(&self) {
        let _ = self.signal_tx.try_send(());
    }

    /// Take the receiving side of the state-change signal. The run loop
    /// calls this exactly once; later calls return None.
    pub fn take_signal(&self) -> Option<mpsc::Receiver<()>> {
        self.signal_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// True when a pending signal has not been consumed yet. Test hook.
    pub fn signal_pending(&self) -> bool {
        self.signal_tx.capacity() == 0
    }

    /// Whether this watcher may run checks right now.
    ///
    /// Eligible when the machine state is in the active-state list (an
    /// empty list means always eligible) AND every required foreign
    /// machine reports its expected state. A lookup failure on any entry
    /// makes the watcher ineligible.
    pub fn should_watch(&self) -> bool {
        if !self.active_states.is_empty() {
            let current = self.machine.state();
            if !self.active_states.iter().any(|s| *s == current) {
                return false;
            }
        }

        for required in &self.required_states {
            match self
                .machine
                .lookup_external_machine_state(&required.machine_name)
            {
                Ok(state) if state == required.machine_state => {}
                Ok(state) => {
                    self.debug(format!(
                        "machine {} is in state {} not {}",
                        required.machine_name, state, required.machine_state
                    ));
                    return false;
                }
                Err(e) => {
                    self.debug(format!(
                        "could not resolve state of machine {}: {}",
                        required.machine_name, e
                    ));
                    return false;
                }
            }
        }

        true
    }

    /// Fire an arbitrary transition, a no-op for empty event names.
    pub fn transition(&self, event: &str) -> Result<(), MachineError> {
        if event.is_empty() {
            return Ok(());
        }

        self.machine.transition(event)
    }

    /// Fire the configured success transition, if any.
    pub fn success_transition(&self) -> Result<(), MachineError> {
        if self.success_event.is_empty() {
            return Ok(());
        }

        self.info(format!(
            "success transitioning using {} event",
            self.success_event
        ));
        self.machine.transition(&self.success_event)
    }

    /// Fire the configured fail transition, if any.
    pub fn failure_transition(&self) -> Result<(), MachineError> {
        if self.fail_event.is_empty() {
            return Ok(());
        }

        self.info(format!(
            "fail transitioning using {} event",
            self.fail_event
        ));
        self.machine.transition(&self.fail_event)
    }

    /// Deliver a state snapshot to the machine's notification sinks.
    pub fn notify_watcher_state(&self, state: Value) {
        self.machine.notify_watcher_state(&self.name, state);
    }

    /// Render a template against the machine's facts and data.
    pub fn process_template(&self, template: &str) -> Result<String, CheckError> {
        template::render(self.machine.as_ref(), template)
    }

    /// Acquire a slot in the named governor. The name is itself a
    /// template. The slot releases on drop.
    pub async fn enter_governor(
        &self,
        name: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<GovernorSlot, CheckError> {
        let name = self.process_template(name)?;

        let Some(governor) = self.machine.governor() else {
            return Err(CheckError::Machine(MachineError::CapabilityUnavailable(
                "governor".to_string(),
            )));
        };

        self.info(format!(
            "obtaining a slot in the {} governor with {:?} timeout",
            name, timeout
        ));

        Ok(governor.acquire(&name, timeout, cancel).await?)
    }

    /// Write the machine facts to a temp file for child processes. The
    /// file is removed when the returned handle drops.
    pub fn facts_file(&self) -> Result<tempfile::NamedTempFile, CheckError> {
        let mut file = tempfile::NamedTempFile::new()?;
        serde_json::to_writer(&mut file, &self.machine.facts())
            .map_err(|e| CheckError::Other(e.to_string()))?;
        file.flush()?;

        Ok(file)
    }

    /// Write a copy of the machine data to a temp file for child
    /// processes. The file is removed when the returned handle drops.
    pub fn data_file(&self) -> Result<tempfile::NamedTempFile, CheckError> {
        let mut file = tempfile::NamedTempFile::new()?;
        serde_json::to_writer(&mut file, &self.machine.data())
            .map_err(|e| CheckError::Other(e.to_string()))?;
        file.flush()?;

        Ok(file)
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        tracing::debug!(machine = %self.machine.name(), watcher = %self.name, "{}", message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        tracing::info!(machine = %self.machine.name(), watcher = %self.name, "{}", message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        tracing::warn!(machine = %self.machine.name(), watcher = %self.name, "{}", message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        tracing::error!(machine = %self.machine.name(), watcher = %self.name, "{}", message.as_ref());
    }
}

#[cfg(test)]
#[path = "base_tests.rs"]
mod tests;
