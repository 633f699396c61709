// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Switch watchers: externally flippable on/off switches.
//!
//! The http and home assistant variants share one engine. External
//! callers reach `turn_on`/`turn_off` through the HTTP manager; machine
//! state changes that enter the configured on/off states inject
//! NoTransition presses so externally triggered and FSM-driven flips
//! share one code path. NoTransition presses sync and publish state
//! without firing an FSM transition, avoiding transition loops when the
//! FSM itself caused the flip.

use crate::base::WatcherCore;
use crate::error::ConfigError;
use crate::properties::{self, string_list};
use crate::registry::WatcherSpec;
use async_trait::async_trait;
use drover_model::{Envelope, MachineError, SwitchError, SwitchSource, SwitchStatus, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const HTTP_SWITCH_TYPE: &str = "httpswitch";
pub const HOME_ASSISTANT_TYPE: &str = "homeassistant";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unknown,
    On,
    Off,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Unknown => "unknown",
            State::On => "on",
            State::Off => "off",
        }
    }
}

/// A button press travelling through the watcher's event channel. The
/// NoTransition variants are used when an external FSM event already
/// caused the change and only a state sync is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Press {
    On,
    Off,
    OnNoTransition,
    OffNoTransition,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Properties {
    /// Machine states in which the switch reports on
    #[serde(rename = "on_when", deserialize_with = "string_list")]
    on_when: Vec<String>,
    /// Machine states in which the switch reports off
    #[serde(rename = "off_when", deserialize_with = "string_list")]
    off_when: Vec<String>,
    /// Machine states in which the switch stops accepting presses
    #[serde(rename = "disable_when", deserialize_with = "string_list")]
    disable_when: Vec<String>,
    annotations: HashMap<String, String>,
    /// Switch position assumed before any press, "on" or "off"
    #[serde(rename = "initial_state")]
    initial_state: String,
}

#[derive(Serialize)]
struct StateNotification {
    #[serde(flatten)]
    event: Envelope,
    previous_outcome: String,
    is_on: bool,
    annotations: HashMap<String, String>,
}

pub struct SwitchWatcher {
    core: WatcherCore,
    wtype: &'static str,
    properties: Properties,
    press_tx: mpsc::Sender<Press>,
    press_rx: Mutex<Option<mpsc::Receiver<Press>>>,
    previous: Mutex<State>,
    registered: AtomicBool,
}

/// Constructor registered for the `httpswitch` type.
pub fn new_http_switch(spec: WatcherSpec) -> Result<Arc<dyn Watcher>, ConfigError> {
    Ok(build(spec, HTTP_SWITCH_TYPE)? as Arc<dyn Watcher>)
}

/// Constructor registered for the `homeassistant` type.
pub fn new_home_assistant(spec: WatcherSpec) -> Result<Arc<dyn Watcher>, ConfigError> {
    Ok(build(spec, HOME_ASSISTANT_TYPE)? as Arc<dyn Watcher>)
}

fn build(spec: WatcherSpec, wtype: &'static str) -> Result<Arc<SwitchWatcher>, ConfigError> {
    let props: Properties = properties::decode(&spec.properties)?;

    if !props.initial_state.is_empty() && !matches!(props.initial_state.as_str(), "on" | "off") {
        return Err(ConfigError::Invalid(format!(
            "initial_state must be on or off, not {:?}",
            props.initial_state
        )));
    }

    let core = WatcherCore::new(
        &spec.name,
        wtype,
        spec.announce_interval,
        spec.active_states,
        spec.required_states,
        spec.machine,
        &spec.fail_event,
        &spec.success_event,
    )?;

    let (press_tx, press_rx) = mpsc::channel(1);

    Ok(Arc::new(SwitchWatcher {
        core,
        wtype,
        properties: props,
        press_tx,
        press_rx: Mutex::new(Some(press_rx)),
        previous: Mutex::new(State::Unknown),
        registered: AtomicBool::new(false),
    }))
}

impl SwitchWatcher {
    fn previous(&self) -> State {
        *self.previous.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_previous(&self, state: State) {
        *self.previous.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn is_disabled(&self) -> bool {
        let state = self.core.machine().state();
        self.properties.disable_when.iter().any(|s| *s == state)
    }

    fn press(&self, press: Press) -> Result<bool, SwitchError> {
        if self.is_disabled() {
            return Err(SwitchError::Disabled);
        }
        if !self.core.should_watch() {
            return Err(SwitchError::NotActive);
        }

        // a pending press already flips the switch, dropping is fine
        let _ = self.press_tx.try_send(press);

        Ok(true)
    }

    fn handle_press(&self, press: Press) -> Result<(), MachineError> {
        if !self.core.should_watch() {
            return Ok(());
        }

        match press {
            Press::On => {
                self.set_previous(State::On);
                self.core.notify_watcher_state(self.current_state());
                self.core.success_transition()
            }

            Press::OnNoTransition => {
                self.set_previous(State::On);
                self.core.notify_watcher_state(self.current_state());
                Ok(())
            }

            Press::Off => {
                self.set_previous(State::Off);
                self.core.notify_watcher_state(self.current_state());
                self.core.failure_transition()
            }

            Press::OffNoTransition => {
                self.set_previous(State::Off);
                self.core.notify_watcher_state(self.current_state());
                Ok(())
            }
        }
    }

    /// Translate a machine state change into a NoTransition press when
    /// the new state is in the on/off lists.
    fn sync_with_machine_state(&self) {
        let state = self.core.machine().state();

        if self.properties.on_when.iter().any(|s| *s == state) {
            let _ = self.press_tx.try_send(Press::OnNoTransition);
        } else if self.properties.off_when.iter().any(|s| *s == state) {
            let _ = self.press_tx.try_send(Press::OffNoTransition);
        }
    }

    fn register_with_http(self: Arc<Self>) {
        if self.registered.load(Ordering::SeqCst) {
            return;
        }

        if let Some(manager) = self.core.machine().http_manager() {
            manager.add_switch_watcher(
                &self.core.machine().name(),
                Arc::clone(&self) as Arc<dyn SwitchSource>,
            );
            self.registered.store(true, Ordering::SeqCst);
        }
    }

    fn deregister_from_http(&self) {
        if !self.registered.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(manager) = self.core.machine().http_manager() {
            manager.remove_switch_watcher(&self.core.machine().name(), self.core.name());
        }
    }
}

impl SwitchSource for SwitchWatcher {
    fn name(&self) -> String {
        self.core.name().to_string()
    }

    fn status(&self) -> SwitchStatus {
        let previous = self.previous();

        SwitchStatus {
            is_on: previous == State::On,
            status: previous.name().to_string(),
            detail: Some(self.current_state()),
        }
    }

    fn turn_on(&self) -> Result<bool, SwitchError> {
        self.press(Press::On)
    }

    fn turn_off(&self) -> Result<bool, SwitchError> {
        self.press(Press::Off)
    }
}

#[async_trait]
impl Watcher for SwitchWatcher {
    fn name(&self) -> String {
        self.core.name().to_string()
    }

    fn watcher_type(&self) -> String {
        self.wtype.to_string()
    }

    fn announce_interval(&self) -> Duration {
        self.core.announce_interval()
    }

    fn notify_state_change(&self) {
        self.core.notify_state_change();
    }

    fn current_state(&self) -> Value {
        let previous = self.previous();

        let notification = StateNotification {
            event: Envelope::new(self.core.name(), self.wtype, self.core.machine().as_ref()),
            previous_outcome: previous.name().to_string(),
            is_on: previous == State::On,
            annotations: self.properties.annotations.clone(),
        };

        serde_json::to_value(notification).unwrap_or(Value::Null)
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.core.info("switch watcher starting");

        let Some(mut signal) = self.core.take_signal() else {
            return;
        };
        let Some(mut presses) = self
            .press_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return;
        };

        Arc::clone(&self).register_with_http();

        match self.properties.initial_state.as_str() {
            "on" => self.set_previous(State::On),
            "off" => self.set_previous(State::Off),
            _ => {}
        }

        // evaluate the current machine state straight away
        if self.core.should_watch() {
            self.core.notify_state_change();
        }

        loop {
            tokio::select! {
                Some(press) = presses.recv() => {
                    if let Err(e) = self.handle_press(press) {
                        self.core.error(format!("could not handle switch press: {}", e));
                    }
                }

                Some(()) = signal.recv() => self.sync_with_machine_state(),

                _ = shutdown.cancelled() => {
                    self.core.info("stopping on shutdown");
                    self.deregister_from_http();
                    return;
                }
            }
        }
    }

    fn delete(&self) {
        self.deregister_from_http();
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
