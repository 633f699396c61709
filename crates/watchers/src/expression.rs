// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Expression watcher: evaluates boolean expressions against machine data
//! and facts, transitioning on outcome changes only.

use crate::base::WatcherCore;
use crate::error::{CheckError, ConfigError};
use crate::properties;
use crate::registry::WatcherSpec;
use crate::template;
use crate::util::parse_interval;
use async_trait::async_trait;
use drover_model::{Envelope, MachineError, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const WATCHER_TYPE: &str = "expression";

const MIN_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    SuccessWhen,
    FailWhen,
    NoMatch,
    Skipped,
    Error,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::SuccessWhen => "success_when",
            State::FailWhen => "failed_when",
            State::NoMatch => "no_match",
            State::Skipped => "skipped",
            State::Error => "error",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Properties {
    #[serde(rename = "success_when")]
    success_when: String,
    #[serde(rename = "fail_when")]
    fail_when: String,
}

#[derive(Serialize)]
struct StateNotification {
    #[serde(flatten)]
    event: Envelope,
    previous_outcome: String,
}

pub struct ExpressionWatcher {
    core: WatcherCore,
    properties: Properties,
    interval: Duration,
    previous: Mutex<State>,
}

/// Constructor registered for the `expression` type.
pub fn new(spec: WatcherSpec) -> Result<Arc<dyn Watcher>, ConfigError> {
    Ok(build(spec)? as Arc<dyn Watcher>)
}

fn build(spec: WatcherSpec) -> Result<Arc<ExpressionWatcher>, ConfigError> {
    let props: Properties = properties::decode(&spec.properties)?;

    if props.success_when.is_empty() && props.fail_when.is_empty() {
        return Err(ConfigError::Missing("success_when or fail_when"));
    }

    let interval = parse_interval(&spec.interval, DEFAULT_INTERVAL, MIN_INTERVAL)?;

    let core = WatcherCore::new(
        &spec.name,
        WATCHER_TYPE,
        spec.announce_interval,
        spec.active_states,
        spec.required_states,
        spec.machine,
        &spec.fail_event,
        &spec.success_event,
    )?;

    Ok(Arc::new(ExpressionWatcher {
        core,
        properties: props,
        interval,
        previous: Mutex::new(State::Skipped),
    }))
}

impl ExpressionWatcher {
    fn perform_watch(&self) {
        let (state, err) = self.watch();
        if let Err(e) = self.handle_check(state, err) {
            self.core
                .error(format!("could not handle watcher event: {}", e));
        }
    }

    fn watch(&self) -> (State, Option<CheckError>) {
        if !self.core.should_watch() {
            return (State::Skipped, None);
        }

        let machine = self.core.machine().as_ref();

        if !self.properties.success_when.is_empty() {
            match template::evaluate(machine, &self.properties.success_when) {
                Ok(true) => return (State::SuccessWhen, None),
                Ok(false) => {}
                Err(e) => return (State::Error, Some(e)),
            }
        }

        if !self.properties.fail_when.is_empty() {
            match template::evaluate(machine, &self.properties.fail_when) {
                Ok(true) => return (State::FailWhen, None),
                Ok(false) => {}
                Err(e) => return (State::Error, Some(e)),
            }
        }

        (State::NoMatch, None)
    }

    fn handle_check(&self, state: State, err: Option<CheckError>) -> Result<(), MachineError> {
        let previous = {
            let mut guard = self.previous.lock().unwrap_or_else(|e| e.into_inner());
            let previous = *guard;
            *guard = state;
            previous
        };

        match state {
            State::SuccessWhen => {
                self.core.notify_watcher_state(self.current_state());

                // flip-flop suppression, only the first entry transitions
                if previous != State::SuccessWhen {
                    return self.core.success_transition();
                }

                Ok(())
            }

            State::FailWhen => {
                self.core.notify_watcher_state(self.current_state());

                if previous != State::FailWhen {
                    return self.core.failure_transition();
                }

                Ok(())
            }

            State::Error => {
                if let Some(err) = err {
                    self.core
                        .error(format!("evaluating expressions failed: {}", err));
                }

                self.core.notify_watcher_state(self.current_state());
                Ok(())
            }

            State::NoMatch | State::Skipped => Ok(()),
        }
    }
}

#[async_trait]
impl Watcher for ExpressionWatcher {
    fn name(&self) -> String {
        self.core.name().to_string()
    }

    fn watcher_type(&self) -> String {
        WATCHER_TYPE.to_string()
    }

    fn announce_interval(&self) -> Duration {
        self.core.announce_interval()
    }

    fn notify_state_change(&self) {
        self.core.notify_state_change();
    }

    fn current_state(&self) -> Value {
        let previous = *self.previous.lock().unwrap_or_else(|e| e.into_inner());

        let notification = StateNotification {
            event: Envelope::new(
                self.core.name(),
                WATCHER_TYPE,
                self.core.machine().as_ref(),
            ),
            previous_outcome: previous.name().to_string(),
        };

        serde_json::to_value(notification).unwrap_or(Value::Null)
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.core.info("expression watcher starting");

        let Some(mut signal) = self.core.take_signal() else {
            return;
        };

        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.core.debug("performing watch due to ticker");
                    self.perform_watch();
                }

                Some(()) = signal.recv() => {
                    self.core.debug("performing watch due to state change");
                    self.perform_watch();
                }

                _ = shutdown.cancelled() => {
                    self.core.info("stopping on shutdown");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "expression_tests.rs"]
mod tests;
