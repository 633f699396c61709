// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File watcher: detects modification-time changes on a path.

use crate::base::WatcherCore;
use crate::error::{CheckError, ConfigError};
use crate::properties;
use crate::registry::WatcherSpec;
use crate::util::parse_interval;
use async_trait::async_trait;
use drover_model::{Envelope, MachineError, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

pub const WATCHER_TYPE: &str = "file";

const MIN_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unknown,
    Error,
    Skipped,
    Unchanged,
    Changed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Unknown => "unknown",
            State::Error => "error",
            State::Skipped => "skipped",
            State::Unchanged => "unchanged",
            State::Changed => "changed",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Properties {
    /// Path to watch, relative paths resolve against the machine directory
    path: String,
    /// Record the current mtime before the first check so only later
    /// changes trigger, instead of treating the first sighting as a change
    #[serde(rename = "gather_initial_state")]
    gather_initial_state: bool,
}

#[derive(Serialize)]
struct StateNotification {
    #[serde(flatten)]
    event: Envelope,
    path: String,
    previous_outcome: String,
}

#[derive(Default)]
struct Mutable {
    previous: Option<State>,
    mtime: Option<SystemTime>,
}

pub struct FileWatcher {
    core: WatcherCore,
    properties: Properties,
    path: PathBuf,
    interval: Duration,
    state: Mutex<Mutable>,
}

/// Constructor registered for the `file` type.
pub fn new(spec: WatcherSpec) -> Result<Arc<dyn Watcher>, ConfigError> {
    Ok(build(spec)? as Arc<dyn Watcher>)
}

fn build(spec: WatcherSpec) -> Result<Arc<FileWatcher>, ConfigError> {
    let props: Properties = properties::decode(&spec.properties)?;

    if props.path.is_empty() {
        return Err(ConfigError::Missing("path"));
    }

    let interval = parse_interval(&spec.interval, DEFAULT_INTERVAL, MIN_INTERVAL)?;

    let path = PathBuf::from(&props.path);
    let path = if path.is_absolute() {
        path
    } else {
        spec.machine.directory().join(path)
    };

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

    Ok(Arc::new(FileWatcher {
        core,
        properties: props,
        path,
        interval,
        state: Mutex::new(Mutable::default()),
    }))
}

impl FileWatcher {
    fn mutable(&self) -> std::sync::MutexGuard<'_, Mutable> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn perform_watch(&self) {
        let (state, err) = self.watch();
        if let Err(e) = self.handle_check(state, err) {
            self.core
                .error(format!("could not handle watcher event: {}", e));
        }
    }

    fn watch(&self) -> (State, Option<CheckError>) {
        if !self.core.should_watch() {
            // keep the tracked mtime, a change while skipped still
            // notifies once we are eligible again
            return (State::Skipped, None);
        }

        let mut mutable = self.mutable();

        match std::fs::metadata(&self.path) {
            Ok(stat) => {
                let mtime = stat.modified().ok();

                match (mutable.mtime, mtime) {
                    (Some(tracked), Some(current)) if current > tracked => {
                        mutable.mtime = Some(current);
                        (State::Changed, None)
                    }
                    (None, Some(current)) => {
                        mutable.mtime = Some(current);
                        (State::Changed, None)
                    }
                    _ => (State::Unchanged, None),
                }
            }

            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                mutable.mtime = None;
                (
                    State::Error,
                    Some(CheckError::Other("does not exist".to_string())),
                )
            }

            Err(e) => {
                mutable.mtime = None;
                (State::Error, Some(CheckError::Io(e)))
            }
        }
    }

    fn handle_check(&self, state: State, err: Option<CheckError>) -> Result<(), MachineError> {
        self.core.debug(format!(
            "handling check for {} {} {:?}",
            self.path.display(),
            state.name(),
            err
        ));

        self.mutable().previous = Some(state);

        match state {
            State::Error => {
                self.core.notify_watcher_state(self.current_state());
                self.core.failure_transition()
            }

            State::Changed => {
                self.core.notify_watcher_state(self.current_state());
                self.core.success_transition()
            }

            // not notifying, regular announces happen
            State::Unchanged | State::Skipped => Ok(()),

            State::Unknown => {
                self.mutable().mtime = None;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Watcher for FileWatcher {
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
        let notification = StateNotification {
            event: Envelope::new(
                self.core.name(),
                WATCHER_TYPE,
                self.core.machine().as_ref(),
            ),
            path: self.path.display().to_string(),
            previous_outcome: self
                .mutable()
                .previous
                .map(|s| s.name().to_string())
                .unwrap_or_else(|| State::Unknown.name().to_string()),
        };

        serde_json::to_value(notification).unwrap_or(Value::Null)
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.core
            .info(format!("file watcher for {} starting", self.path.display()));

        let Some(mut signal) = self.core.take_signal() else {
            return;
        };

        if self.properties.gather_initial_state {
            if let Ok(stat) = std::fs::metadata(&self.path) {
                self.mutable().mtime = stat.modified().ok();
            }
        }

        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => self.perform_watch(),

                Some(()) = signal.recv() => self.perform_watch(),

                _ = shutdown.cancelled() => {
                    self.core.info("stopping on shutdown");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
