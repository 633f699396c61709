// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exec watcher: runs an external command and maps its exit status to
//! success or failure transitions.

use crate::base::WatcherCore;
use crate::error::{CheckError, ConfigError};
use crate::properties::{self, lenient_duration, string_list, zero_duration};
use crate::registry::WatcherSpec;
use crate::util::parse_interval;
use async_trait::async_trait;
use drover_model::{Envelope, MachineError, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const WATCHER_TYPE: &str = "exec";

const MIN_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_GOVERNOR_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const MAX_INITIAL_SPLAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unknown,
    Skipped,
    Error,
    Success,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Unknown => "unknown",
            State::Skipped => "skipped",
            State::Error => "error",
            State::Success => "success",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Properties {
    command: String,
    #[serde(deserialize_with = "string_list")]
    environment: Vec<String>,
    governor: String,
    #[serde(
        rename = "governor_timeout",
        deserialize_with = "lenient_duration",
        default = "zero_duration"
    )]
    governor_timeout: Duration,
    #[serde(rename = "parse_as_data")]
    output_as_data: bool,
    #[serde(rename = "suppress_success_announce")]
    suppress_success_announce: bool,
    #[serde(rename = "gather_initial_state")]
    gather_initial_state: bool,
    #[serde(deserialize_with = "lenient_duration", default = "zero_duration")]
    timeout: Duration,
}

#[derive(Serialize)]
struct StateNotification {
    #[serde(flatten)]
    event: Envelope,
    command: String,
    previous_outcome: String,
    previous_run_time: i64,
}

#[derive(Default)]
struct Mutable {
    previous: Option<State>,
    previous_run_time: Duration,
    last_watch: Option<Instant>,
}

impl std::fmt::Debug for ExecWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecWatcher").finish_non_exhaustive()
    }
}

pub struct ExecWatcher {
    core: WatcherCore,
    properties: Properties,
    interval: Duration,
    state: Mutex<Mutable>,
    watch_guard: tokio::sync::Mutex<()>,
}

/// Constructor registered for the `exec` type.
pub fn new(spec: WatcherSpec) -> Result<Arc<dyn Watcher>, ConfigError> {
    Ok(build(spec)? as Arc<dyn Watcher>)
}

fn build(spec: WatcherSpec) -> Result<Arc<ExecWatcher>, ConfigError> {
    let mut props: Properties = properties::decode(&spec.properties)?;

    if props.command.is_empty() {
        return Err(ConfigError::Missing("command"));
    }
    if props.timeout.is_zero() {
        props.timeout = DEFAULT_TIMEOUT;
    }
    if !props.governor.is_empty() && props.governor_timeout.is_zero() {
        props.governor_timeout = DEFAULT_GOVERNOR_TIMEOUT;
    }

    let interval = if spec.interval.trim().is_empty() {
        Duration::ZERO
    } else {
        parse_interval(&spec.interval, MIN_INTERVAL, MIN_INTERVAL)?
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

    Ok(Arc::new(ExecWatcher {
        core,
        properties: props,
        interval,
        state: Mutex::new(Mutable::default()),
        watch_guard: tokio::sync::Mutex::new(()),
    }))
}

impl ExecWatcher {
    fn mutable(&self) -> std::sync::MutexGuard<'_, Mutable> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn perform_watch(&self, shutdown: &CancellationToken, force: bool) {
        let _latch = self.watch_guard.lock().await;

        if !force {
            let last = self.mutable().last_watch;
            if let Some(last) = last {
                if last.elapsed() < self.interval {
                    return;
                }
            }
        }
        self.mutable().last_watch = Some(Instant::now());

        let (state, err) = self.watch(shutdown).await;
        if let Err(e) = self.handle_check(state, err) {
            self.core
                .error(format!("could not handle watcher event: {}", e));
        }
    }

    fn handle_check(&self, state: State, err: Option<CheckError>) -> Result<(), MachineError> {
        self.core.debug(format!(
            "handling check for {} {} {:?}",
            self.properties.command,
            state.name(),
            err
        ));

        self.mutable().previous = Some(state);

        match state {
            State::Error => {
                if let Some(err) = err {
                    self.core.error(format!("check failed: {}", err));
                }

                self.core.notify_watcher_state(self.current_state());
                self.core.failure_transition()
            }

            State::Success => {
                if !self.properties.suppress_success_announce {
                    self.core.notify_watcher_state(self.current_state());
                }

                self.core.success_transition()
            }

            State::Unknown | State::Skipped => Ok(()),
        }
    }

    async fn watch(&self, shutdown: &CancellationToken) -> (State, Option<CheckError>) {
        if !self.core.should_watch() {
            return (State::Skipped, None);
        }

        let _slot = if self.properties.governor.is_empty() {
            None
        } else {
            match self
                .core
                .enter_governor(
                    &self.properties.governor,
                    self.properties.governor_timeout,
                    shutdown.clone(),
                )
                .await
            {
                Ok(slot) => Some(slot),
                Err(e) => {
                    self.core.error(format!(
                        "cannot enter governor {}: {}",
                        self.properties.governor, e
                    ));
                    return (State::Error, Some(e));
                }
            }
        };

        let start = Instant::now();
        let result = self.execute().await;
        self.mutable().previous_run_time = start.elapsed();

        match result {
            Ok(()) => (State::Success, None),
            Err(e) => {
                self.core
                    .error(format!("exec watcher {} failed: {}", self.properties.command, e));
                (State::Error, Some(e))
            }
        }
    }

    async fn execute(&self) -> Result<(), CheckError> {
        let command = self.core.process_template(&self.properties.command)?;

        let parts = shlex::split(&command)
            .ok_or_else(|| CheckError::Command(format!("invalid command {:?}", command)))?;
        let Some((program, args)) = parts.split_first() else {
            return Err(CheckError::Command(format!("invalid command {:?}", command)));
        };

        let data_file = self.core.data_file()?;
        let facts_file = self.core.facts_file()?;

        let machine = self.core.machine();
        let directory = machine.directory();
        let path = std::env::var("PATH").unwrap_or_default();
        let path_sep = if cfg!(windows) { ";" } else { ":" };

        self.core.info(format!("running {}", command));

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(&directory)
            .env_clear()
            .env("MACHINE_WATCHER_NAME", self.core.name())
            .env("MACHINE_NAME", machine.name())
            .env(
                "PATH",
                format!("{}{}{}", path, path_sep, directory.display()),
            )
            .env("WATCHER_DATA", data_file.path())
            .env("WATCHER_FACTS", facts_file.path())
            .kill_on_drop(true);

        for entry in &self.properties.environment {
            let entry = self.core.process_template(entry)?;
            let Some((key, value)) = entry.split_once('=') else {
                return Err(CheckError::Command(format!(
                    "invalid environment entry {:?}",
                    entry
                )));
            };
            cmd.env(key, value);
        }

        let output = tokio::time::timeout(self.properties.timeout, cmd.output())
            .await
            .map_err(|_| CheckError::Timeout(self.properties.timeout))?
            .map_err(|e| CheckError::Command(e.to_string()))?;

        if !output.status.success() {
            return Err(CheckError::Command(format!(
                "exited with {}",
                output.status
            )));
        }

        self.core.debug(format!(
            "output from {}: {}",
            command,
            String::from_utf8_lossy(&output.stdout)
        ));

        if self.properties.output_as_data {
            self.store_output_as_data(&output.stdout)?;
        }

        Ok(())
    }

    fn store_output_as_data(&self, output: &[u8]) -> Result<(), CheckError> {
        let data: std::collections::HashMap<String, String> = serde_json::from_slice(output)
            .map_err(|e| CheckError::Other(format!("could not parse output data: {}", e)))?;

        for (key, value) in data {
            self.core.machine().data_put(&key, Value::String(value))?;
        }

        Ok(())
    }
}

#[async_trait]
impl Watcher for ExecWatcher {
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
        let mutable = self.mutable();

        let notification = StateNotification {
            event: Envelope::new(
                self.core.name(),
                WATCHER_TYPE,
                self.core.machine().as_ref(),
            ),
            command: self.properties.command.clone(),
            previous_outcome: mutable
                .previous
                .map(|s| s.name().to_string())
                .unwrap_or_else(|| State::Unknown.name().to_string()),
            previous_run_time: mutable.previous_run_time.as_nanos() as i64,
        };

        serde_json::to_value(notification).unwrap_or(Value::Null)
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.core
            .info(format!("exec watcher for {} starting", self.properties.command));

        let Some(mut signal) = self.core.take_signal() else {
            return;
        };

        if !self.interval.is_zero() {
            let watcher = Arc::clone(&self);
            let token = shutdown.clone();
            tokio::spawn(async move {
                if watcher.properties.gather_initial_state {
                    let splay = rand::Rng::gen_range(
                        &mut rand::thread_rng(),
                        Duration::from_secs(1)..MAX_INITIAL_SPLAY,
                    );
                    watcher
                        .core
                        .info(format!("performing initial execution after {:?}", splay));

                    tokio::select! {
                        _ = tokio::time::sleep(splay) => watcher.perform_watch(&token, false).await,
                        _ = token.cancelled() => return,
                    }
                }

                let mut tick = tokio::time::interval(watcher.interval);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                tick.tick().await;

                loop {
                    tokio::select! {
                        _ = tick.tick() => watcher.perform_watch(&token, false).await,
                        _ = token.cancelled() => return,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                Some(()) = signal.recv() => self.perform_watch(&shutdown, true).await,

                _ = shutdown.cancelled() => {
                    self.core.info("stopping on shutdown");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "exec_tests.rs"]
mod tests;
