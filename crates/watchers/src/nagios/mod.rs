// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Nagios watcher: runs nagios-protocol health checks and exports their
//! status.
//!
//! Checks are either an external plugin command or a builtin. Exit codes
//! 0..3 map to OK, WARNING, CRITICAL and UNKNOWN; anything else is
//! UNKNOWN. The FSM transition fired is the state name itself, letting
//! machine state graphs mirror the nagios states directly.

pub mod builtin;
pub mod prometheus;

use crate::base::WatcherCore;
use crate::error::{CheckError, ConfigError};
use crate::properties::{self, lenient_duration, zero_duration};
use crate::registry::WatcherSpec;
use crate::util::{parse_interval, parse_perf_data, PerfData};
use async_trait::async_trait;
use drover_model::{Envelope, MachineError, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const WATCHER_TYPE: &str = "nagios";

const MIN_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
/// Re-checks this close to the previous one are suppressed, so a check
/// arriving marginally early (announce ticks, state flaps) does not
/// double-run the plugin.
const EARLY_RECHECK_GRACE: Duration = Duration::from_secs(1);
const MAX_HISTORY: usize = 15;

/// Machine state that forces an immediate check regardless of spacing.
const FORCE_CHECK_STATE: &str = "FORCE_CHECK";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ok,
    Warning,
    Critical,
    Unknown,
    /// Internal: the watcher was not eligible, no publish or transition
    Skipped,
    /// Internal: no check has run yet
    NotChecked,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Ok => "OK",
            State::Warning => "WARNING",
            State::Critical => "CRITICAL",
            State::Unknown => "UNKNOWN",
            State::Skipped => "SKIPPED",
            State::NotChecked => "NOTCHECKED",
        }
    }

    fn code(&self) -> i32 {
        match self {
            State::Ok => 0,
            State::Warning => 1,
            State::Critical => 2,
            State::Unknown => 3,
            State::Skipped => 4,
            State::NotChecked => 5,
        }
    }

    /// Map a plugin exit code onto a state, unknown codes are UNKNOWN.
    pub fn from_exit_code(code: i32) -> State {
        match code {
            0 => State::Ok,
            1 => State::Warning,
            2 => State::Critical,
            _ => State::Unknown,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Properties {
    annotations: HashMap<String, String>,
    /// External plugin command line
    plugin: String,
    /// Name of a builtin check instead of a plugin
    builtin: String,
    /// Status file read by the status_file builtin
    #[serde(rename = "status_file")]
    status_file: String,
    /// Maximum age of the last processed message for status_file
    #[serde(
        rename = "last_message",
        deserialize_with = "lenient_duration",
        default = "zero_duration"
    )]
    last_message: Duration,
    #[serde(deserialize_with = "lenient_duration", default = "zero_duration")]
    timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
struct Execution {
    execute: chrono::DateTime<chrono::Utc>,
    status: i32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    perfdata: Vec<PerfData>,
}

#[derive(Serialize)]
struct StateNotification {
    #[serde(flatten)]
    event: Envelope,
    plugin: String,
    status: String,
    status_code: i32,
    output: String,
    perfdata: Vec<PerfData>,
    runtime: f64,
    history: Vec<Execution>,
    annotations: HashMap<String, String>,
    check_time: i64,
}

struct Mutable {
    previous: State,
    previous_run_time: Duration,
    previous_output: String,
    previous_perf_data: Vec<PerfData>,
    previous_plugin: String,
    previous_check: Option<Instant>,
    previous_check_time: Option<chrono::DateTime<chrono::Utc>>,
    history: Vec<Execution>,
    force: bool,
    watching: bool,
}

impl std::fmt::Debug for NagiosWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NagiosWatcher").finish_non_exhaustive()
    }
}

pub struct NagiosWatcher {
    core: WatcherCore,
    properties: Properties,
    interval: Duration,
    machine_name: String,
    text_file_dir: Option<PathBuf>,
    state: Mutex<Mutable>,
}

/// Constructor registered for the `nagios` type.
pub fn new(spec: WatcherSpec) -> Result<Arc<dyn Watcher>, ConfigError> {
    Ok(build(spec)? as Arc<dyn Watcher>)
}

fn build(spec: WatcherSpec) -> Result<Arc<NagiosWatcher>, ConfigError> {
    let mut props: Properties = properties::decode(&spec.properties)?;

    if !props.builtin.is_empty() && !props.plugin.is_empty() {
        return Err(ConfigError::Invalid(
            "cannot set plugin and builtin".to_string(),
        ));
    }
    if props.builtin.is_empty() && props.plugin.is_empty() {
        return Err(ConfigError::Missing("plugin or builtin"));
    }
    if !props.builtin.is_empty()
        && !matches!(props.builtin.as_str(), builtin::HEARTBEAT | builtin::STATUS_FILE)
    {
        return Err(ConfigError::Invalid(format!(
            "unsupported builtin {:?}",
            props.builtin
        )));
    }
    if props.builtin == builtin::STATUS_FILE {
        if props.status_file.is_empty() {
            return Err(ConfigError::Missing("status_file"));
        }
        if props.last_message.is_zero() {
            return Err(ConfigError::Missing("last_message"));
        }
    }
    if props.timeout.is_zero() {
        props.timeout = DEFAULT_TIMEOUT;
    }

    let interval = parse_interval(&spec.interval, DEFAULT_INTERVAL, MIN_INTERVAL)?;

    let machine_name = spec.machine.name();
    let text_file_dir = spec.machine.text_file_directory();

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

    let watcher = Arc::new(NagiosWatcher {
        core,
        properties: props,
        interval,
        machine_name,
        text_file_dir: text_file_dir.clone(),
        state: Mutex::new(Mutable {
            previous: State::NotChecked,
            previous_run_time: Duration::ZERO,
            previous_output: String::new(),
            previous_perf_data: Vec::new(),
            previous_plugin: String::new(),
            previous_check: None,
            previous_check_time: None,
            history: Vec::new(),
            force: false,
            watching: false,
        }),
    });

    if let Err(e) = prometheus::update_status(
        &watcher.machine_name,
        watcher.core.name(),
        State::Unknown.code(),
        text_file_dir.as_deref(),
    ) {
        watcher
            .core
            .error(format!("could not update prometheus: {}", e));
    }

    Ok(watcher)
}

impl NagiosWatcher {
    fn mutable(&self) -> std::sync::MutexGuard<'_, Mutable> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Eligibility with nagios-specific spacing: a forced check always
    /// runs, otherwise re-checks sooner than the interval less a small
    /// grace are suppressed.
    fn should_check(&self) -> bool {
        {
            let mut mutable = self.mutable();
            if mutable.force {
                mutable.force = false;
                return true;
            }

            if let Some(previous) = mutable.previous_check {
                let spacing = self.interval.saturating_sub(EARLY_RECHECK_GRACE);
                if previous.elapsed() < spacing {
                    self.core.debug(format!(
                        "skipping check {:?} after the previous one",
                        previous.elapsed()
                    ));
                    return false;
                }
            }
        }

        self.core.should_watch()
    }

    fn update_prometheus(&self, state: State) {
        if let Err(e) = prometheus::update_status(
            &self.machine_name,
            self.core.name(),
            state.code(),
            self.text_file_dir.as_deref(),
        ) {
            self.core
                .error(format!("could not update prometheus: {}", e));
        }
    }

    async fn watch(&self) -> (State, Option<CheckError>) {
        if !self.should_check() {
            return (State::Skipped, None);
        }

        {
            let mut mutable = self.mutable();
            mutable.previous_check = Some(Instant::now());
            mutable.previous_check_time = Some(chrono::Utc::now());
        }

        let start = Instant::now();
        let (state, output, err) = if !self.properties.plugin.is_empty() {
            self.check_plugin().await
        } else {
            self.check_builtin()
        };

        {
            let mut mutable = self.mutable();
            mutable.previous_run_time = start.elapsed();
            mutable.previous_output = output.trim().to_string();
            mutable.previous_perf_data = parse_perf_data(&output);
        }

        (state, err)
    }

    async fn check_plugin(&self) -> (State, String, Option<CheckError>) {
        self.mutable().previous_plugin = self.properties.plugin.clone();

        let Some(parts) = shlex::split(&self.properties.plugin) else {
            return (
                State::Unknown,
                String::new(),
                Some(CheckError::Command(format!(
                    "invalid plugin command {:?}",
                    self.properties.plugin
                ))),
            );
        };
        let Some((program, args)) = parts.split_first() else {
            return (
                State::Unknown,
                String::new(),
                Some(CheckError::Command("empty plugin command".to_string())),
            );
        };

        self.core
            .info(format!("running {}", self.properties.plugin));

        let machine = self.core.machine();
        let directory = machine.directory();
        let path = std::env::var("PATH").unwrap_or_default();
        let path_sep = if cfg!(windows) { ";" } else { ":" };

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(&directory)
            .env("MACHINE_WATCHER_NAME", self.core.name())
            .env("MACHINE_NAME", &self.machine_name)
            .env(
                "PATH",
                format!("{}{}{}", path, path_sep, directory.display()),
            )
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.properties.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return (
                    State::Unknown,
                    e.to_string(),
                    Some(CheckError::Command(e.to_string())),
                )
            }
            Err(_) => {
                return (
                    State::Unknown,
                    "check timed out".to_string(),
                    Some(CheckError::Timeout(self.properties.timeout)),
                )
            }
        };

        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );

        match output.status.code() {
            Some(code) => (State::from_exit_code(code), text, None),
            None => (
                State::Unknown,
                text,
                Some(CheckError::Command("check terminated by signal".to_string())),
            ),
        }
    }

    fn check_builtin(&self) -> (State, String, Option<CheckError>) {
        self.mutable().previous_plugin = self.properties.builtin.clone();

        match self.properties.builtin.as_str() {
            builtin::HEARTBEAT => {
                let (state, output) = builtin::heartbeat();
                (state, output, None)
            }

            builtin::STATUS_FILE => {
                let (state, output) = builtin::status_file(
                    std::path::Path::new(&self.properties.status_file),
                    self.properties.last_message,
                    chrono::Utc::now().timestamp(),
                );
                (state, output, None)
            }

            other => (
                State::Unknown,
                String::new(),
                Some(CheckError::Other(format!("unsupported builtin {:?}", other))),
            ),
        }
    }

    fn handle_check(
        &self,
        state: State,
        external: bool,
        err: Option<CheckError>,
    ) -> Result<(), MachineError> {
        if state == State::Skipped || state == State::NotChecked {
            return Ok(());
        }

        self.core.debug(format!(
            "handling check for {} {} {:?}",
            self.properties.plugin,
            state.name(),
            err
        ));

        {
            let mut mutable = self.mutable();
            mutable.previous = state;

            if mutable.history.len() >= MAX_HISTORY {
                mutable.history.remove(0);
            }
            let perfdata = mutable.previous_perf_data.clone();
            let executed = mutable.previous_check_time.unwrap_or_else(chrono::Utc::now);
            mutable.history.push(Execution {
                execute: executed,
                status: state.code(),
                perfdata,
            });
        }

        // external transitions already notified whoever needed to know
        if !external {
            self.core.notify_watcher_state(self.current_state());
        }

        self.update_prometheus(state);

        if external {
            return Ok(());
        }

        self.core.transition(state.name())
    }

    async fn perform_watch(&self) {
        {
            let mut mutable = self.mutable();
            if mutable.watching {
                return;
            }
            mutable.watching = true;
        }

        let (state, err) = self.watch().await;
        self.mutable().watching = false;

        if let Err(e) = self.handle_check(state, false, err) {
            self.core
                .error(format!("could not handle watcher event: {}", e));
        }
    }
}

#[async_trait]
impl Watcher for NagiosWatcher {
    fn name(&self) -> String {
        self.core.name().to_string()
    }

    fn watcher_type(&self) -> String {
        WATCHER_TYPE.to_string()
    }

    fn announce_interval(&self) -> Duration {
        self.core.announce_interval()
    }

    /// Machine states named after nagios states sync the recorded state
    /// without running a check; FORCE_CHECK forces an immediate one.
    fn notify_state_change(&self) {
        let machine_state = self.core.machine().state();

        let state = match machine_state.as_str() {
            "OK" => State::Ok,
            "WARNING" => State::Warning,
            "CRITICAL" => State::Critical,
            "UNKNOWN" => State::Unknown,

            FORCE_CHECK_STATE => {
                self.core
                    .info(format!("forcing a check of {}", self.machine_name));
                self.mutable().force = true;
                self.core.notify_state_change();
                return;
            }

            _ => return,
        };

        self.mutable().previous = state;
        self.update_prometheus(state);
    }

    fn current_state(&self) -> Value {
        let mutable = self.mutable();

        let notification = StateNotification {
            event: Envelope::new(
                self.core.name(),
                WATCHER_TYPE,
                self.core.machine().as_ref(),
            ),
            plugin: mutable.previous_plugin.clone(),
            status: mutable.previous.name().to_string(),
            status_code: mutable.previous.code(),
            output: mutable.previous_output.clone(),
            perfdata: mutable.previous_perf_data.clone(),
            runtime: mutable.previous_run_time.as_secs_f64(),
            history: mutable.history.clone(),
            annotations: self.properties.annotations.clone(),
            check_time: mutable
                .previous_check_time
                .map(|t| t.timestamp())
                .unwrap_or(0),
        };

        serde_json::to_value(notification).unwrap_or(Value::Null)
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        match &self.text_file_dir {
            Some(dir) => self.core.info(format!(
                "nagios watcher starting, updating prometheus in {}",
                dir.display()
            )),
            None => self
                .core
                .info("nagios watcher starting, prometheus integration disabled"),
        }

        let Some(mut signal) = self.core.take_signal() else {
            return;
        };

        {
            let watcher = Arc::clone(&self);
            let token = shutdown.clone();
            tokio::spawn(async move {
                // splay the first check to avoid a thundering herd when
                // many machines start together
                let splay = rand::Rng::gen_range(
                    &mut rand::thread_rng(),
                    Duration::ZERO..watcher.interval,
                );
                watcher
                    .core
                    .info(format!("splaying first check by {:?}", splay));

                tokio::select! {
                    _ = tokio::time::sleep(splay) => {}
                    _ = token.cancelled() => return,
                }

                let mut tick = tokio::time::interval(watcher.interval);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = tick.tick() => watcher.perform_watch().await,
                        _ = token.cancelled() => return,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                Some(()) = signal.recv() => self.perform_watch().await,

                _ = shutdown.cancelled() => {
                    self.core.info("stopping on shutdown");
                    return;
                }
            }
        }
    }

    fn delete(&self) {
        // suppress the next check and remove the prometheus entry
        self.mutable().previous_check = Some(Instant::now());

        if let Err(e) = prometheus::delete_status(
            &self.machine_name,
            self.core.name(),
            self.text_file_dir.as_deref(),
        ) {
            self.core
                .error(format!("could not delete from prometheus: {}", e));
        }
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
