// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Metric watcher: runs a command emitting metrics and exports the
//! samples.
//!
//! Output is either the native JSON form `{"labels": .., "metrics": ..}`
//! or nagios perfdata, detected by sniffing the first byte. Samples land
//! in the shared Prometheus textfile and, when an HTTP manager is
//! present, are queryable over the metric endpoint.

pub mod prometheus;

use crate::base::WatcherCore;
use crate::error::{CheckError, ConfigError};
use crate::properties::{self, lenient_duration, zero_duration};
use crate::registry::WatcherSpec;
use crate::util::{parse_interval, parse_perf_data};
use async_trait::async_trait;
use drover_model::{Envelope, MetricSnapshot, MetricSource, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const WATCHER_TYPE: &str = "metric";

const MIN_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// The runtime of the last check, exported with every sample set.
const RUNTIME_METRIC: &str = "drover_runtime_seconds";

/// A set of samples with their labels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metric {
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Properties {
    command: String,
    #[serde(deserialize_with = "lenient_duration", default = "zero_duration")]
    interval: Duration,
    labels: HashMap<String, String>,
    #[serde(deserialize_with = "lenient_duration", default = "zero_duration")]
    timeout: Duration,
}

#[derive(Serialize)]
struct StateNotification {
    #[serde(flatten)]
    event: Envelope,
    metrics: Metric,
}

#[derive(Default)]
struct Mutable {
    previous_run_time: Duration,
    previous_result: Option<Metric>,
    last_sample_time: Option<chrono::DateTime<chrono::Utc>>,
    watching: bool,
}

pub struct MetricWatcher {
    core: WatcherCore,
    properties: Properties,
    interval: Duration,
    machine_name: String,
    text_file_dir: Option<PathBuf>,
    state: Mutex<Mutable>,
    registered: AtomicBool,
}

/// Constructor registered for the `metric` type.
pub fn new(spec: WatcherSpec) -> Result<Arc<dyn Watcher>, ConfigError> {
    Ok(build(spec)? as Arc<dyn Watcher>)
}

fn build(spec: WatcherSpec) -> Result<Arc<MetricWatcher>, ConfigError> {
    let mut props: Properties = properties::decode(&spec.properties)?;

    if props.command.is_empty() {
        return Err(ConfigError::Missing("command"));
    }
    if props.timeout.is_zero() {
        props.timeout = DEFAULT_TIMEOUT;
    }

    // the interval lives in the properties for this type, the definition
    // level interval is honored when the property is unset
    let interval = if props.interval.is_zero() {
        parse_interval(&spec.interval, DEFAULT_INTERVAL, MIN_INTERVAL)?
    } else if props.interval < MIN_INTERVAL {
        MIN_INTERVAL
    } else {
        props.interval
    };

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

    Ok(Arc::new(MetricWatcher {
        core,
        properties: props,
        interval,
        machine_name,
        text_file_dir,
        state: Mutex::new(Mutable::default()),
        registered: AtomicBool::new(false),
    }))
}

/// Parse command output: native JSON when it looks like an object,
/// nagios perfdata otherwise.
fn parse_output(output: &[u8]) -> Result<Metric, CheckError> {
    let text = String::from_utf8_lossy(output);
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        let mut metric: Metric = serde_json::from_str(trimmed)
            .map_err(|e| CheckError::Other(format!("failed to parse metric output: {}", e)))?;
        metric
            .labels
            .entry("format".to_string())
            .or_insert_with(|| "drover".to_string());

        return Ok(metric);
    }

    let mut metric = Metric::default();
    metric.labels.insert("format".to_string(), "nagios".to_string());
    for perf in parse_perf_data(trimmed) {
        metric.metrics.insert(perf.label, perf.value);
    }

    Ok(metric)
}

impl MetricWatcher {
    fn mutable(&self) -> std::sync::MutexGuard<'_, Mutable> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn watch(&self) -> Result<Option<Vec<u8>>, CheckError> {
        if !self.core.should_watch() {
            return Ok(None);
        }

        let start = Instant::now();
        let result = self.execute().await;
        self.mutable().previous_run_time = start.elapsed();

        result.map(Some)
    }

    async fn execute(&self) -> Result<Vec<u8>, CheckError> {
        let Some(parts) = shlex::split(&self.properties.command) else {
            return Err(CheckError::Command(format!(
                "invalid command {:?}",
                self.properties.command
            )));
        };
        let Some((program, args)) = parts.split_first() else {
            return Err(CheckError::Command("empty command".to_string()));
        };

        self.core
            .info(format!("running {}", self.properties.command));

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

        Ok(output.stdout)
    }

    fn handle_check(&self, output: Result<Option<Vec<u8>>, CheckError>) {
        let output = match output {
            Ok(Some(output)) => output,
            Ok(None) => return,
            Err(e) => {
                self.core
                    .error(format!("metric watcher {} failed: {}", self.properties.command, e));
                self.core.notify_watcher_state(self.current_state());

                if let Err(e) = self.core.failure_transition() {
                    self.core
                        .error(format!("could not fire fail transition: {}", e));
                }
                return;
            }
        };

        let mut metric = match parse_output(&output) {
            Ok(metric) => metric,
            Err(e) => {
                self.core.error(format!("{}", e));
                self.core.notify_watcher_state(self.current_state());

                if let Err(e) = self.core.failure_transition() {
                    self.core
                        .error(format!("could not fire fail transition: {}", e));
                }
                return;
            }
        };

        for (key, value) in &self.properties.labels {
            metric.labels.insert(key.clone(), value.clone());
        }

        if let Err(e) = prometheus::update_metric(
            &self.machine_name,
            self.core.name(),
            metric.labels.clone(),
            metric.metrics.clone(),
            self.text_file_dir.as_deref(),
        ) {
            self.core
                .error(format!("could not update prometheus: {}", e));
        }

        {
            let mut mutable = self.mutable();
            mutable.previous_result = Some(metric);
            mutable.last_sample_time = Some(chrono::Utc::now());
        }

        self.core.notify_watcher_state(self.current_state());
    }

    async fn perform_watch(&self) {
        {
            let mut mutable = self.mutable();
            if mutable.watching {
                return;
            }
            mutable.watching = true;
        }

        let output = self.watch().await;
        self.mutable().watching = false;

        self.handle_check(output);
    }

    fn snapshot(&self) -> (Metric, i64) {
        let mutable = self.mutable();

        let mut metric = mutable.previous_result.clone().unwrap_or_default();
        metric.metrics.insert(
            RUNTIME_METRIC.to_string(),
            mutable.previous_run_time.as_secs_f64(),
        );

        let time = mutable
            .last_sample_time
            .map(|t| t.timestamp())
            .unwrap_or(0);

        (metric, time)
    }

    fn register_with_http(self: Arc<Self>) {
        if self.registered.load(Ordering::SeqCst) {
            return;
        }

        if let Some(manager) = self.core.machine().http_manager() {
            manager.add_metric_watcher(
                &self.machine_name,
                Arc::clone(&self) as Arc<dyn MetricSource>,
            );
            self.registered.store(true, Ordering::SeqCst);
        }
    }

    fn deregister_from_http(&self) {
        if !self.registered.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(manager) = self.core.machine().http_manager() {
            manager.remove_metric_watcher(&self.machine_name, self.core.name());
        }
    }
}

impl MetricSource for MetricWatcher {
    fn name(&self) -> String {
        self.core.name().to_string()
    }

    fn last_metric(&self) -> MetricSnapshot {
        let (metric, time) = self.snapshot();

        MetricSnapshot {
            labels: metric.labels,
            metrics: metric.metrics,
            time,
        }
    }
}

#[async_trait]
impl Watcher for MetricWatcher {
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
        let (metric, _) = self.snapshot();

        let notification = StateNotification {
            event: Envelope::new(
                self.core.name(),
                WATCHER_TYPE,
                self.core.machine().as_ref(),
            ),
            metrics: metric,
        };

        serde_json::to_value(notification).unwrap_or(Value::Null)
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.core.info(format!(
            "metric watcher for {} starting",
            self.properties.command
        ));

        let Some(mut signal) = self.core.take_signal() else {
            return;
        };

        Arc::clone(&self).register_with_http();

        // splay the first run across the interval so many machines
        // starting together do not sample at the same instant
        let splay = rand::Rng::gen_range(&mut rand::thread_rng(), Duration::ZERO..self.interval);
        self.core.info(format!("splaying first check by {:?}", splay));

        tokio::select! {
            _ = tokio::time::sleep(splay) => self.perform_watch().await,
            _ = shutdown.cancelled() => {
                self.deregister_from_http();
                return;
            }
        }

        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => self.perform_watch().await,

                Some(()) = signal.recv() => self.perform_watch().await,

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

        if let Err(e) = prometheus::delete_metric(
            &self.machine_name,
            self.core.name(),
            self.text_file_dir.as_deref(),
        ) {
            self.core
                .error(format!("could not delete from prometheus: {}", e));
        }
    }
}
