// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key-value watcher: polls a bucket key and mirrors it into machine data.
//!
//! Only poll mode is supported. A watch mode exists in the configuration
//! surface for forward compatibility but is rejected at construction.

use crate::base::WatcherCore;
use crate::error::ConfigError;
use crate::registry::WatcherSpec;
use crate::util::parse_interval;
use crate::properties;
use async_trait::async_trait;
use drover_model::{Envelope, KvBucket, KvError, MachineError, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const WATCHER_TYPE: &str = "kv";

const MIN_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
const POLL_MODE: &str = "poll";
const WATCH_MODE: &str = "watch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Error,
    Changed,
    Unchanged,
    Skipped,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Error => "error",
            State::Changed => "changed",
            State::Unchanged => "unchanged",
            State::Skipped => "skipped",
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Properties {
    bucket: String,
    key: String,
    mode: String,
    #[serde(rename = "on_successful_get")]
    transition_on_successful_get: bool,
    #[serde(rename = "on_matching_update")]
    transition_on_match: bool,
    #[serde(rename = "bucket_prefix", default = "default_true")]
    bucket_prefix: bool,
}

impl Default for Properties {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            key: String::new(),
            mode: String::new(),
            transition_on_successful_get: false,
            transition_on_match: false,
            bucket_prefix: true,
        }
    }
}

#[derive(Serialize)]
struct StateNotification {
    #[serde(flatten)]
    event: Envelope,
    state: String,
    key: String,
    bucket: String,
    mode: String,
}

struct Mutable {
    previous_val: Option<Value>,
    previous_seq: u64,
    previous_state: Option<State>,
    polling: bool,
    last_poll: Option<Instant>,
}

/// Constructor registered for the `kv` type.
pub fn new(spec: WatcherSpec) -> Result<Arc<dyn Watcher>, ConfigError> {
    Ok(build(spec)? as Arc<dyn Watcher>)
}

fn build(spec: WatcherSpec) -> Result<Arc<KvWatcher>, ConfigError> {
    let mut props: Properties = properties::decode(&spec.properties)?;

    if props.bucket.is_empty() {
        return Err(ConfigError::Missing("bucket"));
    }
    if props.mode.is_empty() {
        props.mode = POLL_MODE.to_string();
    }
    if props.mode != POLL_MODE && props.mode != WATCH_MODE {
        return Err(ConfigError::Invalid(format!(
            "mode should be '{}' or '{}'",
            POLL_MODE, WATCH_MODE
        )));
    }
    if props.mode == POLL_MODE && props.key.is_empty() {
        return Err(ConfigError::Missing("key"));
    }
    if props.mode == WATCH_MODE {
        return Err(ConfigError::Invalid("watch mode not supported".to_string()));
    }

    let interval = parse_interval(&spec.interval, DEFAULT_INTERVAL, MIN_INTERVAL)?;

    let bucket = spec
        .machine
        .kv_bucket(&props.bucket)
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

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

    Ok(Arc::new(KvWatcher {
        core,
        properties: props,
        interval,
        bucket,
        state: Mutex::new(Mutable {
            previous_val: None,
            previous_seq: 0,
            previous_state: None,
            polling: false,
            last_poll: None,
        }),
    }))
}

impl std::fmt::Debug for KvWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvWatcher").finish_non_exhaustive()
    }
}

pub struct KvWatcher {
    core: WatcherCore,
    properties: Properties,
    interval: Duration,
    bucket: Arc<dyn KvBucket>,
    state: Mutex<Mutable>,
}

/// Decode a raw key-value payload. Surrounding whitespace never affects
/// the outcome: values are trimmed before JSON sniffing so `"\n {..} \t"`
/// decodes identically to `"{..}"`.
fn parse_value(raw: &[u8]) -> Value {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();

    if (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
    {
        if let Ok(parsed) = serde_json::from_str(trimmed) {
            return parsed;
        }
    }

    Value::String(trimmed.to_string())
}

impl KvWatcher {
    fn mutable(&self) -> std::sync::MutexGuard<'_, Mutable> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn data_key(&self) -> String {
        if self.properties.bucket_prefix {
            format!("{}_{}", self.properties.bucket, self.properties.key)
        } else {
            self.properties.key.clone()
        }
    }

    fn poll(&self) -> (State, Option<KvError>) {
        if !self.core.should_watch() {
            return (State::Skipped, None);
        }

        {
            let mut mutable = self.mutable();

            // overlapping polls are skipped, not queued
            if mutable.polling {
                return (State::Skipped, None);
            }

            if let Some(last) = mutable.last_poll {
                if last.elapsed() < self.interval {
                    self.core
                        .debug(format!("skipping poll {:?} after the last", last.elapsed()));
                    return (State::Skipped, None);
                }
            }

            mutable.polling = true;
            mutable.last_poll = Some(Instant::now());
        }

        let result = self.poll_inner();
        self.mutable().polling = false;

        result
    }

    fn poll_inner(&self) -> (State, Option<KvError>) {
        let dk = self.data_key();

        self.core.info(format!(
            "polling for {}.{}",
            self.properties.bucket, self.properties.key
        ));

        if self.mutable().previous_val.is_none() {
            self.mutable().previous_val = self.core.machine().data_get(&dk);
        }

        let entry = self.bucket.get(&self.properties.key);
        let previous_val = self.mutable().previous_val.clone();

        match entry {
            // key is not there and nothing was known before, unchanged
            Err(KvError::UnknownKey(_)) if previous_val.is_none() => (State::Unchanged, None),

            // key is not there but we held a value, a delete happened
            Err(KvError::UnknownKey(_)) => {
                self.core.debug(format!("removing data from {}", dk));

                if let Err(e) = self.core.machine().data_delete(&dk) {
                    self.core
                        .error(format!("could not delete key {} from machine: {}", dk, e));
                    return (State::Error, Some(KvError::Other(e.to_string())));
                }

                self.mutable().previous_val = None;
                (State::Changed, None)
            }

            Err(e) => {
                self.core.error(format!(
                    "could not get {}.{}: {}",
                    self.properties.bucket, self.properties.key, e
                ));
                (State::Error, Some(e))
            }

            Ok(entry) => {
                let parsed = parse_value(&entry.value);
                let mut mutable = self.mutable();

                if previous_val.as_ref() != Some(&parsed) {
                    if let Err(e) = self.core.machine().data_put(&dk, parsed.clone()) {
                        return (State::Error, Some(KvError::Other(e.to_string())));
                    }

                    mutable.previous_seq = entry.sequence;
                    mutable.previous_val = Some(parsed);
                    return (State::Changed, None);
                }

                // a put that did not change the value but advanced the
                // sequence, transition anyway when asked to - but never on
                // the startup transient before a real update was seen
                if self.properties.transition_on_match
                    && mutable.previous_seq > 0
                    && entry.sequence > mutable.previous_seq
                {
                    mutable.previous_seq = entry.sequence;
                    return (State::Changed, None);
                }

                mutable.previous_seq = entry.sequence;

                if self.properties.transition_on_successful_get {
                    return (State::Changed, None);
                }

                (State::Unchanged, None)
            }
        }
    }

    fn handle_state(&self, state: State, err: Option<KvError>) -> Result<(), MachineError> {
        self.core.debug(format!(
            "handling state for {}.{}: {} {:?}",
            self.properties.bucket,
            self.properties.key,
            state.name(),
            err
        ));

        self.mutable().previous_state = Some(state);

        match state {
            State::Error => self.core.failure_transition(),
            State::Changed => self.core.success_transition(),
            State::Unchanged | State::Skipped => Ok(()),
        }
    }

    fn perform_poll(&self) {
        let (state, err) = self.poll();
        if let Err(e) = self.handle_state(state, err) {
            self.core
                .error(format!("could not handle watcher event: {}", e));
        }
    }
}

#[async_trait]
impl Watcher for KvWatcher {
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
            state: self
                .mutable()
                .previous_state
                .map(|s| s.name().to_string())
                .unwrap_or_else(|| State::Unchanged.name().to_string()),
            key: self.properties.key.clone(),
            bucket: self.properties.bucket.clone(),
            mode: self.properties.mode.clone(),
        };

        serde_json::to_value(notification).unwrap_or(Value::Null)
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.core.info(format!(
            "key-value watcher starting with bucket {:?} and key {:?} in {:?} mode",
            self.properties.bucket, self.properties.key, self.properties.mode
        ));

        let Some(mut signal) = self.core.take_signal() else {
            return;
        };

        // seed the comparison value from machine data then poll once
        let dk = self.data_key();
        self.mutable().previous_val = self.core.machine().data_get(&dk);
        self.perform_poll();

        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => self.perform_poll(),

                Some(()) = signal.recv() => self.perform_poll(),

                _ = shutdown.cancelled() => {
                    self.core.info("stopping on shutdown");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "kv_tests.rs"]
mod tests;
