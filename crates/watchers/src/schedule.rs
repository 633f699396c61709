// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schedule watcher: cron-driven on/off windows with overlap counting.
//!
//! Each schedule item runs its own task ticking once a second; when its
//! cron expression matches it increments a shared counter and schedules a
//! decrement once the configured duration passes. The watcher reduces the
//! counter to an on/off state, so overlapping schedules keep the state on
//! for as long as any one of them is active. Transitions fire only when
//! the reduced state changes, never on every tick.

use crate::base::WatcherCore;
use crate::error::ConfigError;
use crate::properties::{self, lenient_duration, string_list, zero_duration};
use crate::registry::WatcherSpec;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_model::{Envelope, MachineError, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const WATCHER_TYPE: &str = "schedule";

const DEFAULT_DURATION: Duration = Duration::from_secs(60);
const CHECK_TICK: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unknown,
    Off,
    On,
    Skipped,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Unknown => "unknown",
            State::Off => "off",
            State::On => "on",
            State::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Properties {
    #[serde(deserialize_with = "lenient_duration", default = "zero_duration")]
    duration: Duration,
    #[serde(
        rename = "start_splay",
        deserialize_with = "lenient_duration",
        default = "zero_duration"
    )]
    start_splay: Duration,
    #[serde(rename = "skip_trigger_on_reenter")]
    skip_trigger_on_reenter: bool,
    #[serde(deserialize_with = "string_list")]
    schedules: Vec<String>,
}

#[derive(Serialize)]
struct StateNotification {
    #[serde(flatten)]
    event: Envelope,
    state: String,
}

struct ScheduleItem {
    spec: String,
    schedule: cron::Schedule,
}

/// Parse a cron expression, accepting classic 5-field specs by assuming a
/// zero seconds field.
fn parse_schedule(spec: &str) -> Result<cron::Schedule, ConfigError> {
    let trimmed = spec.trim();
    let fields = trimmed.split_whitespace().count();

    let normalized = if fields == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };

    cron::Schedule::from_str(&normalized)
        .map_err(|e| ConfigError::Invalid(format!("could not parse '{}': {}", spec, e)))
}

/// Whether the schedule fires within the second ending at `now`. Returns
/// the matched fire time so callers can deduplicate.
fn fires_at(schedule: &cron::Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let previous = now - chrono::Duration::seconds(1);
    schedule.after(&previous).next().filter(|t| *t <= now)
}

struct Mutable {
    counter: i64,
    state: State,
    previous: State,
    triggered: bool,
}

impl std::fmt::Debug for ScheduleWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleWatcher").finish_non_exhaustive()
    }
}

pub struct ScheduleWatcher {
    core: WatcherCore,
    properties: Properties,
    items: Vec<ScheduleItem>,
    counter_tx: mpsc::UnboundedSender<i64>,
    counter_rx: Mutex<Option<mpsc::UnboundedReceiver<i64>>>,
    state: Mutex<Mutable>,
}

/// Constructor registered for the `schedule` type.
pub fn new(spec: WatcherSpec) -> Result<Arc<dyn Watcher>, ConfigError> {
    Ok(build(spec)? as Arc<dyn Watcher>)
}

fn build(spec: WatcherSpec) -> Result<Arc<ScheduleWatcher>, ConfigError> {
    let mut props: Properties = properties::decode(&spec.properties)?;

    if props.duration < Duration::from_secs(1) {
        props.duration = DEFAULT_DURATION;
    }
    if props.schedules.is_empty() {
        return Err(ConfigError::Missing("schedules"));
    }
    if props.start_splay > props.duration / 2 {
        return Err(ConfigError::Invalid(format!(
            "start splay {:?} is bigger than half the duration {:?}",
            props.start_splay, props.duration
        )));
    }

    let items = props
        .schedules
        .iter()
        .map(|raw| {
            Ok(ScheduleItem {
                spec: raw.clone(),
                schedule: parse_schedule(raw)?,
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

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

    let (counter_tx, counter_rx) = mpsc::unbounded_channel();

    Ok(Arc::new(ScheduleWatcher {
        core,
        properties: props,
        items,
        counter_tx,
        counter_rx: Mutex::new(Some(counter_rx)),
        state: Mutex::new(Mutable {
            counter: 0,
            state: State::Unknown,
            previous: State::Unknown,
            triggered: false,
        }),
    }))
}

impl ScheduleWatcher {
    fn mutable(&self) -> std::sync::MutexGuard<'_, Mutable> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply one counter delta and reduce to an on/off state.
    fn apply_delta(&self, delta: i64) {
        let mut mutable = self.mutable();

        mutable.counter = (mutable.counter + delta).max(0);
        mutable.state = if mutable.counter == 0 {
            self.core.debug("state going off due to counter reaching 0");
            State::Off
        } else {
            State::On
        };
    }

    fn watch(&self) -> Result<(), MachineError> {
        if !self.core.should_watch() {
            self.mutable().previous = State::Skipped;
            return Ok(());
        }

        let (state, previous) = {
            let mutable = self.mutable();
            (mutable.state, mutable.previous)
        };

        // nothing changed
        if previous == state {
            return Ok(());
        }

        self.mutable().previous = state;

        match state {
            State::Off | State::Unknown => {
                self.mutable().triggered = false;
                self.core.notify_watcher_state(self.current_state());
                self.core.failure_transition()
            }

            State::On => {
                if self.properties.skip_trigger_on_reenter && self.mutable().triggered {
                    self.core.debug(
                        "skipping trigger that already fired in this schedule window",
                    );
                    return Ok(());
                }

                self.mutable().triggered = true;
                self.core.notify_watcher_state(self.current_state());
                self.core.success_transition()
            }

            State::Skipped => Ok(()),
        }
    }

    fn start_item_tasks(self: Arc<Self>, shutdown: &CancellationToken) {
        for (index, item) in self.items.iter().enumerate() {
            self.core
                .debug(format!("starting schedule item '{}'", item.spec));

            let watcher = Arc::clone(&self);
            let token = shutdown.clone();
            tokio::spawn(async move {
                let mut last_fire: Option<DateTime<Utc>> = None;
                let mut tick = tokio::time::interval(Duration::from_secs(1));
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            let schedule = &watcher.items[index].schedule;
                            let Some(fired) = fires_at(schedule, Utc::now()) else {
                                continue;
                            };
                            if last_fire == Some(fired) {
                                continue;
                            }
                            last_fire = Some(fired);

                            let splay = watcher.properties.start_splay;
                            let duration = watcher.properties.duration;
                            let tx = watcher.counter_tx.clone();
                            let inner = token.clone();
                            tokio::spawn(async move {
                                if !splay.is_zero() {
                                    let delay = rand::Rng::gen_range(
                                        &mut rand::thread_rng(),
                                        Duration::ZERO..splay,
                                    );
                                    tokio::time::sleep(delay).await;
                                }

                                let _ = tx.send(1);

                                tokio::select! {
                                    _ = tokio::time::sleep(duration) => {
                                        let _ = tx.send(-1);
                                    }
                                    _ = inner.cancelled() => {}
                                }
                            });
                        }

                        _ = token.cancelled() => return,
                    }
                }
            });
        }
    }
}

#[async_trait]
impl Watcher for ScheduleWatcher {
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
            state: self.mutable().state.name().to_string(),
        };

        serde_json::to_value(notification).unwrap_or(Value::Null)
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.core.info(format!(
            "schedule watcher starting with {} items",
            self.items.len()
        ));

        let Some(mut signal) = self.core.take_signal() else {
            return;
        };
        let Some(mut counter) = self
            .counter_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return;
        };

        Arc::clone(&self).start_item_tasks(&shutdown);

        let mut tick = tokio::time::interval(CHECK_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                Some(delta) = counter.recv() => self.apply_delta(delta),

                _ = tick.tick() => {
                    if let Err(e) = self.watch() {
                        self.core.error(format!("could not handle current schedule state: {}", e));
                    }
                }

                Some(()) = signal.recv() => {
                    if let Err(e) = self.watch() {
                        self.core.error(format!("could not handle current schedule state: {}", e));
                    }
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
#[path = "schedule_tests.rs"]
mod tests;
