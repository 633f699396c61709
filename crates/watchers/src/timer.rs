// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer watcher: a restartable single-shot countdown driven by machine
//! eligibility.
//!
//! Entering an eligible state (re)starts the countdown and fires the
//! optional start event; the stop event fires when the countdown elapses
//! or is cancelled early by leaving eligibility. Restarting a running
//! countdown does not fire the stop event.

use crate::base::WatcherCore;
use crate::error::ConfigError;
use crate::properties::{self, lenient_duration, zero_duration};
use crate::registry::WatcherSpec;
use async_trait::async_trait;
use drover_model::{Envelope, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const WATCHER_TYPE: &str = "timer";

const MIN_TIMER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Stopped,
    Running,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Stopped => "stopped",
            State::Running => "running",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Properties {
    #[serde(deserialize_with = "lenient_duration", default = "zero_duration")]
    timer: Duration,
    splay: bool,
}

#[derive(Serialize)]
struct StateNotification {
    #[serde(flatten)]
    event: Envelope,
    state: String,
    timer: i64,
}

struct Countdown {
    token: CancellationToken,
    fire_on_cancel: Arc<AtomicBool>,
}

pub struct TimerWatcher {
    core: WatcherCore,
    timer: Duration,
    state: Mutex<State>,
    countdown: Mutex<Option<Countdown>>,
}

/// Constructor registered for the `timer` type.
pub fn new(spec: WatcherSpec) -> Result<Arc<dyn Watcher>, ConfigError> {
    Ok(build(spec)? as Arc<dyn Watcher>)
}

fn build(spec: WatcherSpec) -> Result<Arc<TimerWatcher>, ConfigError> {
    let props: Properties = properties::decode(&spec.properties)?;

    let mut timer = props.timer;
    if timer < MIN_TIMER {
        timer = MIN_TIMER;
    }
    if props.splay {
        timer = rand::Rng::gen_range(&mut rand::thread_rng(), MIN_TIMER..=timer.max(MIN_TIMER));
    }

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

    Ok(Arc::new(TimerWatcher {
        core,
        timer,
        state: Mutex::new(State::Stopped),
        countdown: Mutex::new(None),
    }))
}

impl TimerWatcher {
    fn set_state(&self, state: State) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn current(&self) -> State {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_countdown(&self) -> Option<Countdown> {
        self.countdown.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn store_countdown(&self, countdown: Countdown) {
        *self.countdown.lock().unwrap_or_else(|e| e.into_inner()) = Some(countdown);
    }

    /// Clear the stored countdown only when it is still the one identified
    /// by `marker`, so an elapsed countdown never removes its replacement.
    fn clear_countdown_if(&self, marker: &Arc<AtomicBool>) {
        let mut guard = self.countdown.lock().unwrap_or_else(|e| e.into_inner());
        if guard
            .as_ref()
            .map(|c| Arc::ptr_eq(&c.fire_on_cancel, marker))
            .unwrap_or(false)
        {
            *guard = None;
        }
    }

    /// Stop a running countdown because the machine left the watcher's
    /// active states, firing the stop event.
    fn force_stop(&self) {
        if let Some(countdown) = self.take_countdown() {
            self.core.info(format!(
                "stopping timer early on state transition to {}",
                self.core.machine().state()
            ));
            countdown.fire_on_cancel.store(true, Ordering::SeqCst);
            countdown.token.cancel();
        }
    }

    fn start(self: Arc<Self>, shutdown: &CancellationToken) {
        // restarting: silently cancel any running countdown
        if let Some(existing) = self.take_countdown() {
            self.core
                .info(format!("timer was running, resetting to {:?}", self.timer));
            existing.token.cancel();
        }

        let token = shutdown.child_token();
        let fire_on_cancel = Arc::new(AtomicBool::new(false));
        self.store_countdown(Countdown {
            token: token.clone(),
            fire_on_cancel: Arc::clone(&fire_on_cancel),
        });

        let watcher = Arc::clone(&self);
        let parent = shutdown.clone();
        tokio::spawn(async move {
            watcher.set_state(State::Running);
            watcher.core.notify_watcher_state(watcher.current_state());

            // the optional start event fires as the countdown begins
            if let Err(e) = watcher.core.success_transition() {
                watcher.core.error(format!("could not fire start event: {}", e));
            }

            tokio::select! {
                _ = tokio::time::sleep(watcher.timer) => {
                    watcher.clear_countdown_if(&fire_on_cancel);
                    watcher.set_state(State::Stopped);
                    watcher.core.notify_watcher_state(watcher.current_state());

                    if let Err(e) = watcher.core.failure_transition() {
                        watcher.core.error(format!("could not fire stop event: {}", e));
                    }
                }

                _ = token.cancelled() => {
                    if parent.is_cancelled() {
                        watcher.set_state(State::Stopped);
                        return;
                    }

                    // a restart cancelled us silently, the replacement
                    // countdown owns the state from here
                    if !fire_on_cancel.load(Ordering::SeqCst) {
                        return;
                    }

                    watcher.set_state(State::Stopped);
                    watcher.core.notify_watcher_state(watcher.current_state());

                    if let Err(e) = watcher.core.failure_transition() {
                        watcher.core.error(format!("could not fire stop event: {}", e));
                    }
                }
            }
        });
    }

    fn watch(self: Arc<Self>, shutdown: &CancellationToken) {
        if !self.core.should_watch() {
            self.force_stop();
            return;
        }

        self.core.info("starting timer");
        Arc::clone(&self).start(shutdown);
    }
}

#[async_trait]
impl Watcher for TimerWatcher {
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
            state: self.current().name().to_string(),
            timer: self.timer.as_nanos() as i64,
        };

        serde_json::to_value(notification).unwrap_or(Value::Null)
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.core
            .info(format!("timer watcher starting with {:?} timer", self.timer));

        let Some(mut signal) = self.core.take_signal() else {
            return;
        };

        // handle initial state
        Arc::clone(&self).watch(&shutdown);

        loop {
            tokio::select! {
                Some(()) = signal.recv() => Arc::clone(&self).watch(&shutdown),

                _ = shutdown.cancelled() => {
                    self.core.info("stopping on shutdown");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
