// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gossip watcher: periodically publishes a rendered payload to a pub/sub
//! subject while the machine is in an eligible state.
//!
//! The publish loop is its own cancellable task, started when eligibility
//! begins and torn down when it ends, rather than an always-on ticker.

use crate::base::WatcherCore;
use crate::error::ConfigError;
use crate::properties;
use crate::registry::WatcherSpec;
use crate::util::parse_interval;
use async_trait::async_trait;
use drover_model::{Envelope, Watcher};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const WATCHER_TYPE: &str = "gossip";

const MIN_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Stopped,
    Running,
}

#[allow(clippy::unwrap_used)]
static VALID_NAME: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z\d_-]*$").unwrap());

/// Structured service registration published as gossip.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Registration {
    cluster: String,
    service: String,
    protocol: String,
    ip: String,
    port: u16,
    priority: u16,
    prefix: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Properties {
    subject: String,
    payload: String,
    registration: Option<Registration>,
}

#[derive(Serialize)]
struct StateNotification {
    #[serde(flatten)]
    event: Envelope,
    published: i64,
    subject: String,
    payload: String,
}

#[derive(Default)]
struct Mutable {
    state: State,
    last_subject: String,
    last_payload: String,
    last_gossip: Option<chrono::DateTime<chrono::Utc>>,
}

impl std::fmt::Debug for GossipWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipWatcher").finish_non_exhaustive()
    }
}

pub struct GossipWatcher {
    core: WatcherCore,
    subject: String,
    payload: String,
    interval: Duration,
    state: Mutex<Mutable>,
    publish_cancel: Mutex<Option<CancellationToken>>,
}

/// Constructor registered for the `gossip` type.
pub fn new(spec: WatcherSpec) -> Result<Arc<dyn Watcher>, ConfigError> {
    Ok(build(spec)? as Arc<dyn Watcher>)
}

fn validate_registration(reg: &Registration) -> Result<(String, String), ConfigError> {
    if reg.cluster.is_empty() {
        return Err(ConfigError::Missing("cluster"));
    }
    if !VALID_NAME.is_match(&reg.cluster) {
        return Err(ConfigError::Invalid("invalid cluster".to_string()));
    }
    if reg.service.is_empty() {
        return Err(ConfigError::Missing("service"));
    }
    if !VALID_NAME.is_match(&reg.service) {
        return Err(ConfigError::Invalid("invalid service".to_string()));
    }
    if reg.protocol.is_empty() {
        return Err(ConfigError::Missing("protocol"));
    }
    if !VALID_NAME.is_match(&reg.protocol) {
        return Err(ConfigError::Invalid("invalid protocol".to_string()));
    }
    if reg.ip.is_empty() {
        return Err(ConfigError::Missing("ip"));
    }
    if reg.ip.parse::<IpAddr>().is_err() {
        return Err(ConfigError::Invalid("invalid ip".to_string()));
    }
    if reg.port == 0 {
        return Err(ConfigError::Missing("port"));
    }

    let member = format!(
        "{}.{}.member.{}.{}.P.{}.{}",
        reg.cluster, reg.service, reg.protocol, reg.ip, reg.port, reg.priority
    );
    let subject = if reg.prefix.is_empty() {
        format!("drover.hoist.{}", member)
    } else {
        format!("{}.{}", reg.prefix, member)
    };

    if subject.contains([' ', '^', '*']) || subject.contains("..") {
        return Err(ConfigError::Invalid(
            "invalid registration properties".to_string(),
        ));
    }

    Ok((subject, "1".to_string()))
}

fn build(spec: WatcherSpec) -> Result<Arc<GossipWatcher>, ConfigError> {
    let props: Properties = properties::decode(&spec.properties)?;

    let (subject, payload) = match &props.registration {
        None => {
            if props.subject.is_empty() {
                return Err(ConfigError::Missing("subject"));
            }
            if props.payload.is_empty() {
                return Err(ConfigError::Missing("payload"));
            }

            (props.subject.clone(), props.payload.clone())
        }

        Some(reg) => {
            if !props.subject.is_empty() {
                return Err(ConfigError::Invalid(
                    "subject cannot be set with registration".to_string(),
                ));
            }
            if !props.payload.is_empty() {
                return Err(ConfigError::Invalid(
                    "payload cannot be set with registration".to_string(),
                ));
            }

            validate_registration(reg)?
        }
    };

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

    Ok(Arc::new(GossipWatcher {
        core,
        subject,
        payload,
        interval,
        state: Mutex::new(Mutable::default()),
        publish_cancel: Mutex::new(None),
    }))
}

impl GossipWatcher {
    fn mutable(&self) -> std::sync::MutexGuard<'_, Mutable> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish_once(&self) {
        let machine = self.core.machine();

        let connector = match machine.connector() {
            Ok(c) => c,
            Err(e) => {
                self.core
                    .error(format!("could not get a connection to publish gossip: {}", e));
                return;
            }
        };

        let subject = match self.core.process_template(&self.subject) {
            Ok(s) => s,
            Err(e) => {
                self.core
                    .error(format!("could not template parse subject: {}", e));
                return;
            }
        };

        let payload = match self.core.process_template(&self.payload) {
            Ok(p) => p,
            Err(e) => {
                self.core
                    .error(format!("could not template parse payload: {}", e));
                return;
            }
        };

        self.core.info(format!("publishing gossip to {}", subject));
        if let Err(e) = connector.publish_raw(&subject, payload.as_bytes()) {
            self.core.error(format!("could not publish gossip: {}", e));
            return;
        }

        let mut mutable = self.mutable();
        mutable.last_gossip = Some(chrono::Utc::now());
        mutable.last_subject = subject;
        mutable.last_payload = payload;
    }

    fn stop_gossip(&self) {
        let cancel = self
            .publish_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(cancel) = cancel {
            self.core.info(format!(
                "stopping gossip on transition to {}",
                self.core.machine().state()
            ));
            cancel.cancel();
        }

        self.mutable().state = State::Stopped;
    }

    fn start_gossip(self: Arc<Self>, shutdown: &CancellationToken) {
        let mut guard = self
            .publish_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return;
        }

        let token = shutdown.child_token();
        *guard = Some(token.clone());
        drop(guard);

        self.mutable().state = State::Running;

        let watcher = Arc::clone(&self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(watcher.interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tick.tick() => watcher.publish_once(),

                    _ = token.cancelled() => {
                        watcher.mutable().state = State::Stopped;
                        return;
                    }
                }
            }
        });
    }

    fn watch(self: Arc<Self>, shutdown: &CancellationToken) {
        if !self.core.should_watch() {
            self.stop_gossip();
            return;
        }

        Arc::clone(&self).start_gossip(shutdown);
    }
}

#[async_trait]
impl Watcher for GossipWatcher {
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
            published: mutable.last_gossip.map(|t| t.timestamp()).unwrap_or(0),
            subject: mutable.last_subject.clone(),
            payload: mutable.last_payload.clone(),
        };

        serde_json::to_value(notification).unwrap_or(Value::Null)
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.core.info(format!(
            "gossip watcher starting with subject {:?} on interval {:?}",
            self.subject, self.interval
        ));

        let Some(mut signal) = self.core.take_signal() else {
            return;
        };

        Arc::clone(&self).watch(&shutdown);

        loop {
            tokio::select! {
                Some(()) = signal.recv() => Arc::clone(&self).watch(&shutdown),

                _ = shutdown.cancelled() => {
                    self.core.info("stopping on shutdown");
                    self.stop_gossip();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "gossip_tests.rs"]
mod tests;
