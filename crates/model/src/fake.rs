// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake collaborators for tests.
//!
//! `FakeMachine` records every transition and notification so watcher tests
//! can assert on exactly what a check produced. All fields are settable
//! after construction; the mutexes are plain std mutexes since the fakes
//! are only ever used from short test critical sections.

use crate::connector::{Connector, KvBucket, KvEntry, KvError};
use crate::governor::{Governor, GovernorError, GovernorSlot};
use crate::http::{HttpManager, MetricSource, SwitchSource};
use crate::machine::{Machine, MachineError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Connector that captures published messages.
#[derive(Default)]
pub struct FakeConnector {
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        locked(&self.published).clone()
    }
}

impl Connector for FakeConnector {
    fn publish_raw(&self, subject: &str, payload: &[u8]) -> Result<(), MachineError> {
        locked(&self.published).push((subject.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// Key-value bucket returning scripted entries.
#[derive(Default)]
pub struct FakeKvBucket {
    entries: Mutex<HashMap<String, KvEntry>>,
}

impl FakeKvBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, value: impl Into<Vec<u8>>, sequence: u64) {
        locked(&self.entries).insert(key.to_string(), KvEntry::new(value, sequence));
    }

    pub fn delete(&self, key: &str) {
        locked(&self.entries).remove(key);
    }
}

impl KvBucket for FakeKvBucket {
    fn get(&self, key: &str) -> Result<KvEntry, KvError> {
        locked(&self.entries)
            .get(key)
            .cloned()
            .ok_or_else(|| KvError::UnknownKey(key.to_string()))
    }
}

/// Governor with a bounded number of immediately available permits.
pub struct FakeGovernor {
    permits: AtomicU64,
    acquired: Mutex<Vec<String>>,
}

impl FakeGovernor {
    pub fn new(permits: u64) -> Self {
        Self {
            permits: AtomicU64::new(permits),
            acquired: Mutex::new(Vec::new()),
        }
    }

    pub fn acquired(&self) -> Vec<String> {
        locked(&self.acquired).clone()
    }

    pub fn available(&self) -> u64 {
        self.permits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Governor for Arc<FakeGovernor> {
    async fn acquire(
        &self,
        name: &str,
        _timeout: Duration,
        _cancel: CancellationToken,
    ) -> Result<GovernorSlot, GovernorError> {
        let available = self.permits.load(Ordering::SeqCst);
        if available == 0 {
            return Err(GovernorError::Timeout(name.to_string()));
        }

        self.permits.fetch_sub(1, Ordering::SeqCst);
        locked(&self.acquired).push(name.to_string());

        let gov = Arc::clone(self);
        Ok(GovernorSlot::new(move || {
            gov.permits.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// A machine that records transitions and notifications.
pub struct FakeMachine {
    pub machine_name: String,
    directory: Mutex<PathBuf>,
    state: Mutex<String>,
    transitions: Mutex<Vec<String>>,
    notifications: Mutex<Vec<(String, Value)>>,
    data: Mutex<HashMap<String, Value>>,
    facts: Mutex<Value>,
    external_states: Mutex<HashMap<String, String>>,
    text_file_dir: Mutex<Option<PathBuf>>,
    kv: Mutex<Option<Arc<FakeKvBucket>>>,
    connector: Arc<FakeConnector>,
    governor: Mutex<Option<Arc<FakeGovernor>>>,
    http: Mutex<Option<Arc<dyn HttpManager>>>,
    instance: String,
    started: chrono::DateTime<chrono::Utc>,
    /// When set, the next transition call fails with this error text
    pub fail_transitions: Mutex<Option<String>>,
}

impl FakeMachine {
    pub fn new(name: &str) -> Self {
        Self {
            machine_name: name.to_string(),
            directory: Mutex::new(std::env::temp_dir()),
            state: Mutex::new("unknown".to_string()),
            transitions: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            data: Mutex::new(HashMap::new()),
            facts: Mutex::new(serde_json::json!({})),
            external_states: Mutex::new(HashMap::new()),
            text_file_dir: Mutex::new(None),
            kv: Mutex::new(None),
            connector: Arc::new(FakeConnector::new()),
            governor: Mutex::new(None),
            http: Mutex::new(None),
            instance: uuid::Uuid::new_v4().to_string(),
            started: chrono::Utc::now(),
            fail_transitions: Mutex::new(None),
        }
    }

    pub fn set_state(&self, state: &str) {
        *locked(&self.state) = state.to_string();
    }

    pub fn set_directory(&self, dir: impl Into<PathBuf>) {
        *locked(&self.directory) = dir.into();
    }

    pub fn set_facts(&self, facts: Value) {
        *locked(&self.facts) = facts;
    }

    pub fn set_external_state(&self, machine: &str, state: &str) {
        locked(&self.external_states).insert(machine.to_string(), state.to_string());
    }

    pub fn set_text_file_directory(&self, dir: impl Into<PathBuf>) {
        *locked(&self.text_file_dir) = Some(dir.into());
    }

    pub fn set_kv_bucket(&self, bucket: Arc<FakeKvBucket>) {
        *locked(&self.kv) = Some(bucket);
    }

    pub fn set_governor(&self, governor: Arc<FakeGovernor>) {
        *locked(&self.governor) = Some(governor);
    }

    pub fn set_http_manager(&self, manager: Arc<dyn HttpManager>) {
        *locked(&self.http) = Some(manager);
    }

    pub fn fake_connector(&self) -> Arc<FakeConnector> {
        Arc::clone(&self.connector)
    }

    pub fn transitions(&self) -> Vec<String> {
        locked(&self.transitions).clone()
    }

    pub fn notifications(&self) -> Vec<(String, Value)> {
        locked(&self.notifications).clone()
    }
}

impl Machine for FakeMachine {
    fn name(&self) -> String {
        self.machine_name.clone()
    }

    fn directory(&self) -> PathBuf {
        locked(&self.directory).clone()
    }

    fn identity(&self) -> String {
        "fake.example.net".to_string()
    }

    fn instance_id(&self) -> String {
        self.instance.clone()
    }

    fn version(&self) -> String {
        "1.0.0".to_string()
    }

    fn start_time(&self) -> chrono::DateTime<chrono::Utc> {
        self.started
    }

    fn timestamp_seconds(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn state(&self) -> String {
        locked(&self.state).clone()
    }

    fn transition(&self, event: &str) -> Result<(), MachineError> {
        if let Some(reason) = locked(&self.fail_transitions).clone() {
            return Err(MachineError::InvalidTransition(reason));
        }

        locked(&self.transitions).push(event.to_string());
        Ok(())
    }

    fn notify_watcher_state(&self, watcher: &str, state: Value) {
        locked(&self.notifications).push((watcher.to_string(), state));
    }

    fn lookup_external_machine_state(&self, machine: &str) -> Result<String, MachineError> {
        locked(&self.external_states)
            .get(machine)
            .cloned()
            .ok_or_else(|| MachineError::UnknownMachine(machine.to_string()))
    }

    fn data(&self) -> HashMap<String, Value> {
        locked(&self.data).clone()
    }

    fn data_put(&self, key: &str, value: Value) -> Result<(), MachineError> {
        locked(&self.data).insert(key.to_string(), value);
        Ok(())
    }

    fn data_get(&self, key: &str) -> Option<Value> {
        locked(&self.data).get(key).cloned()
    }

    fn data_delete(&self, key: &str) -> Result<(), MachineError> {
        locked(&self.data).remove(key);
        Ok(())
    }

    fn facts(&self) -> Value {
        locked(&self.facts).clone()
    }

    fn text_file_directory(&self) -> Option<PathBuf> {
        locked(&self.text_file_dir).clone()
    }

    fn http_manager(&self) -> Option<Arc<dyn HttpManager>> {
        locked(&self.http).clone()
    }

    fn kv_bucket(&self, bucket: &str) -> Result<Arc<dyn KvBucket>, KvError> {
        locked(&self.kv)
            .clone()
            .map(|b| b as Arc<dyn KvBucket>)
            .ok_or_else(|| KvError::BucketUnavailable(bucket.to_string()))
    }

    fn connector(&self) -> Result<Arc<dyn Connector>, MachineError> {
        Ok(Arc::clone(&self.connector) as Arc<dyn Connector>)
    }

    fn governor(&self) -> Option<Arc<dyn Governor>> {
        locked(&self.governor)
            .clone()
            .map(|g| Arc::new(g) as Arc<dyn Governor>)
    }
}

/// HTTP manager recording registrations.
#[derive(Default)]
pub struct FakeHttpManager {
    switches: Mutex<Vec<(String, String)>>,
    metrics: Mutex<Vec<(String, String)>>,
}

impl FakeHttpManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn switches(&self) -> Vec<(String, String)> {
        locked(&self.switches).clone()
    }

    pub fn metrics(&self) -> Vec<(String, String)> {
        locked(&self.metrics).clone()
    }
}

impl HttpManager for FakeHttpManager {
    fn add_switch_watcher(&self, machine: &str, watcher: Arc<dyn SwitchSource>) {
        locked(&self.switches).push((machine.to_string(), watcher.name()));
    }

    fn remove_switch_watcher(&self, machine: &str, watcher: &str) {
        locked(&self.switches).retain(|(m, w)| !(m == machine && w == watcher));
    }

    fn add_metric_watcher(&self, machine: &str, watcher: Arc<dyn MetricSource>) {
        locked(&self.metrics).push((machine.to_string(), watcher.name()));
    }

    fn remove_metric_watcher(&self, machine: &str, watcher: &str) {
        locked(&self.metrics).retain(|(m, w)| !(m == machine && w == watcher));
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
