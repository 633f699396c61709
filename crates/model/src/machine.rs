// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The machine capability interface consumed by every watcher.
//!
//! A machine is one running finite-state-machine instance. Watchers never
//! mutate its state directly, they only request transitions by event name
//! and read the current state when deciding whether to run checks.

use crate::connector::{Connector, KvBucket, KvError};
use crate::governor::Governor;
use crate::http::HttpManager;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by machine operations.
#[derive(Debug, Error)]
pub enum MachineError {
    /// The requested transition is not valid in the current state
    #[error("transition {0} is not valid in the current state")]
    InvalidTransition(String),

    /// No machine with the given name is known to the host
    #[error("unknown machine {0}")]
    UnknownMachine(String),

    /// The machine does not expose the requested capability
    #[error("capability not available: {0}")]
    CapabilityUnavailable(String),

    /// Data store access failed
    #[error("data store error: {0}")]
    Data(String),

    /// Publishing to the transport failed
    #[error("publish failed: {0}")]
    Publish(String),
}

/// A state another machine on the same host must be in before a watcher
/// is allowed to run its checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignMachineState {
    /// Name of the other machine
    #[serde(rename = "machine_name")]
    pub machine_name: String,
    /// The state it must report
    #[serde(rename = "machine_state")]
    pub machine_state: String,
}

impl ForeignMachineState {
    pub fn new(machine: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            machine_name: machine.into(),
            machine_state: state.into(),
        }
    }
}

/// The machine a watcher is bound to.
///
/// Implemented by the external FSM engine; watchers only ever hold it as
/// `Arc<dyn Machine>`.
pub trait Machine: Send + Sync {
    /// Machine name as declared in its manifest
    fn name(&self) -> String;

    /// Directory the machine was loaded from
    fn directory(&self) -> PathBuf;

    /// Identity of the host running this machine
    fn identity(&self) -> String;

    /// Unique ID for this machine instance
    fn instance_id(&self) -> String;

    /// Machine version as declared in its manifest
    fn version(&self) -> String;

    /// When the machine instance started
    fn start_time(&self) -> chrono::DateTime<chrono::Utc>;

    /// Current unix time as seen by the machine, used in notifications
    fn timestamp_seconds(&self) -> i64;

    /// Current FSM state
    fn state(&self) -> String;

    /// Request a transition by event name
    fn transition(&self, event: &str) -> Result<(), MachineError>;

    /// Deliver a watcher state notification to the notification sinks
    fn notify_watcher_state(&self, watcher: &str, state: Value);

    /// Resolve the current state of another machine on the same host
    fn lookup_external_machine_state(&self, machine: &str) -> Result<String, MachineError>;

    /// Snapshot of the machine data store
    fn data(&self) -> HashMap<String, Value>;

    /// Store a value in the machine data store
    fn data_put(&self, key: &str, value: Value) -> Result<(), MachineError>;

    /// Fetch a value from the machine data store
    fn data_get(&self, key: &str) -> Option<Value>;

    /// Remove a value from the machine data store
    fn data_delete(&self, key: &str) -> Result<(), MachineError>;

    /// Host facts as a JSON document
    fn facts(&self) -> Value;

    /// Directory Prometheus textfile collectors scrape, when configured
    fn text_file_directory(&self) -> Option<PathBuf>;

    /// HTTP registration surface for switch and metric watchers, when the
    /// host exposes one
    fn http_manager(&self) -> Option<Arc<dyn HttpManager>>;

    /// Read-only access to a key-value bucket
    fn kv_bucket(&self, bucket: &str) -> Result<Arc<dyn KvBucket>, KvError>;

    /// The raw publish capability used by gossip watchers
    fn connector(&self) -> Result<Arc<dyn Connector>, MachineError>;

    /// Concurrency admission control shared across the host, when configured
    fn governor(&self) -> Option<Arc<dyn Governor>>;
}
