// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Common envelope carried by every watcher state notification.

use crate::machine::Machine;
use serde::{Deserialize, Serialize};

/// Subject watcher state notifications are published to.
pub fn watcher_state_subject(watcher_type: &str) -> String {
    format!("drover.machine.watcher.{}.state", watcher_type)
}

/// Subject FSM transition events are published to.
pub fn transition_subject() -> String {
    "drover.machine.transition".to_string()
}

/// Common fields embedded in every per-type state notification.
///
/// A fresh envelope is built on every `current_state()` call; envelopes are
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol identifier, `io.drover.machine.watcher.<type>.v1.state`
    pub protocol: String,
    /// Host identity
    pub identity: String,
    /// Machine instance ID
    pub id: String,
    /// Machine version
    pub version: String,
    /// Unix timestamp the notification was built
    pub timestamp: i64,
    /// Watcher type tag
    #[serde(rename = "type")]
    pub watcher_type: String,
    /// Machine name
    pub machine: String,
    /// Watcher name
    pub name: String,
}

impl Envelope {
    /// Build an envelope for a watcher on a machine.
    pub fn new(name: &str, watcher_type: &str, machine: &dyn Machine) -> Self {
        Self {
            protocol: format!("io.drover.machine.watcher.{}.v1.state", watcher_type),
            identity: machine.identity(),
            id: machine.instance_id(),
            version: machine.version(),
            timestamp: machine.timestamp_seconds(),
            watcher_type: watcher_type.to_string(),
            machine: machine.name(),
            name: name.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
