// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Declarative watcher definitions from machine manifests.

use crate::error::ConfigError;
use crate::util::parse_duration;
use drover_model::ForeignMachineState;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Announce intervals below this are configuration errors.
pub const MIN_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(60);

/// One watcher as declared in a machine manifest.
///
/// `interval` stays a string here: each watcher type parses it and
/// enforces its own minimum at construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatcherDef {
    /// Watcher name, unique within the machine
    pub name: String,

    /// Type tag dispatched through the registry
    #[serde(rename = "type")]
    pub watcher_type: String,

    /// FSM states in which this watcher runs checks, empty means always
    #[serde(default)]
    pub state_match: Vec<String>,

    /// States other machines must be in before checks run, all must match
    #[serde(default)]
    pub required_states: Vec<ForeignMachineState>,

    /// FSM event fired when a check fails
    #[serde(default)]
    pub fail_transition: String,

    /// FSM event fired when a check succeeds
    #[serde(default)]
    pub success_transition: String,

    /// Poll period as a duration string, empty uses the type default
    #[serde(default)]
    pub interval: String,

    /// How often current state is re-published unprompted, empty or "0"
    /// disables announcing
    #[serde(default)]
    pub announce_interval: String,

    /// Free-form per-type configuration decoded at construction
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl WatcherDef {
    /// Parse and validate the announce interval. Zero disables announcing,
    /// anything below one minute is rejected.
    pub fn parse_announce_interval(&self) -> Result<Duration, ConfigError> {
        let raw = self.announce_interval.trim();
        if raw.is_empty() || raw == "0" {
            return Ok(Duration::ZERO);
        }

        let interval = parse_duration(raw)?;
        if interval < MIN_ANNOUNCE_INTERVAL {
            return Err(ConfigError::Invalid(format!(
                "announce interval {} is less than 1 minute",
                raw
            )));
        }

        Ok(interval)
    }
}

#[cfg(test)]
#[path = "def_tests.rs"]
mod tests;
