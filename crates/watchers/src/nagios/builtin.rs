// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in nagios checks that need no external plugin.

use super::State;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const HEARTBEAT: &str = "heartbeat";
pub const STATUS_FILE: &str = "status_file";

/// The fields read from a host status file.
#[derive(Debug, Deserialize)]
struct StatusFile {
    /// Unix timestamp of the last message the host processed
    timestamp: i64,
}

/// Always healthy, used to emit a periodic OK transition.
pub fn heartbeat() -> (State, String) {
    (State::Ok, "OK: heartbeat".to_string())
}

/// Check a JSON status file: critical when the last processed message is
/// older than the allowed age, unknown when the file is unreadable.
pub fn status_file(path: &Path, last_message: Duration, now: i64) -> (State, String) {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            return (
                State::Unknown,
                format!("UNKNOWN: could not read status file {}: {}", path.display(), e),
            )
        }
    };

    let status: StatusFile = match serde_json::from_str(&raw) {
        Ok(status) => status,
        Err(e) => {
            return (
                State::Unknown,
                format!("UNKNOWN: could not parse status file {}: {}", path.display(), e),
            )
        }
    };

    let age = now.saturating_sub(status.timestamp).max(0);
    let allowed = last_message.as_secs() as i64;

    if age > allowed {
        (
            State::Critical,
            format!(
                "CRITICAL: last message {}s ago, threshold {}s|age={}s",
                age, allowed, age
            ),
        )
    } else {
        (
            State::Ok,
            format!("OK: last message {}s ago|age={}s", age, age),
        )
    }
}
