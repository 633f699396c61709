// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP boundary contract for switch and metric watchers.
//!
//! The HTTP server lives outside this workspace. Watchers that opt in
//! register themselves with an `HttpManager` and implement `SwitchSource`
//! or `MetricSource`; the server routes
//! `GET|POST /switch/{machine}/{watcher}` and
//! `GET /metric/{machine}/{watcher}` to those registrations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors from externally triggered switch operations.
#[derive(Debug, Error)]
pub enum SwitchError {
    /// The machine is in one of the watcher's disabled states
    #[error("watcher is disabled")]
    Disabled,

    /// The watcher is not eligible to run in the current machine state
    #[error("watcher is not in an active state")]
    NotActive,
}

/// Response body for `GET /switch/{machine}/{watcher}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchStatus {
    pub is_on: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

/// Response body for `GET /metric/{machine}/{watcher}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub labels: HashMap<String, String>,
    pub metrics: HashMap<String, f64>,
    /// Unix timestamp of the sample
    pub time: i64,
}

/// A watcher that can be flipped on and off by external callers.
pub trait SwitchSource: Send + Sync {
    fn name(&self) -> String;
    fn status(&self) -> SwitchStatus;
    /// Returns true when the press was accepted
    fn turn_on(&self) -> Result<bool, SwitchError>;
    /// Returns true when the press was accepted
    fn turn_off(&self) -> Result<bool, SwitchError>;
}

/// A watcher exposing its most recent metric sample.
pub trait MetricSource: Send + Sync {
    fn name(&self) -> String;
    fn last_metric(&self) -> MetricSnapshot;
}

/// Registration surface watchers use to become discoverable over HTTP.
pub trait HttpManager: Send + Sync {
    fn add_switch_watcher(&self, machine: &str, watcher: Arc<dyn SwitchSource>);
    fn remove_switch_watcher(&self, machine: &str, watcher: &str);
    fn add_metric_watcher(&self, machine: &str, watcher: Arc<dyn MetricSource>);
    fn remove_metric_watcher(&self, machine: &str, watcher: &str);
}
