// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The interface every watcher type implements.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A running watcher bound to one machine.
///
/// Watchers are held as `Arc<dyn Watcher>` by the manager: `run` executes
/// on its own task while `current_state` and `notify_state_change` are
/// called concurrently from the announce ticker and the FSM.
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Watcher name, unique within its machine
    fn name(&self) -> String;

    /// Type tag used for dispatch and notification subjects
    fn watcher_type(&self) -> String;

    /// How often the current state is re-published regardless of change,
    /// zero disables announcing
    fn announce_interval(&self) -> Duration;

    /// Signal that the machine changed state and eligibility should be
    /// re-evaluated now. Never blocks: when a signal is already pending
    /// the new one is dropped, a pending signal already implies re-check.
    fn notify_state_change(&self);

    /// Fresh JSON snapshot of the watcher state, built from current
    /// mutable fields on every call
    fn current_state(&self) -> Value;

    /// The watcher's main loop. Returns when the token is cancelled, at
    /// which point any externally held resource has been released.
    async fn run(self: Arc<Self>, shutdown: CancellationToken);

    /// Release external registrations before the watcher is removed
    fn delete(&self) {}
}
