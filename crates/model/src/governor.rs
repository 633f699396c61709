// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Governor admission control.
//!
//! A governor bounds how many expensive operations (archive downloads,
//! long execs) run concurrently across the whole host. Watchers acquire a
//! slot before the operation and the slot releases itself on drop, which
//! covers every exit path including errors.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from governor slot acquisition.
#[derive(Debug, Error)]
pub enum GovernorError {
    /// No slot became available within the timeout
    #[error("timed out waiting for a slot in governor {0}")]
    Timeout(String),

    /// Acquisition was cancelled by shutdown
    #[error("governor acquisition cancelled")]
    Cancelled,

    /// The governor backend failed
    #[error("governor error: {0}")]
    Other(String),
}

/// A held governor slot. The slot is released when this value drops.
pub struct GovernorSlot {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl GovernorSlot {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for GovernorSlot {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for GovernorSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernorSlot").finish()
    }
}

/// Host-wide admission control for expensive watcher operations.
#[async_trait]
pub trait Governor: Send + Sync {
    /// Acquire a slot in the named governor, waiting at most `timeout`.
    /// Cancelling the token aborts the wait.
    async fn acquire(
        &self,
        name: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<GovernorSlot, GovernorError>;
}
