// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machine loading boundary.
//!
//! The FSM engine owns machine manifests; the host only needs a way to
//! turn a directory into a running machine handle plus its watcher
//! definitions.

use drover_model::{Machine, MachineError};
use drover_watchers::{ManagerError, WatcherDef};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the host.
#[derive(Debug, Error)]
pub enum HostError {
    /// The machine source directory could not be read
    #[error("could not read machine source: {0}")]
    Source(std::io::Error),

    /// A machine failed to load from its directory
    #[error("could not load machine from {path}: {reason}")]
    Load { path: String, reason: String },

    /// No running machine has this name
    #[error("could not find machine {0}")]
    UnknownMachine(String),

    /// A machine operation failed
    #[error(transparent)]
    Machine(#[from] MachineError),

    /// The watcher manager failed to start
    #[error(transparent)]
    Manager(#[from] ManagerError),
}

/// A machine loaded from disk: the FSM handle and its declared watchers.
pub struct LoadedMachine {
    pub machine: Arc<dyn Machine>,
    pub watchers: Vec<WatcherDef>,
}

/// Loads machines from their on-disk directories. Implemented by the
/// external FSM engine.
pub trait MachineLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<LoadedMachine, HostError>;
}
