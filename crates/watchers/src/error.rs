// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the watcher core.
//!
//! Configuration errors fail watcher construction synchronously and stop
//! that watcher from ever starting. Check errors are transient: they map to
//! a watcher-type-specific error outcome, get logged and retried on the
//! next tick, and never escape the run loop.

use drover_model::{GovernorError, MachineError};
use thiserror::Error;

/// Errors raised while constructing a watcher from its definition.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field is missing from the definition or properties
    #[error("{0} is required")]
    Missing(&'static str),

    /// An interval is below the minimum enforced for this watcher type
    #[error("interval {0} is too small")]
    IntervalTooSmall(String),

    /// A duration or interval string failed to parse
    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    /// The property bag contained unknown or mistyped fields
    #[error("could not set properties: {0}")]
    Properties(String),

    /// A constraint between properties is violated
    #[error("{0}")]
    Invalid(String),
}

/// Errors raised while running a check.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Template rendering failed
    #[error("template processing failed: {0}")]
    Template(String),

    /// Command execution failed or exited non-zero
    #[error("command failed: {0}")]
    Command(String),

    /// An external operation exceeded its timeout
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Governor admission failed
    #[error(transparent)]
    Governor(#[from] GovernorError),

    /// The machine rejected an operation
    #[error(transparent)]
    Machine(#[from] MachineError),

    /// Checksum or content verification failed
    #[error("verification failed: {0}")]
    Verification(String),

    /// Filesystem access failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// Errors raised by the per-machine manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Run was called before a machine was bound
    #[error("manager requires a machine to manage")]
    NoMachine,

    /// A watcher with this name already exists for the machine
    #[error("watcher {0} already exists")]
    DuplicateWatcher(String),

    /// The definition names a type no constructor is registered for
    #[error("unknown watcher type {0}")]
    UnknownType(String),

    /// A watcher failed to construct
    #[error("could not create {wtype} watcher {name}: {source}")]
    Construction {
        wtype: String,
        name: String,
        #[source]
        source: ConfigError,
    },
}
