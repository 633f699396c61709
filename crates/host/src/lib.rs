// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drover-host: The autonomous machine host
//!
//! Scans a source directory for machine subdirectories, loads each
//! through an injected loader, wires a watcher manager per machine and
//! keeps a queryable registry of what is running. The FSM engine behind
//! each machine stays external, reached only through `drover-model`
//! traits.

pub mod host;
pub mod loader;

pub use host::{Host, MachineInfo};
pub use loader::{HostError, LoadedMachine, MachineLoader};
