// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drover-model: Capability interfaces for the drover watcher host
//!
//! This crate defines the narrow interfaces through which watchers reach
//! their collaborators:
//! - The `Machine` trait exposing FSM state, transitions, data store and
//!   fact lookup for the machine a watcher belongs to
//! - The `Watcher` trait every watcher type implements
//! - Connector, key-value and governor capabilities
//! - The HTTP registration surface for switch and metric watchers
//! - The common notification envelope published with every state change
//!
//! Everything behind these traits (the FSM engine, the network transport,
//! the HTTP server) lives outside this workspace.

pub mod connector;
pub mod event;
pub mod governor;
pub mod http;
pub mod machine;
pub mod watcher;

pub use connector::{Connector, KvBucket, KvEntry, KvError};
pub use event::Envelope;
pub use governor::{Governor, GovernorError, GovernorSlot};
pub use http::{HttpManager, MetricSnapshot, MetricSource, SwitchError, SwitchSource, SwitchStatus};
pub use machine::{ForeignMachineState, Machine, MachineError};
pub use watcher::Watcher;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeConnector, FakeGovernor, FakeHttpManager, FakeKvBucket, FakeMachine};
