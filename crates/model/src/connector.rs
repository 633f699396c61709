// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport and key-value capabilities.
//!
//! The network broker itself is an external collaborator; watchers only use
//! these two narrow surfaces: raw publish for gossip and read-only key
//! access for kv polling.

use crate::machine::MachineError;
use thiserror::Error;

/// Raw pub/sub publish capability.
pub trait Connector: Send + Sync {
    /// Publish a payload to a subject, fire and forget
    fn publish_raw(&self, subject: &str, payload: &[u8]) -> Result<(), MachineError>;
}

/// Errors from key-value bucket access.
#[derive(Debug, Error)]
pub enum KvError {
    /// The key does not exist in the bucket
    #[error("unknown key {0}")]
    UnknownKey(String),

    /// The bucket does not exist or is not reachable
    #[error("bucket not available: {0}")]
    BucketUnavailable(String),

    /// Any other access failure
    #[error("key-value error: {0}")]
    Other(String),
}

/// A value read from a key-value bucket along with its revision sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub value: Vec<u8>,
    /// Monotonic sequence number advanced on every put, including puts
    /// that wrote an identical value
    pub sequence: u64,
}

impl KvEntry {
    pub fn new(value: impl Into<Vec<u8>>, sequence: u64) -> Self {
        Self {
            value: value.into(),
            sequence,
        }
    }
}

/// Read-only access to one key-value bucket.
pub trait KvBucket: Send + Sync {
    /// Fetch a key. `Ok(None)` is never returned: a missing key is
    /// `Err(KvError::UnknownKey)` so callers can distinguish it from
    /// transport failures.
    fn get(&self, key: &str) -> Result<KvEntry, KvError>;
}
