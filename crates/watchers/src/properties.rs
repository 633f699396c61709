// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed decoding of watcher property bags.
//!
//! Each watcher type declares a serde struct for its properties and decodes
//! the free-form map from the definition at construction time, so every
//! unknown or mistyped field is a configuration error before the watcher
//! exists — never a surprise at first check.

use crate::error::ConfigError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Decode a property map into a typed properties struct.
///
/// The target struct should carry `#[serde(deny_unknown_fields)]` so typos
/// in machine manifests surface here.
pub fn decode<T: DeserializeOwned>(properties: &Map<String, Value>) -> Result<T, ConfigError> {
    serde_json::from_value(Value::Object(properties.clone()))
        .map_err(|e| ConfigError::Properties(e.to_string()))
}

/// Deserialize a list field that accepts either an array of strings or a
/// single comma-separated string.
pub fn string_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Joined(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::List(items) => Ok(items),
        Raw::Joined(joined) => Ok(joined
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()),
    }
}

/// Deserialize an optional duration that accepts humantime strings, raw
/// second counts, or the literal "0" to mean unset.
pub fn lenient_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<std::time::Duration, D::Error> {
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Seconds(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(std::time::Duration::from_secs(secs)),
        Raw::Text(text) => {
            let text = text.trim();
            if text.is_empty() || text == "0" {
                return Ok(std::time::Duration::ZERO);
            }

            humantime::parse_duration(text)
                .map_err(|e| D::Error::custom(format!("invalid duration {:?}: {}", text, e)))
        }
    }
}

/// Default helper for serde defaults on duration fields.
pub fn zero_duration() -> std::time::Duration {
    std::time::Duration::ZERO
}

#[cfg(test)]
#[path = "properties_tests.rs"]
mod tests;
