// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers: duration parsing, SHA-256 verification, atomic file
//! writes and nagios perfdata parsing.

use crate::error::{CheckError, ConfigError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

/// Parse a human duration string like "500ms", "10s" or "1h 30m".
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(s.trim()).map_err(|_| ConfigError::InvalidDuration(s.to_string()))
}

/// Parse a watcher poll interval: empty strings take the type default,
/// anything below the type minimum is a configuration error.
pub fn parse_interval(
    raw: &str,
    default: Duration,
    minimum: Duration,
) -> Result<Duration, ConfigError> {
    let raw = raw.trim();
    let interval = if raw.is_empty() {
        default
    } else {
        parse_duration(raw)?
    };

    if interval < minimum {
        return Err(ConfigError::IntervalTooSmall(format!("{:?}", interval)));
    }

    Ok(interval)
}

/// SHA-256 digest of a file as a lowercase hex string.
pub fn file_sha256(path: &Path) -> Result<String, CheckError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Check a file against an expected SHA-256 hex digest.
///
/// Returns the match result along with the actual digest so callers can
/// include both sides in error messages.
pub fn file_has_sha256(path: &Path, expected: &str) -> Result<(bool, String), CheckError> {
    let sum = file_sha256(path)?;
    Ok((sum.eq_ignore_ascii_case(expected.trim()), sum))
}

/// Verify every entry of a `sha256sum`-format manifest against the files
/// under `dir`. Lines look like `<hex digest>  <relative path>`.
///
/// Returns false as soon as any file is missing or has a different digest;
/// `on_mismatch` is called for each failing entry.
pub fn sha256_verify_dir(
    sums_file: &Path,
    dir: &Path,
    mut on_mismatch: impl FnMut(&str),
) -> Result<bool, CheckError> {
    let reader = BufReader::new(File::open(sums_file)?);
    let mut ok = true;

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((digest, name)) = line.split_once(char::is_whitespace) else {
            return Err(CheckError::Verification(format!(
                "malformed checksum line: {}",
                line
            )));
        };

        let name = name.trim().trim_start_matches('*');
        let path = dir.join(name);

        if !path.is_file() {
            on_mismatch(name);
            ok = false;
            continue;
        }

        let (matches, _) = file_has_sha256(&path, digest)?;
        if !matches {
            on_mismatch(name);
            ok = false;
        }
    }

    Ok(ok)
}

/// Write a file atomically: temp file in the same directory, then rename
/// into place with 0644 permissions so a scraper never sees partial
/// content.
pub fn atomic_write(dir: &Path, file_name: &str, contents: &str) -> Result<(), CheckError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o644))?;
    }

    tmp.persist(dir.join(file_name))
        .map_err(|e| CheckError::Io(e.error))?;

    Ok(())
}

/// One data point parsed from nagios plugin performance data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfData {
    pub label: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
}

// label=value[unit][;warn;crit;min;max], label may be quoted
#[allow(clippy::unwrap_used)]
static PERF_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"('[^']+'|[^\s=']+)=(-?[\d.]+)([a-zA-Z%]*)").unwrap());

/// Parse the performance data section of nagios plugin output.
///
/// Everything after the first `|` is scanned for `label=value` pairs;
/// threshold and range fields are ignored.
pub fn parse_perf_data(output: &str) -> Vec<PerfData> {
    let Some((_, perf)) = output.split_once('|') else {
        return Vec::new();
    };

    PERF_ITEM
        .captures_iter(perf)
        .filter_map(|cap| {
            let label = cap.get(1)?.as_str().trim_matches('\'').to_string();
            let value: f64 = cap.get(2)?.as_str().parse().ok()?;
            let unit = cap.get(3).map(|m| m.as_str().to_string()).unwrap_or_default();

            Some(PerfData { label, value, unit })
        })
        .collect()
}

/// Sanitize a name for use in Prometheus metric names and label values.
pub fn prom_name(name: &str) -> String {
    name.to_lowercase()
        .replace([' ', ',', '"'], "_")
}

#[cfg(test)]
#[path = "util_tests.rs"]
mod tests;
