// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prometheus textfile output for nagios watchers.
//!
//! All nagios watchers across all machines write into one textfile, so
//! the state lives in a process-wide map. Every update regenerates the
//! whole file and renames it into place so the scraper never reads a
//! partial file.

use crate::error::CheckError;
use crate::util::{atomic_write, prom_name};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{LazyLock, Mutex};

pub const TEXTFILE_NAME: &str = "drover_machine_nagios_watcher_status.prom";

static STATUSES: LazyLock<Mutex<HashMap<String, i32>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn statuses() -> std::sync::MutexGuard<'static, HashMap<String, i32>> {
    STATUSES.lock().unwrap_or_else(|e| e.into_inner())
}

/// Record a watcher's status code and regenerate the textfile.
pub fn update_status(
    machine: &str,
    watcher: &str,
    status: i32,
    text_file_dir: Option<&Path>,
) -> Result<(), CheckError> {
    let mut map = statuses();
    map.insert(format!("{}\u{0}{}", machine, watcher), status);
    save(&map, text_file_dir)
}

/// Drop a watcher's entry and regenerate the textfile.
pub fn delete_status(
    machine: &str,
    watcher: &str,
    text_file_dir: Option<&Path>,
) -> Result<(), CheckError> {
    let mut map = statuses();
    map.remove(&format!("{}\u{0}{}", machine, watcher));
    save(&map, text_file_dir)
}

fn save(map: &HashMap<String, i32>, text_file_dir: Option<&Path>) -> Result<(), CheckError> {
    let Some(dir) = text_file_dir else {
        return Ok(());
    };
    if !dir.is_dir() {
        return Ok(());
    }

    let mut out = String::new();
    out.push_str("# HELP drover_machine_nagios_watcher_status Nagios watcher status code\n");
    out.push_str("# TYPE drover_machine_nagios_watcher_status gauge\n");

    let mut entries: Vec<(&String, &i32)> = map.iter().collect();
    entries.sort();

    for (key, status) in entries {
        let Some((machine, watcher)) = key.split_once('\u{0}') else {
            continue;
        };

        out.push_str(&format!(
            "drover_machine_nagios_watcher_status{{machine=\"{}\",watcher=\"{}\"}} {}\n",
            prom_name(machine),
            prom_name(watcher),
            status
        ));
    }

    atomic_write(dir, TEXTFILE_NAME, &out)
}
