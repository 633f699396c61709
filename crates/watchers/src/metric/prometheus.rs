// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prometheus textfile output for metric watchers.
//!
//! Metric watchers across all machines merge their latest samples into
//! one textfile. The file is fully regenerated on every update and
//! renamed into place; entries that stop being updated age out after a
//! few regenerations so renamed watchers do not linger forever.

use crate::error::CheckError;
use crate::util::{atomic_write, prom_name};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{LazyLock, Mutex};

pub const TEXTFILE_NAME: &str = "drover_machine_metrics_watcher_status.prom";

/// Updates without a refresh before an entry stops being written.
const MAX_UNSEEN: u32 = 5;

struct StoredMetric {
    machine: String,
    watcher: String,
    labels: HashMap<String, String>,
    metrics: HashMap<String, f64>,
    seen: u32,
}

static METRICS: LazyLock<Mutex<HashMap<String, StoredMetric>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn metrics() -> std::sync::MutexGuard<'static, HashMap<String, StoredMetric>> {
    METRICS.lock().unwrap_or_else(|e| e.into_inner())
}

/// Store a watcher's latest sample and regenerate the textfile.
pub fn update_metric(
    machine: &str,
    watcher: &str,
    labels: HashMap<String, String>,
    samples: HashMap<String, f64>,
    text_file_dir: Option<&Path>,
) -> Result<(), CheckError> {
    let mut map = metrics();
    map.insert(
        format!("{}_{}", machine, watcher),
        StoredMetric {
            machine: machine.to_string(),
            watcher: watcher.to_string(),
            labels,
            metrics: samples,
            seen: 0,
        },
    );

    save(&mut map, text_file_dir)
}

/// Remove a watcher's sample and regenerate the textfile.
pub fn delete_metric(
    machine: &str,
    watcher: &str,
    text_file_dir: Option<&Path>,
) -> Result<(), CheckError> {
    let mut map = metrics();
    map.remove(&format!("{}_{}", machine, watcher));

    save(&mut map, text_file_dir)
}

fn save(
    map: &mut HashMap<String, StoredMetric>,
    text_file_dir: Option<&Path>,
) -> Result<(), CheckError> {
    let Some(dir) = text_file_dir else {
        return Ok(());
    };
    if !dir.is_dir() {
        return Ok(());
    }

    // group by metric name so help lines appear once per metric even
    // when several machines export the same name
    let mut grouped: HashMap<String, Vec<(String, f64)>> = HashMap::new();

    for stored in map.values_mut() {
        stored.seen += 1;
        if stored.seen > MAX_UNSEEN {
            continue;
        }

        for (metric, value) in &stored.metrics {
            let full_name = format!(
                "drover_machine_metric_watcher_{}_{}",
                prom_name(&stored.watcher),
                prom_name(metric)
            );

            let mut labels: Vec<String> = stored
                .labels
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", prom_name(k), v))
                .collect();
            labels.push(format!("machine=\"{}\"", prom_name(&stored.machine)));
            labels.sort();

            grouped
                .entry(full_name)
                .or_default()
                .push((labels.join(","), *value));
        }
    }

    let mut names: Vec<&String> = grouped.keys().collect();
    names.sort();

    let mut out = String::new();
    for name in names {
        out.push_str(&format!("# HELP {} Drover metric\n", name));
        out.push_str(&format!("# TYPE {} gauge\n", name));

        let Some(values) = grouped.get(name) else {
            continue;
        };
        let mut values = values.clone();
        values.sort_by(|a, b| a.0.cmp(&b.0));

        for (labels, value) in values {
            out.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
        }
    }

    atomic_write(dir, TEXTFILE_NAME, &out)
}
