// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Archive watcher: downloads, verifies and deploys tar.gz archives.
//!
//! On each eligible check the deployed tree is verified first; only when
//! it is missing or fails its content manifest does a download start.
//! Downloads verify the archive checksum before extraction (mismatch
//! fails closed), extraction rejects path traversal, and the deployed
//! tree is replaced by an atomic rename.

use crate::base::WatcherCore;
use crate::error::{CheckError, ConfigError};
use crate::properties::{self, lenient_duration, zero_duration};
use crate::registry::WatcherSpec;
use crate::util::{self, parse_interval};
use async_trait::async_trait;
use base64::Engine;
use drover_model::{Envelope, MachineError, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const WATCHER_TYPE: &str = "archive";

const MIN_INTERVAL: Duration = Duration::from_secs(10);
const MIN_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_GOVERNOR_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unknown,
    Skipped,
    Error,
    VerifiedOk,
    Downloaded,
    VerifyFailed,
    MissingCreates,
    MissingChecksums,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Unknown => "unknown",
            State::Skipped => "skipped",
            State::Error => "error",
            State::VerifiedOk => "verified",
            State::Downloaded => "downloaded",
            State::VerifyFailed => "verify_failed",
            State::MissingCreates => "no_creates",
            State::MissingChecksums => "no_checksums",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Properties {
    /// URL of the tar.gz archive, template rendered per download
    source: String,
    /// Expected SHA-256 of the archive file, template rendered
    checksum: String,
    /// Subdirectory the archive creates when extracted
    creates: String,
    /// Directory the archive is deployed into
    target: String,
    /// Checksum manifest inside the archive used to verify content
    verify: String,
    /// Expected SHA-256 of the manifest itself, template rendered
    #[serde(rename = "verify_checksum")]
    verify_checksum: String,
    username: String,
    password: String,
    governor: String,
    #[serde(
        rename = "governor_timeout",
        deserialize_with = "lenient_duration",
        default = "zero_duration"
    )]
    governor_timeout: Duration,
    /// Skip TLS verification on https downloads
    insecure: bool,
    #[serde(deserialize_with = "lenient_duration", default = "zero_duration")]
    timeout: Duration,
}

#[derive(Serialize)]
struct StateNotification {
    #[serde(flatten)]
    event: Envelope,
    source: String,
    creates: String,
    previous_outcome: String,
    previous_run_time: i64,
}

#[derive(Default)]
struct Mutable {
    previous: Option<State>,
    previous_run_time: Duration,
    previous_source: String,
    last_watch: Option<Instant>,
}

impl std::fmt::Debug for ArchiveWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWatcher").finish_non_exhaustive()
    }
}

pub struct ArchiveWatcher {
    core: WatcherCore,
    properties: Properties,
    interval: Duration,
    state: Mutex<Mutable>,
    watch_guard: tokio::sync::Mutex<()>,
}

/// Constructor registered for the `archive` type.
pub fn new(spec: WatcherSpec) -> Result<Arc<dyn Watcher>, ConfigError> {
    Ok(build(spec)? as Arc<dyn Watcher>)
}

fn build(spec: WatcherSpec) -> Result<Arc<ArchiveWatcher>, ConfigError> {
    let mut props: Properties = properties::decode(&spec.properties)?;

    if props.source.is_empty() {
        return Err(ConfigError::Missing("source"));
    }
    if props.creates.is_empty() {
        return Err(ConfigError::Missing("creates"));
    }
    if props.target.is_empty() {
        return Err(ConfigError::Missing("target"));
    }
    if props.checksum.is_empty() {
        return Err(ConfigError::Missing("checksum"));
    }
    if !props.verify.is_empty() && props.verify_checksum.is_empty() {
        return Err(ConfigError::Invalid(
            "verify_checksum is required if verify is set".to_string(),
        ));
    }
    if !props.username.is_empty() && props.password.is_empty() {
        return Err(ConfigError::Invalid(
            "password is required when username is given".to_string(),
        ));
    }
    if !props.governor.is_empty() && props.governor_timeout.is_zero() {
        props.governor_timeout = DEFAULT_GOVERNOR_TIMEOUT;
    }
    if props.timeout < MIN_TIMEOUT {
        props.timeout = MIN_TIMEOUT;
    }

    let interval = if spec.interval.trim().is_empty() {
        Duration::ZERO
    } else {
        parse_interval(&spec.interval, MIN_INTERVAL, MIN_INTERVAL)?
    };

    let core = WatcherCore::new(
        &spec.name,
        WATCHER_TYPE,
        spec.announce_interval,
        spec.active_states,
        spec.required_states,
        spec.machine,
        &spec.fail_event,
        &spec.success_event,
    )?;

    Ok(Arc::new(ArchiveWatcher {
        core,
        properties: props,
        interval,
        state: Mutex::new(Mutable::default()),
        watch_guard: tokio::sync::Mutex::new(()),
    }))
}

/// Everything the blocking download path needs, templates pre-rendered.
struct DownloadPlan {
    source: String,
    checksum: String,
    username: String,
    password: String,
    target: PathBuf,
    creates: String,
    verify: String,
    verify_checksum: String,
    timeout: Duration,
    insecure: bool,
}

/// True when a relative archive entry escapes the extraction root.
fn entry_escapes(path: &Path) -> bool {
    path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
}

/// Extract a gzipped tarball into `dest`, rejecting entries that are not
/// plain files or directories and any path that would land outside
/// `dest`.
fn extract_archive(archive: &Path, dest: &Path) -> Result<(), CheckError> {
    let file = std::fs::File::open(archive)?;
    let uncompressed = flate2::read::GzDecoder::new(file);
    let mut tar = tar::Archive::new(uncompressed);

    for entry in tar.entries()? {
        let mut entry = entry?;
        let kind = entry.header().entry_type();

        if !matches!(kind, tar::EntryType::Regular | tar::EntryType::Directory) {
            return Err(CheckError::Verification(
                "only regular files and directories are supported".to_string(),
            ));
        }

        let path = entry.path().map_err(|e| {
            CheckError::Verification(format!("invalid archive entry path: {}", e))
        })?;
        if entry_escapes(&path) {
            return Err(CheckError::Verification(
                "invalid archive detected".to_string(),
            ));
        }

        if !entry.unpack_in(dest)? {
            return Err(CheckError::Verification(
                "invalid archive detected".to_string(),
            ));
        }
    }

    Ok(())
}

/// Verify a deployed directory against its checksum manifest: the
/// manifest itself must match `verify_checksum`, then every listed file
/// must match.
fn verify_content(
    dir: &Path,
    verify: &str,
    verify_checksum: &str,
    on_mismatch: impl FnMut(&str),
) -> Result<(), CheckError> {
    if verify_checksum.is_empty() {
        return Err(CheckError::Verification(
            "verify_checksum resulted in an empty string".to_string(),
        ));
    }

    let sums_file = dir.join(verify);
    if !sums_file.is_file() {
        return Err(CheckError::Verification(format!(
            "checksums file {} does not exist in the archive",
            verify
        )));
    }

    let (ok, sum) = util::file_has_sha256(&sums_file, verify_checksum)?;
    if !ok {
        return Err(CheckError::Verification(format!(
            "checksum file {} has an invalid checksum {:?} != {:?}",
            verify, sum, verify_checksum
        )));
    }

    let ok = util::sha256_verify_dir(&sums_file, dir, on_mismatch)?;
    if !ok {
        return Err(CheckError::Verification(
            "contents did not pass verification".to_string(),
        ));
    }

    Ok(())
}

/// Download the archive to a scratch file, verify its checksum, extract
/// into a scratch directory, optionally verify the extracted content,
/// then swap the result into place. Runs on the blocking pool.
fn download_and_deploy(plan: &DownloadPlan) -> Result<(), CheckError> {
    let creates = plan.target.join(&plan.creates);

    // scratch space lives under target/tmp so the rename below stays on
    // one filesystem
    let scratch_parent = plan.target.join("tmp");
    std::fs::create_dir_all(&scratch_parent)?;
    let scratch = tempfile::tempdir_in(&scratch_parent)?;

    let archive_file = scratch.path().join("archive.tgz");
    download(plan, &archive_file)?;

    let (ok, sum) = util::file_has_sha256(&archive_file, &plan.checksum)?;
    if !ok {
        return Err(CheckError::Verification(format!(
            "archive checksum {} != {} mismatch",
            sum, plan.checksum
        )));
    }

    let extracted = scratch.path().join("extracted");
    std::fs::create_dir_all(&extracted)?;
    extract_archive(&archive_file, &extracted)?;

    if !plan.verify.is_empty() {
        verify_content(
            &extracted.join(&plan.creates),
            &plan.verify,
            &plan.verify_checksum,
            |_| {},
        )?;
    }

    if creates.exists() {
        std::fs::remove_dir_all(&creates)?;
    }
    std::fs::create_dir_all(&plan.target)?;
    std::fs::rename(extracted.join(&plan.creates), &creates)?;

    Ok(())
}

fn download(plan: &DownloadPlan, dest: &Path) -> Result<(), CheckError> {
    let mut config = ureq::Agent::config_builder().timeout_global(Some(plan.timeout));

    if plan.insecure {
        config = config.tls_config(
            ureq::tls::TlsConfig::builder()
                .disable_verification(true)
                .build(),
        );
    }

    let agent: ureq::Agent = config.build().into();
    let mut request = agent.get(&plan.source);

    if !plan.username.is_empty() {
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", plan.username, plan.password));
        request = request.header("Authorization", format!("Basic {}", credentials));
    }

    let mut response = request
        .call()
        .map_err(|e| CheckError::Other(format!("request failed: {}", e)))?;

    let mut file = std::fs::File::create(dest)?;
    let mut reader = response.body_mut().as_reader();
    std::io::copy(&mut reader, &mut file)?;

    Ok(())
}

impl ArchiveWatcher {
    fn mutable(&self) -> std::sync::MutexGuard<'_, Mutable> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn creates_path(&self) -> PathBuf {
        PathBuf::from(&self.properties.target).join(&self.properties.creates)
    }

    /// Verify the deployed tree without touching the network. Returns
    /// VerifiedOk when nothing needs downloading.
    fn verify_creates(&self) -> (PathBuf, State) {
        let creates = self.creates_path();

        if !creates.is_dir() {
            return (creates, State::MissingCreates);
        }

        if self.properties.verify.is_empty() {
            return (creates, State::VerifiedOk);
        }

        let checksums = creates.join(&self.properties.verify);
        if !checksums.exists() {
            self.core.error(format!(
                "checksums file {} does not exist in {}, triggering download",
                self.properties.verify,
                creates.display()
            ));
            return (creates, State::MissingChecksums);
        }

        let verify_checksum = match self.core.process_template(&self.properties.verify_checksum) {
            Ok(rendered) => rendered,
            Err(e) => {
                self.core
                    .error(format!("could not render verify_checksum template: {}", e));
                return (creates, State::VerifyFailed);
            }
        };

        let core = &self.core;
        match verify_content(&creates, &self.properties.verify, &verify_checksum, |f| {
            core.warn(format!("verification checksum failed for {}", f));
        }) {
            Ok(()) => {
                self.core.info(format!(
                    "checksums of {} verified successfully using {}",
                    creates.display(),
                    self.properties.verify
                ));
                (creates, State::VerifiedOk)
            }
            Err(e) => {
                self.core
                    .error(format!("checksum verification failed, triggering download: {}", e));
                (creates, State::VerifyFailed)
            }
        }
    }

    fn render_plan(&self) -> Result<DownloadPlan, CheckError> {
        let source = self.core.process_template(&self.properties.source)?;
        if source.is_empty() {
            return Err(CheckError::Template(
                "source template resulted in an empty string".to_string(),
            ));
        }

        let checksum = self.core.process_template(&self.properties.checksum)?;
        if checksum.is_empty() {
            return Err(CheckError::Template(
                "checksum template resulted in an empty string".to_string(),
            ));
        }

        let username = self.core.process_template(&self.properties.username)?;
        let password = self.core.process_template(&self.properties.password)?;

        let verify_checksum = if self.properties.verify.is_empty() {
            String::new()
        } else {
            self.core.process_template(&self.properties.verify_checksum)?
        };

        self.mutable().previous_source = source.clone();

        Ok(DownloadPlan {
            source,
            checksum,
            username,
            password,
            target: PathBuf::from(&self.properties.target),
            creates: self.properties.creates.clone(),
            verify: self.properties.verify.clone(),
            verify_checksum,
            timeout: self.properties.timeout,
            insecure: self.properties.insecure,
        })
    }

    async fn watch(&self, shutdown: &CancellationToken) -> (State, Option<CheckError>) {
        if !self.core.should_watch() {
            return (State::Skipped, None);
        }

        let start = Instant::now();
        let result = self.watch_inner(shutdown).await;
        self.mutable().previous_run_time = start.elapsed();

        result
    }

    async fn watch_inner(&self, shutdown: &CancellationToken) -> (State, Option<CheckError>) {
        let (_creates, state) = self.verify_creates();
        if state == State::VerifiedOk {
            return (state, None);
        }

        let _slot = if self.properties.governor.is_empty() {
            None
        } else {
            match self
                .core
                .enter_governor(
                    &self.properties.governor,
                    self.properties.governor_timeout,
                    shutdown.clone(),
                )
                .await
            {
                Ok(slot) => Some(slot),
                Err(e) => {
                    self.core.error(format!(
                        "cannot enter governor {}: {}",
                        self.properties.governor, e
                    ));
                    return (State::Error, Some(e));
                }
            }
        };

        let plan = match self.render_plan() {
            Ok(plan) => plan,
            Err(e) => return (State::Error, Some(e)),
        };

        self.core
            .info(format!("attempting to download {}", plan.source));

        let deployed = tokio::task::spawn_blocking(move || {
            let result = download_and_deploy(&plan);
            (plan, result)
        })
        .await;

        match deployed {
            Ok((plan, Ok(()))) => {
                self.core.warn(format!(
                    "archive {} was deployed successfully to {}",
                    plan.source, self.properties.creates
                ));
                (State::Downloaded, None)
            }
            Ok((_, Err(e))) => (State::Error, Some(e)),
            Err(e) => (State::Error, Some(CheckError::Other(e.to_string()))),
        }
    }

    async fn perform_watch(&self, shutdown: &CancellationToken, force: bool) {
        let _latch = self.watch_guard.lock().await;

        if !force && !self.interval.is_zero() {
            let last = self.mutable().last_watch;
            if let Some(last) = last {
                if last.elapsed() < self.interval {
                    return;
                }
            }
        }
        self.mutable().last_watch = Some(Instant::now());

        let (state, err) = self.watch(shutdown).await;
        if let Err(e) = self.handle_check(state, err) {
            self.core
                .error(format!("could not handle watcher event: {}", e));
        }
    }

    fn handle_check(&self, state: State, err: Option<CheckError>) -> Result<(), MachineError> {
        self.core
            .debug(format!("handling state {} {:?}", state.name(), err));

        self.mutable().previous = Some(state);

        match state {
            State::Error => {
                if let Some(err) = err {
                    self.core.error(format!("managing archive failed: {}", err));
                }

                self.core.notify_watcher_state(self.current_state());
                self.core.failure_transition()
            }

            State::Downloaded | State::VerifiedOk => {
                self.core.notify_watcher_state(self.current_state());
                self.core.success_transition()
            }

            State::VerifyFailed => {
                self.core.notify_watcher_state(self.current_state());
                self.core.failure_transition()
            }

            State::Unknown | State::Skipped | State::MissingCreates | State::MissingChecksums => {
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Watcher for ArchiveWatcher {
    fn name(&self) -> String {
        self.core.name().to_string()
    }

    fn watcher_type(&self) -> String {
        WATCHER_TYPE.to_string()
    }

    fn announce_interval(&self) -> Duration {
        self.core.announce_interval()
    }

    fn notify_state_change(&self) {
        self.core.notify_state_change();
    }

    fn current_state(&self) -> Value {
        let mutable = self.mutable();

        let source = if mutable.previous_source.is_empty() {
            self.properties.source.clone()
        } else {
            mutable.previous_source.clone()
        };

        let notification = StateNotification {
            event: Envelope::new(
                self.core.name(),
                WATCHER_TYPE,
                self.core.machine().as_ref(),
            ),
            source,
            creates: self.properties.creates.clone(),
            previous_outcome: mutable
                .previous
                .map(|s| s.name().to_string())
                .unwrap_or_else(|| State::Unknown.name().to_string()),
            previous_run_time: mutable.previous_run_time.as_nanos() as i64,
        };

        serde_json::to_value(notification).unwrap_or(Value::Null)
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.core.info("archive watcher starting");

        let Some(mut signal) = self.core.take_signal() else {
            return;
        };

        if !self.interval.is_zero() {
            let watcher = Arc::clone(&self);
            let token = shutdown.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(watcher.interval);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                tick.tick().await;

                loop {
                    tokio::select! {
                        _ = tick.tick() => watcher.perform_watch(&token, false).await,
                        _ = token.cancelled() => return,
                    }
                }
            });
        }

        self.perform_watch(&shutdown, false).await;

        loop {
            tokio::select! {
                Some(()) = signal.recv() => self.perform_watch(&shutdown, true).await,

                _ = shutdown.cancelled() => {
                    self.core.info("stopping on shutdown");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "archive_tests.rs"]
mod tests;
