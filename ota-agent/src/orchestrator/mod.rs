//! Update lifecycle orchestration.
//!
//! Composes the transport, backup store and scheduler into
//! check -> schedule -> backup -> download -> verify -> apply -> report,
//! plus rollback and cancellation. The orchestrator is the only writer of
//! the lifecycle state and of the persisted device state.

pub mod apply;
pub mod disk;
pub mod state;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::backup::{BackupRecord, BackupStore};
use crate::command::{Command, CommandQueue};
use crate::config::Config;
use crate::manifest::{Manifest, Severity};
use crate::notify::{EventSink, NotificationEvent};
use crate::scheduler::task::install_task_name;
use crate::scheduler::{Schedule, Task, TaskHandler, TaskInfo, TaskKind, TaskScheduler};
use crate::state_store::StateStore;
use crate::transport::checksum;
use crate::transport::{OtaClient, ReportStatus};
use crate::utils::errors::{OtaError, Result};
use apply::StagedFile;
use disk::{ensure_space, required_space_mb, SpaceProbe, StatvfsProbe};
pub use state::LifecycleState;

const PROGRESS_BACKUP: u8 = 10;
const PROGRESS_DOWNLOAD_START: u8 = 30;
const PROGRESS_DOWNLOAD_SPAN: usize = 50;
const PROGRESS_DONE: u8 = 100;

/// Orchestrator knobs taken from the agent configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// When `install_tonight` runs
    pub install_time: Schedule,
    pub download_dir: PathBuf,
    pub disk_check_path: PathBuf,
    pub backup_estimate_mb: u64,
    pub safety_buffer_mb: u64,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            install_time: Schedule::parse(&config.schedule.install_time)?,
            download_dir: config.update.download_dir.clone(),
            disk_check_path: config.update.disk_check_path.clone(),
            backup_estimate_mb: config.update.backup_estimate_mb,
            safety_buffer_mb: config.update.safety_buffer_mb,
        })
    }
}

/// Result of one update check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CheckOutcome {
    NoUpdate { version: String },
    UpdateAvailable { version: String, severity: Severity },
    Unreachable,
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: LifecycleState,
    pub current_version: String,
    pub update_available: bool,
    pub available_version: Option<String>,
    pub last_check_time: Option<DateTime<Local>>,
    pub next_update_time: Option<NaiveDateTime>,
    pub latest_backup: Option<BackupRecord>,
    pub tasks: Vec<TaskInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Connectivity {
    pub server_url: String,
    pub network: bool,
    pub manifest: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct UpdateOrchestrator {
    settings: OrchestratorSettings,
    client: OtaClient,
    backups: Arc<BackupStore>,
    scheduler: Arc<TaskScheduler>,
    store: StateStore,
    events: Arc<dyn EventSink>,
    commands: Arc<CommandQueue>,
    space: Box<dyn SpaceProbe>,
    lifecycle: Mutex<LifecycleState>,
    latest_manifest: Mutex<Option<Arc<Manifest>>>,
}

impl UpdateOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        client: OtaClient,
        backups: Arc<BackupStore>,
        scheduler: Arc<TaskScheduler>,
        store: StateStore,
        events: Arc<dyn EventSink>,
        commands: Arc<CommandQueue>,
    ) -> Self {
        Self {
            settings,
            client,
            backups,
            scheduler,
            store,
            events,
            commands,
            space: Box::new(StatvfsProbe),
            lifecycle: Mutex::new(LifecycleState::Idle),
            latest_manifest: Mutex::new(None),
        }
    }

    pub fn with_space_probe(mut self, probe: Box<dyn SpaceProbe>) -> Self {
        self.space = probe;
        self
    }

    pub fn state(&self) -> LifecycleState {
        *self.lifecycle.lock()
    }

    pub fn current_version(&self) -> String {
        self.store.current_version()
    }

    pub fn commands(&self) -> &Arc<CommandQueue> {
        &self.commands
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    /// Strict transition for externally triggered changes.
    fn transition(&self, next: LifecycleState) -> Result<()> {
        let mut state = self.lifecycle.lock();
        if *state == next {
            return Ok(());
        }
        if !state.can_transition_to(next) {
            return Err(OtaError::Lifecycle(format!(
                "cannot move from {} to {}",
                *state, next
            )));
        }
        info!(from = %*state, to = %next, "Lifecycle transition");
        *state = next;
        Ok(())
    }

    /// Transition inside a running install or rollback. An off-table move
    /// is logged and applied; the run must still reach a terminal state.
    fn advance(&self, next: LifecycleState) {
        let mut state = self.lifecycle.lock();
        if *state == next {
            return;
        }
        if state.can_transition_to(next) {
            info!(from = %*state, to = %next, "Lifecycle transition");
        } else {
            warn!(from = %*state, to = %next, "Unexpected lifecycle transition");
        }
        *state = next;
    }

    /// Enter `terminal`, then settle to `Idle`.
    fn settle(&self, terminal: LifecycleState) {
        self.advance(terminal);
        self.advance(LifecycleState::Idle);
    }

    fn progress(&self, version: &str, percent: u8) {
        debug!(version = %version, "Update progress {}%", percent);
        self.events
            .publish(NotificationEvent::update_in_progress(version, percent));
    }

    /// Register the daily check tasks and the command poll task.
    pub fn register_tasks(&self, check_times: &[String]) {
        for time in check_times {
            match Task::periodic_check(time) {
                Ok(task) => self.scheduler.add_task(task),
                Err(e) => warn!("Skipping check time '{}': {}", time, e),
            }
        }
        self.scheduler.add_task(Task::command_poll());
    }

    /// Ask the server whether a different release is published.
    pub async fn check_for_updates(&self) -> Result<CheckOutcome> {
        // Test and enter Checking under one lock so two triggers cannot
        // both start a check.
        let prior = {
            let mut state = self.lifecycle.lock();
            if !state.accepts_check() {
                info!(state = %*state, "Skipping update check");
                return Ok(CheckOutcome::Skipped {
                    reason: format!("lifecycle is {}", *state),
                });
            }
            let prior = *state;
            *state = LifecycleState::Checking;
            prior
        };

        info!("Checking for updates");
        if !self.client.check_network().await {
            error!("Network not available, skipping update check");
            self.advance(prior);
            return Ok(CheckOutcome::Unreachable);
        }

        let manifest = match self.client.fetch_manifest().await {
            Ok(manifest) => Arc::new(manifest),
            Err(e) => {
                error!("Failed to fetch manifest: {}", e);
                self.advance(prior);
                return Err(e);
            }
        };

        let current = self.store.current_version();
        let now = Local::now();

        if manifest.version == current {
            info!(version = %current, "No update available");
            let persisted = self.store.update(|s| {
                s.last_check_time = Some(now);
                s.update_available = false;
                s.available_version = None;
            });
            if let Err(e) = persisted {
                error!("Failed to persist check result: {}", e);
                self.advance(prior);
                return Err(e);
            }
            self.settle(LifecycleState::NoUpdate);
            return Ok(CheckOutcome::NoUpdate { version: current });
        }

        info!("Update available: {} -> {}", current, manifest.version);
        let persisted = self.store.update(|s| {
            s.last_check_time = Some(now);
            s.update_available = true;
            s.available_version = Some(manifest.version.clone());
        });
        if let Err(e) = persisted {
            error!("Failed to persist check result: {}", e);
            self.advance(prior);
            return Err(e);
        }
        *self.latest_manifest.lock() = Some(manifest.clone());
        self.advance(LifecycleState::UpdateAvailable);
        self.events
            .publish(NotificationEvent::update_available(&manifest));

        Ok(CheckOutcome::UpdateAvailable {
            version: manifest.version.clone(),
            severity: manifest.severity,
        })
    }

    /// Fresh manifest from the server, or the one seen by the last check
    /// when the server cannot be reached.
    async fn manifest_for_install(&self) -> Result<Arc<Manifest>> {
        match self.client.fetch_manifest().await {
            Ok(manifest) => {
                let manifest = Arc::new(manifest);
                *self.latest_manifest.lock() = Some(manifest.clone());
                Ok(manifest)
            }
            Err(e) => match self.latest_manifest.lock().clone() {
                Some(cached) => {
                    warn!("Manifest fetch failed ({}), using manifest from last check", e);
                    Ok(cached)
                }
                None => Err(e),
            },
        }
    }

    fn check_disk_space(&self, manifest: &Manifest) -> Result<()> {
        let required = required_space_mb(
            manifest.total_size_bytes(),
            self.settings.backup_estimate_mb,
            self.settings.safety_buffer_mb,
        );
        ensure_space(self.space.as_ref(), &self.settings.disk_check_path, required)
    }

    /// Schedule the published release for `schedule`.
    pub async fn schedule_update(&self, schedule: Schedule) -> Result<()> {
        let state = self.state();
        if state.is_busy() {
            return Err(OtaError::Lifecycle(format!(
                "cannot schedule while {}",
                state
            )));
        }

        let manifest = self.manifest_for_install().await?;
        let version = manifest.version.clone();
        if version == self.store.current_version() {
            info!(version = %version, "Already on the published version, nothing to schedule");
            return Ok(());
        }

        if self.state() == LifecycleState::Idle {
            self.transition(LifecycleState::UpdateAvailable)?;
            self.store.update(|s| {
                s.update_available = true;
                s.available_version = Some(version.clone());
            })?;
        }

        if let Err(e) = self.check_disk_space(&manifest) {
            error!("Insufficient disk space for update: {}", e);
            self.events.publish(NotificationEvent::update_result(
                &version,
                false,
                "Update failed: Insufficient disk space",
            ));
            return Err(e);
        }

        self.transition(LifecycleState::Scheduled)?;
        self.scheduler
            .add_task(Task::install(manifest.clone(), schedule));

        match schedule {
            Schedule::DailyAt(_) => {
                info!(version = %version, "Scheduling update at {}", schedule);
                self.events.publish(NotificationEvent::update_scheduled(
                    &version,
                    &schedule.to_string(),
                ));
            }
            Schedule::Immediate => {
                info!(version = %version, "Scheduling update for immediate execution");
                self.progress(&version, 0);
            }
        }
        Ok(())
    }

    /// Body of a fired install task. Never propagates install failures:
    /// they end in `Failed` with one notification and one upstream report.
    pub async fn run_install(&self, manifest: Arc<Manifest>) -> Result<()> {
        let version = manifest.version.clone();
        self.scheduler.remove_task(&install_task_name(&version));

        let state = self.state();
        if state != LifecycleState::Scheduled {
            warn!(version = %version, state = %state, "Install fired outside the scheduled state, ignoring");
            return Ok(());
        }

        info!(
            "Applying update from {} to {}",
            self.store.current_version(),
            version
        );
        self.advance(LifecycleState::Downloading);

        let staging = self.settings.download_dir.join(staging_name(&version));
        let result = self.install(&manifest, &staging).await;
        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to clean staging dir {}: {}", staging.display(), e);
            }
        }

        match result {
            Ok(()) => {
                let message = "Update completed successfully";
                self.advance(LifecycleState::Succeeded);
                self.events
                    .publish(NotificationEvent::update_result(&version, true, message));
                self.spawn_report(&version, ReportStatus::Success, message);
                info!(version = %version, "Update completed successfully");
                self.advance(LifecycleState::Idle);
            }
            Err(e) => {
                let message = format!("Update failed: {}", e);
                error!(version = %version, "{}", message);
                self.advance(LifecycleState::Failed);
                self.events
                    .publish(NotificationEvent::update_result(&version, false, &message));
                self.spawn_report(&version, ReportStatus::Failed, &message);
                self.advance(LifecycleState::Idle);
            }
        }
        Ok(())
    }

    async fn install(&self, manifest: &Manifest, staging: &Path) -> Result<()> {
        let version = manifest.version.as_str();

        // 1. Snapshot before touching anything live.
        let label = self.store.current_version();
        let backups = self.backups.clone();
        let backup_path = tokio::task::spawn_blocking(move || backups.create_backup(&label))
            .await
            .map_err(|e| OtaError::Backup(format!("backup task failed: {}", e)))??;
        info!("Backup created: {}", backup_path.display());
        self.progress(version, PROGRESS_BACKUP);
        self.progress(version, PROGRESS_DOWNLOAD_START);

        // 2. Download and verify each file into staging.
        if staging.exists() {
            tokio::fs::remove_dir_all(staging).await?;
        }
        tokio::fs::create_dir_all(staging).await?;

        let total = manifest.files.len();
        let mut staged = Vec::with_capacity(total);
        for (i, file) in manifest.files.iter().enumerate() {
            self.advance(LifecycleState::Downloading);
            let local = staging.join(format!("{:03}_{}", i, staged_file_name(&file.destination)));
            self.client.download_file(&file.remote_path, &local).await?;

            self.advance(LifecycleState::Verifying);
            match &file.checksum {
                Some(expected) => {
                    let (path, expected) = (local.clone(), expected.clone());
                    tokio::task::spawn_blocking(move || checksum::verify_file(&path, &expected))
                        .await
                        .map_err(|e| OtaError::Integrity(format!("verification task failed: {}", e)))??;
                }
                None => debug!("No checksum declared for {}", file.remote_path),
            }

            let percent = PROGRESS_DOWNLOAD_START as usize + PROGRESS_DOWNLOAD_SPAN * (i + 1) / total;
            self.progress(version, percent as u8);
            staged.push(StagedFile {
                staged: local,
                file: file.clone(),
            });
        }

        // 3. Every file verified: move them into place.
        self.advance(LifecycleState::Applying);
        let applied = tokio::task::spawn_blocking(move || apply::install_all(&staged))
            .await
            .map_err(|e| OtaError::Integrity(format!("apply task failed: {}", e)))??;
        info!("Applied {} of {} files", applied, total);

        // 4. Commit.
        let new_version = version.to_string();
        self.store.update(|s| {
            s.current_version = new_version;
            s.update_available = false;
            s.available_version = None;
        })?;
        self.progress(version, PROGRESS_DONE);
        Ok(())
    }

    fn spawn_report(&self, version: &str, status: ReportStatus, message: &str) {
        let client = self.client.clone();
        let (version, message) = (version.to_string(), message.to_string());
        tokio::spawn(async move {
            client.report_status(&version, status, &message).await;
        });
    }

    async fn latest_backup(&self) -> Option<BackupRecord> {
        let backups = self.backups.clone();
        tokio::task::spawn_blocking(move || backups.latest_backup())
            .await
            .unwrap_or_else(|e| {
                error!("Backup listing task failed: {}", e);
                None
            })
    }

    /// Offer a rollback to the most recent backup; it runs on confirmation.
    pub async fn prepare_rollback(&self) -> Result<()> {
        let current = self.store.current_version();
        let state = self.state();
        if state != LifecycleState::RollbackAvailable
            && !state.can_transition_to(LifecycleState::RollbackAvailable)
        {
            let message = format!("Rollback failed: cannot roll back while {}", state);
            warn!("{}", message);
            self.events
                .publish(NotificationEvent::rollback_result(&current, false, &message));
            return Err(OtaError::Lifecycle(message));
        }

        let Some(latest) = self.latest_backup().await else {
            error!("No backup available for rollback");
            self.advance(LifecycleState::RollbackFailed);
            self.events.publish(NotificationEvent::rollback_result(
                &current,
                false,
                "Rollback failed: No backup available",
            ));
            self.advance(LifecycleState::Idle);
            return Err(OtaError::NoBackup);
        };

        self.transition(LifecycleState::RollbackAvailable)?;
        self.events.publish(NotificationEvent::rollback_available(
            &current,
            &latest.version_label,
        ));
        info!("Rollback prepared: {} -> {}", current, latest.version_label);
        Ok(())
    }

    /// Execute a prepared rollback. Without one pending this is a no-op.
    pub async fn confirm(&self) -> Result<()> {
        if self.state() != LifecycleState::RollbackAvailable {
            info!("Nothing pending confirmation");
            return Ok(());
        }
        self.transition(LifecycleState::RollingBack)?;

        let current = self.store.current_version();
        let Some(latest) = self.latest_backup().await else {
            error!("No backup available for rollback");
            self.advance(LifecycleState::RollbackFailed);
            self.events.publish(NotificationEvent::rollback_result(
                &current,
                false,
                "Rollback failed: No backup available",
            ));
            self.advance(LifecycleState::Idle);
            return Err(OtaError::NoBackup);
        };

        info!("Executing rollback using backup: {}", latest.archive_path.display());
        let backups = self.backups.clone();
        let path = latest.archive_path.clone();
        let label = latest.version_label.clone();
        let restored = tokio::task::spawn_blocking(move || backups.restore_backup(&path))
            .await
            .map_err(|e| OtaError::Backup(format!("restore task failed: {}", e)))
            .and_then(|r| r)
            .and_then(|report| {
                if !report.failed.is_empty() {
                    warn!("Rollback left {} location(s) unrestored", report.failed.len());
                }
                self.store.update(|s| {
                    s.current_version = label;
                    s.update_available = false;
                    s.available_version = None;
                })
            });

        match restored {
            Ok(_) => {
                self.advance(LifecycleState::RolledBack);
                self.events.publish(NotificationEvent::rollback_result(
                    &latest.version_label,
                    true,
                    "Rollback completed successfully",
                ));
                info!(version = %latest.version_label, "Rollback completed successfully");
                self.advance(LifecycleState::Idle);
                Ok(())
            }
            Err(e) => {
                let message = format!("Rollback failed: {}", e);
                error!("{}", message);
                self.advance(LifecycleState::RollbackFailed);
                self.events
                    .publish(NotificationEvent::rollback_result(&current, false, &message));
                self.advance(LifecycleState::Idle);
                Err(e)
            }
        }
    }

    /// Drop pending installs (or a pending rollback offer).
    pub fn cancel_update(&self) -> Vec<String> {
        let cancelled = self.scheduler.remove_pending_installs();
        let state = self.state();

        if !cancelled.is_empty() {
            info!("Cancelled scheduled update tasks: {}", cancelled.len());
            if state == LifecycleState::Scheduled {
                self.advance(LifecycleState::UpdateAvailable);
            }
        } else if state == LifecycleState::RollbackAvailable {
            info!("Pending rollback withdrawn");
            self.advance(LifecycleState::Idle);
        } else {
            info!("No update scheduled to cancel");
        }
        cancelled
    }

    pub async fn handle_command(&self, command: Command) -> Result<()> {
        info!(command = %command, "Handling command");
        if command != Command::Unknown && self.state() == LifecycleState::Checking {
            info!(command = %command, "Check in progress, deferring command to the next poll");
            self.commands.push(command);
            return Ok(());
        }

        match command {
            Command::InstallTonight => self.schedule_update(self.settings.install_time).await,
            Command::InstallNow => self.schedule_update(Schedule::Immediate).await,
            Command::Rollback => self.prepare_rollback().await,
            Command::CancelUpdate => {
                self.cancel_update();
                Ok(())
            }
            Command::Confirmation => self.confirm().await,
            Command::Unknown => {
                debug!("Ignoring unknown command");
                Ok(())
            }
        }
    }

    pub async fn status(&self) -> StatusSnapshot {
        let persisted = self.store.snapshot();
        StatusSnapshot {
            state: self.state(),
            current_version: persisted.current_version,
            update_available: persisted.update_available,
            available_version: persisted.available_version,
            last_check_time: persisted.last_check_time,
            next_update_time: self.scheduler.next_update_time(),
            latest_backup: self.latest_backup().await,
            tasks: self.scheduler.tasks(),
        }
    }

    pub async fn connectivity_check(&self) -> Connectivity {
        let network = self.client.check_network().await;
        let mut result = Connectivity {
            server_url: self.client.server_url().to_string(),
            network,
            manifest: false,
            latest_version: None,
            error: None,
        };
        if !network {
            result.error = Some("update server unreachable".to_string());
            return result;
        }

        match self.client.probe_manifest().await {
            Ok(manifest) => {
                result.manifest = true;
                result.latest_version = Some(manifest.version);
            }
            Err(e) => result.error = Some(e.to_string()),
        }
        result
    }
}

#[async_trait]
impl TaskHandler for UpdateOrchestrator {
    async fn run_task(&self, name: &str, kind: &TaskKind) -> Result<()> {
        match kind {
            TaskKind::PeriodicCheck => {
                let outcome = self.check_for_updates().await?;
                debug!(task = %name, "Check outcome: {:?}", outcome);
                Ok(())
            }
            TaskKind::ScheduledInstall { manifest } => self.run_install(manifest.clone()).await,
            TaskKind::CommandPoll => {
                for command in self.commands.drain() {
                    if let Err(e) = self.handle_command(command).await {
                        warn!(command = %command, "Command failed: {}", e);
                    }
                }
                Ok(())
            }
        }
    }
}

fn staging_name(version: &str) -> String {
    version
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

fn staged_file_name(destination: &Path) -> String {
    destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "payload".to_string())
}
