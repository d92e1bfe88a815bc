//! Pipeline runner
//!
//! Drives the stage FSM sequentially, persisting the attempt log after
//! every transition so a crash at any point leaves an audit trail.
//! Cancellation is observed at stage boundaries and inside long waits;
//! applying migrations to the live database is deliberately not
//! interruptible.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::backup::BackupManager;
use crate::config::settings::Settings;
use crate::deploy::DeploymentController;
use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::health::HealthMonitor;
use crate::lock::DeployLock;
use crate::migrate::chain::MigrationChain;
use crate::migrate::runner::{ChainState, MigrationRunner};
use crate::models::{AttemptStatus, BackupRecord, Color, DeploymentAttempt};
use crate::pipeline::fsm::{PipelineFsm, Stage, StageEvent};
use crate::rollback::{RollbackContext, RollbackCoordinator};
use crate::services::Services;
use crate::storage::layout::StorageLayout;
use crate::storage::release::ReleaseState;
use crate::utils::generate_attempt_id;

/// Failure category, mapped to the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Preflight refused the deployment; nothing was mutated
    Preflight,

    /// A mutating stage failed and was compensated
    Deployment,

    /// New instances never became healthy; compensated
    Health,

    /// Compensation itself failed; human intervention required
    Rollback,
}

impl FailureKind {
    pub fn exit_code(&self) -> i32 {
        match self {
            FailureKind::Preflight => 1,
            FailureKind::Deployment => 2,
            FailureKind::Health => 3,
            FailureKind::Rollback => 4,
        }
    }
}

/// What went wrong, for operator output and the exit code
#[derive(Debug, Clone)]
pub struct PipelineFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Result of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub attempt: DeploymentAttempt,
    pub failure: Option<PipelineFailure>,

    /// The run was a rehearsal only; nothing live changed
    pub dry_run: bool,
}

impl PipelineOutcome {
    pub fn exit_code(&self) -> i32 {
        match &self.failure {
            None => 0,
            Some(failure) => failure.kind.exit_code(),
        }
    }
}

/// Deployment invocation options
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Image tag to deploy
    pub tag: String,

    /// Validate and rehearse only; no live mutation, no lock
    pub dry_run: bool,

    /// Skip the backup stage. Refused later if migrations are pending,
    /// since rehearsal needs a snapshot to copy.
    pub skip_backup: bool,

    /// Skip the readiness gate on the new instances
    pub skip_health_checks: bool,

    /// Override overridable preflight violations and stale locks
    pub force: bool,

    /// Override the live migration deadline
    pub timeout_override: Option<Duration>,
}

type SharedFreeSpaceProbe = Arc<dyn Fn(&std::path::Path) -> Option<u64> + Send + Sync>;

/// Pipeline runner
pub struct PipelineRunner {
    settings: Settings,
    services: Services,
    layout: StorageLayout,
    cancel: watch::Receiver<bool>,
    free_space: Option<SharedFreeSpaceProbe>,
}

impl PipelineRunner {
    pub fn new(
        settings: Settings,
        services: Services,
        layout: StorageLayout,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            settings,
            services,
            layout,
            cancel,
            free_space: None,
        }
    }

    /// Replace the preflight free-space probe (tests inject fixed values)
    pub fn with_free_space_probe(
        mut self,
        probe: impl Fn(&std::path::Path) -> Option<u64> + Send + Sync + 'static,
    ) -> Self {
        self.free_space = Some(Arc::new(probe));
        self
    }

    /// Run one deployment end to end
    pub async fn deploy(
        &self,
        options: &DeployOptions,
    ) -> Result<PipelineOutcome, OrchestratorError> {
        self.layout.setup().await?;

        let controller = self.controller();
        let live_color = controller.live_color().await?;
        let target_color = live_color.opposite();
        let previous_tag = match ReleaseState::load(&self.layout.release_state_file()).await? {
            Some(state) => state.tag,
            None => String::new(),
        };

        let attempt_id = generate_attempt_id(Utc::now());
        let mut attempt = DeploymentAttempt::new(
            attempt_id.clone(),
            self.settings.environment.clone(),
            options.tag.clone(),
            target_color,
        );
        attempt.previous_tag = previous_tag.clone();

        info!(
            "Starting deployment {} of {} as {} ({} stays live until switch)",
            attempt.id, options.tag, target_color, live_color
        );

        // A dry run mutates nothing shared, so it runs unlocked
        let lock = if options.dry_run {
            None
        } else {
            Some(
                DeployLock::acquire(
                    self.layout.lock_file(&self.settings.environment),
                    &attempt.id,
                    self.settings.lock_ttl_secs,
                    options.force,
                )
                .await?,
            )
        };

        let outcome = self
            .run_stages(options, &mut attempt, live_color, target_color)
            .await;

        if let Some(lock) = lock {
            lock.release().await?;
        }

        let failure = outcome?;
        self.persist_attempt(&attempt).await?;
        Ok(PipelineOutcome {
            attempt,
            failure,
            dry_run: options.dry_run,
        })
    }

    async fn run_stages(
        &self,
        options: &DeployOptions,
        attempt: &mut DeploymentAttempt,
        live_color: Color,
        target_color: Color,
    ) -> Result<Option<PipelineFailure>, OrchestratorError> {
        let controller = self.controller();
        let backups = self.backups();
        let monitor = self.monitor();
        let migrations = self.migration_runner(options.timeout_override).await?;

        let mut fsm = PipelineFsm::new();
        let mut failure_kind = FailureKind::Deployment;
        let mut backup: Option<BackupRecord> = None;
        let mut temp_snapshot: Option<File> = None;
        let mut schema_reverted = false;
        let mut traffic_switched = false;

        while !fsm.is_terminal() {
            let stage = fsm.stage();

            // Stage boundary is a suspension point
            if stage != Stage::RollingBack && self.is_cancelled() {
                warn!("Cancellation requested; stopping at {}", stage);
                if options.dry_run {
                    self.discard_temp_snapshot(&mut temp_snapshot).await;
                    return self
                        .finish_dry_run_failure(attempt, stage, "cancelled by operator".to_string())
                        .await;
                }
                attempt.record_stage(stage.as_str(), false, Some("cancelled".to_string()));
                fsm.process(StageEvent::Cancelled)
                    .map_err(OrchestratorError::Internal)?;
                self.persist_attempt(attempt).await?;
                continue;
            }

            let event = match stage {
                Stage::Preflight => {
                    let result = match self.run_cancellable(self.stage_preflight(options)).await {
                        None => StageEvent::Cancelled,
                        Some(Ok(())) => StageEvent::Passed,
                        Some(Err(message)) => {
                            failure_kind = FailureKind::Preflight;
                            StageEvent::Failed(message)
                        }
                    };
                    self.finish_stage(attempt, stage, &result);
                    result
                }

                Stage::Backup => {
                    let result = if options.dry_run {
                        self.stage_backup_dry_run(&backups, attempt, &mut backup, &mut temp_snapshot)
                            .await
                    } else if options.skip_backup {
                        attempt.narrate("backup skipped by operator");
                        warn!("Backup skipped (--skip-backup)");
                        StageEvent::Passed
                    } else {
                        match self
                            .run_cancellable(backups.create(Some(&attempt.id)))
                            .await
                        {
                            None => StageEvent::Cancelled,
                            Some(Ok(record)) => {
                                attempt.backup_id = Some(record.id.clone());
                                backup = Some(record);
                                StageEvent::Passed
                            }
                            Some(Err(e)) => StageEvent::Failed(e.to_string()),
                        }
                    };
                    self.finish_stage(attempt, stage, &result);
                    result
                }

                Stage::Migrate => {
                    let result = self
                        .stage_migrate(options, &migrations, backup.as_ref(), attempt)
                        .await;
                    let event = match result {
                        MigrateVerdict::Applied => StageEvent::Passed,
                        MigrateVerdict::DryRunDone => {
                            self.discard_temp_snapshot(&mut temp_snapshot).await;
                            self.finish_stage(attempt, stage, &StageEvent::Passed);
                            attempt.narrate("dry run complete; no live changes made");
                            info!("Dry run complete: preflight, backup, and rehearsal passed");
                            fsm_finish_dry_run(&mut fsm)?;
                            self.persist_attempt(attempt).await?;
                            continue;
                        }
                        // A dry run has touched nothing live, so a failure
                        // or cancel here must not enter the rollback path
                        MigrateVerdict::Cancelled if options.dry_run => {
                            self.discard_temp_snapshot(&mut temp_snapshot).await;
                            return self
                                .finish_dry_run_failure(
                                    attempt,
                                    stage,
                                    "cancelled by operator".to_string(),
                                )
                                .await;
                        }
                        MigrateVerdict::Failed { message, .. } if options.dry_run => {
                            self.discard_temp_snapshot(&mut temp_snapshot).await;
                            return self.finish_dry_run_failure(attempt, stage, message).await;
                        }
                        MigrateVerdict::Cancelled => StageEvent::Cancelled,
                        MigrateVerdict::Failed { message, reverted } => {
                            schema_reverted = reverted;
                            StageEvent::Failed(message)
                        }
                    };
                    self.finish_stage(attempt, stage, &event);
                    event
                }

                Stage::Launch => {
                    let result = self
                        .run_cancellable(controller.launch(target_color, &options.tag))
                        .await;
                    let event = match result {
                        None => StageEvent::Cancelled,
                        Some(Ok(_)) => StageEvent::Passed,
                        Some(Err(e)) => StageEvent::Failed(e.to_string()),
                    };
                    self.finish_stage(attempt, stage, &event);
                    event
                }

                Stage::HealthCheck => {
                    let event = if options.skip_health_checks {
                        attempt.narrate("readiness gate skipped by operator");
                        warn!("Health checks skipped (--skip-health-checks)");
                        StageEvent::Passed
                    } else {
                        let targets = controller.health_targets(target_color);
                        match self.run_cancellable(monitor.wait_until_healthy(&targets)).await {
                            None => StageEvent::Cancelled,
                            Some(round) => {
                                attempt.health_results.extend(round.results.clone());
                                if round.healthy {
                                    StageEvent::Passed
                                } else {
                                    failure_kind = FailureKind::Health;
                                    StageEvent::Failed(format!(
                                        "{} instances unhealthy after {} attempt(s)",
                                        target_color, round.attempt
                                    ))
                                }
                            }
                        }
                    };
                    self.finish_stage(attempt, stage, &event);
                    event
                }

                Stage::Switch => {
                    let result = self
                        .run_cancellable(controller.switch_traffic(target_color, &options.tag))
                        .await;
                    let event = match result {
                        None => StageEvent::Cancelled,
                        Some(Ok(())) => {
                            traffic_switched = true;
                            StageEvent::Passed
                        }
                        Some(Err(e)) => StageEvent::Failed(e.to_string()),
                    };
                    self.finish_stage(attempt, stage, &event);
                    event
                }

                Stage::Drain => {
                    let period = controller.drain_period();
                    info!("Draining {} for {:?}", live_color, period);
                    let event = match self.run_cancellable(tokio::time::sleep(period)).await {
                        None => StageEvent::Cancelled,
                        Some(()) => StageEvent::Passed,
                    };
                    self.finish_stage(attempt, stage, &event);
                    event
                }

                Stage::Cleanup => {
                    let event = match self.run_cancellable(controller.teardown(live_color)).await {
                        None => StageEvent::Cancelled,
                        Some(Ok(())) => StageEvent::Passed,
                        Some(Err(e)) => StageEvent::Failed(e.to_string()),
                    };
                    self.finish_stage(attempt, stage, &event);
                    event
                }

                Stage::RollingBack => {
                    let ctx = RollbackContext {
                        reason: fsm.error().unwrap_or("unknown failure").to_string(),
                        target_color,
                        live_color,
                        migrations_applied: attempt.migrations_applied.clone(),
                        schema_reverted,
                        backup: backup.clone(),
                        traffic_switched,
                        previous_tag: attempt.previous_tag.clone(),
                    };
                    let coordinator = RollbackCoordinator::new(
                        &controller,
                        Some(&migrations),
                        &backups,
                        &monitor,
                        self.settings.rollback_retries,
                    );
                    match coordinator.rollback(&ctx, attempt).await {
                        Ok(()) => StageEvent::RollbackSucceeded,
                        Err(e) => {
                            failure_kind = FailureKind::Rollback;
                            StageEvent::RollbackFailed(e.to_string())
                        }
                    }
                }

                Stage::Succeeded | Stage::RolledBack | Stage::Failed => unreachable!(),
            };

            fsm.process(event).map_err(OrchestratorError::Internal)?;
            self.persist_attempt(attempt).await?;
        }

        let error = fsm.error().map(str::to_string);
        attempt
            .finish(fsm.attempt_status())
            .map_err(OrchestratorError::Internal)?;

        match fsm.stage() {
            Stage::Succeeded => {
                info!("Deployment {} succeeded: {} is live", attempt.id, attempt.target_color);
                Ok(None)
            }
            _ => Ok(Some(PipelineFailure {
                kind: failure_kind,
                message: error.unwrap_or_else(|| "deployment failed".to_string()),
            })),
        }
    }

    async fn stage_preflight(&self, options: &DeployOptions) -> Result<(), String> {
        let mut validator = crate::preflight::PreflightValidator::new(
            self.settings.clone(),
            self.services.clone(),
            self.layout.backups_dir().path().to_path_buf(),
        );
        if let Some(probe) = &self.free_space {
            let probe = Arc::clone(probe);
            validator = validator.with_free_space_probe(move |path| probe(path));
        }
        let report = validator.run().await;

        if report.passed() {
            return Ok(());
        }
        if options.force && report.passes_with_override() {
            warn!("Overriding preflight violations (--force)");
            return Ok(());
        }

        let detail: Vec<String> = report
            .violations()
            .iter()
            .map(|c| format!("{}: {}", c.name, c.message))
            .collect();
        Err(detail.join("; "))
    }

    async fn stage_migrate(
        &self,
        options: &DeployOptions,
        migrations: &MigrationRunner,
        backup: Option<&BackupRecord>,
        attempt: &mut DeploymentAttempt,
    ) -> MigrateVerdict {
        let pending = match migrations.pending_live().await {
            Ok(pending) => pending,
            Err(e) => {
                return MigrateVerdict::Failed {
                    message: e.to_string(),
                    reverted: true,
                }
            }
        };

        if pending.is_empty() {
            info!("No pending migrations");
            attempt.narrate("no pending migrations");
            return match options.dry_run {
                true => MigrateVerdict::DryRunDone,
                false => MigrateVerdict::Applied,
            };
        }

        let Some(backup) = backup else {
            return MigrateVerdict::Failed {
                message: format!(
                    "{} pending migration(s) need a snapshot for rehearsal; \
                     re-run without --skip-backup",
                    pending.len()
                ),
                reverted: true,
            };
        };

        let mut chain_state = ChainState::NotApplied;
        let rehearsal = self
            .run_cancellable(migrations.rehearse(backup, &mut chain_state))
            .await;
        match rehearsal {
            None => return MigrateVerdict::Cancelled,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                // Live database untouched; nothing to revert
                return MigrateVerdict::Failed {
                    message: format!("rehearsal failed: {}", e),
                    reverted: true,
                };
            }
        }

        if options.dry_run {
            return MigrateVerdict::DryRunDone;
        }

        // A cancel request landing here still gets honored before the
        // live apply starts; once started, the apply runs to its own
        // deadline uninterrupted.
        if self.is_cancelled() {
            return MigrateVerdict::Cancelled;
        }

        match migrations.apply_live(&mut chain_state).await {
            Ok(applied) => {
                attempt.migrations_applied = applied;
                MigrateVerdict::Applied
            }
            Err(e) => {
                // Revisions that survived a failed reversal stay on the
                // attempt so the rollback path knows a restore is due
                attempt.migrations_applied = e.applied;
                MigrateVerdict::Failed {
                    message: e.message,
                    reverted: e.schema_reverted,
                }
            }
        }
    }

    /// Find or take a snapshot for dry-run rehearsal. The backup index and
    /// the retention window stay untouched; a snapshot taken here is
    /// temporary and removed before the run finishes.
    async fn stage_backup_dry_run(
        &self,
        backups: &BackupManager,
        attempt: &mut DeploymentAttempt,
        backup: &mut Option<BackupRecord>,
        temp_snapshot: &mut Option<File>,
    ) -> StageEvent {
        match backups.latest().await {
            Err(e) => return StageEvent::Failed(e.to_string()),
            Ok(Some(record)) => {
                info!("Dry run: reusing backup {} for rehearsal", record.id);
                attempt.narrate(format!(
                    "dry run: rehearsing against existing backup {}",
                    record.id
                ));
                *backup = Some(record);
                return StageEvent::Passed;
            }
            Ok(None) => {}
        }

        match self
            .run_cancellable(backups.snapshot_unindexed(&self.layout.scratch_dir()))
            .await
        {
            None => StageEvent::Cancelled,
            Some(Ok(record)) => {
                attempt.narrate(format!(
                    "dry run: temporary snapshot {} taken for rehearsal",
                    record.id
                ));
                *temp_snapshot = Some(File::new(&record.path));
                *backup = Some(record);
                StageEvent::Passed
            }
            Some(Err(e)) => StageEvent::Failed(e.to_string()),
        }
    }

    async fn discard_temp_snapshot(&self, temp_snapshot: &mut Option<File>) {
        if let Some(file) = temp_snapshot.take() {
            if let Err(e) = file.delete().await {
                warn!(
                    "Failed to remove dry-run snapshot {}: {}",
                    file.path().display(),
                    e
                );
            }
        }
    }

    /// Terminate a dry run: nothing live was touched, so the rolling-back
    /// stage must not run
    async fn finish_dry_run_failure(
        &self,
        attempt: &mut DeploymentAttempt,
        stage: Stage,
        message: String,
    ) -> Result<Option<PipelineFailure>, OrchestratorError> {
        attempt.record_stage(stage.as_str(), false, Some(message.clone()));
        attempt.narrate("dry run stopped; no live changes were made");
        attempt
            .finish(AttemptStatus::Failed)
            .map_err(OrchestratorError::Internal)?;
        self.persist_attempt(attempt).await?;
        Ok(Some(PipelineFailure {
            kind: FailureKind::Deployment,
            message,
        }))
    }

    /// Compensate the most recent attempt.
    ///
    /// A succeeded deployment rolls back by redeploying the previous tag
    /// through the full pipeline; schema revisions stay in place, since
    /// rehearsal already proved the previous release runs against them. A
    /// failed or partial attempt re-runs the compensation procedure from
    /// its recorded context.
    pub async fn rollback_last(&self, force: bool) -> Result<PipelineOutcome, OrchestratorError> {
        let last = self
            .recent_attempts(1)
            .await?
            .pop()
            .ok_or_else(|| OrchestratorError::NotFound("no recorded deployments".to_string()))?;

        if last.status == crate::models::AttemptStatus::Succeeded {
            if last.previous_tag.is_empty() {
                return Err(OrchestratorError::RollbackError(format!(
                    "attempt {} has no previous release to roll back to",
                    last.id
                )));
            }
            info!(
                "Rolling back {} by redeploying previous tag {}",
                last.id, last.previous_tag
            );
            let options = DeployOptions {
                tag: last.previous_tag.clone(),
                force,
                ..DeployOptions::default()
            };
            return self.deploy(&options).await;
        }

        // Partial attempt: compensate from what the log recorded
        self.layout.setup().await?;
        let attempt_id = generate_attempt_id(Utc::now());
        let mut attempt = DeploymentAttempt::new(
            attempt_id,
            self.settings.environment.clone(),
            last.tag.clone(),
            last.target_color,
        );
        attempt.previous_tag = last.previous_tag.clone();
        attempt.narrate(format!("operator rollback of attempt {}", last.id));

        let lock = DeployLock::acquire(
            self.layout.lock_file(&self.settings.environment),
            &attempt.id,
            self.settings.lock_ttl_secs,
            force,
        )
        .await?;

        let controller = self.controller();
        let backups = self.backups();
        let monitor = self.monitor();
        let migrations = self.migration_runner(None).await?;

        let backup = match &last.backup_id {
            Some(id) => Some(backups.find(id).await?),
            None => None,
        };
        let traffic_switched = last
            .stages
            .iter()
            .any(|s| s.stage == Stage::Switch.as_str() && s.passed);

        let ctx = RollbackContext {
            reason: format!("operator rollback of attempt {}", last.id),
            target_color: last.target_color,
            live_color: last.target_color.opposite(),
            migrations_applied: last.migrations_applied.clone(),
            schema_reverted: false,
            backup,
            traffic_switched,
            previous_tag: last.previous_tag.clone(),
        };
        let coordinator = RollbackCoordinator::new(
            &controller,
            Some(&migrations),
            &backups,
            &monitor,
            self.settings.rollback_retries,
        );

        let result = coordinator.rollback(&ctx, &mut attempt).await;
        lock.release().await?;

        let failure = match result {
            Ok(()) => {
                attempt
                    .finish(crate::models::AttemptStatus::RolledBack)
                    .map_err(OrchestratorError::Internal)?;
                None
            }
            Err(e) => {
                attempt
                    .finish(crate::models::AttemptStatus::Failed)
                    .map_err(OrchestratorError::Internal)?;
                Some(PipelineFailure {
                    kind: FailureKind::Rollback,
                    message: e.to_string(),
                })
            }
        };

        self.persist_attempt(&attempt).await?;
        Ok(PipelineOutcome {
            attempt,
            failure,
            dry_run: false,
        })
    }

    /// Most recent attempts, newest last
    pub async fn recent_attempts(
        &self,
        limit: usize,
    ) -> Result<Vec<DeploymentAttempt>, OrchestratorError> {
        recent_attempts(&self.layout, limit).await
    }

    /// Build the migration runner, loading and validating the chain
    pub async fn migration_runner(
        &self,
        timeout_override: Option<Duration>,
    ) -> Result<MigrationRunner, OrchestratorError> {
        let dir = Dir::new(&self.settings.migrations_dir);
        let chain = if dir.exists().await {
            MigrationChain::load(&dir).await?
        } else {
            MigrationChain::default()
        };
        let timeout = timeout_override
            .unwrap_or(Duration::from_secs(self.settings.migration_timeout_secs));
        Ok(MigrationRunner::new(
            Arc::clone(&self.services.database),
            chain,
            self.settings.database.scratch_name.clone(),
            timeout,
        ))
    }

    pub fn controller(&self) -> DeploymentController {
        DeploymentController::new(
            self.services.clone(),
            self.settings.app.clone(),
            self.layout.release_state_file(),
            Duration::from_secs(self.settings.drain_secs),
        )
    }

    pub fn backups(&self) -> BackupManager {
        BackupManager::new(
            Arc::clone(&self.services.database),
            self.layout.backups_dir(),
            self.layout.backup_index_file(),
            self.settings.backup.keep,
            self.settings.backup.retention_days,
        )
    }

    pub fn monitor(&self) -> HealthMonitor {
        HealthMonitor::new(self.services.clone(), &self.settings.health)
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Run a future until it completes or cancellation is requested.
    /// Returns None when cancelled; the future is dropped at that point.
    async fn run_cancellable<F, T>(&self, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        let mut rx = self.cancel.clone();
        tokio::select! {
            biased;
            _ = async {
                loop {
                    if *rx.borrow() {
                        return;
                    }
                    if rx.changed().await.is_err() {
                        // Sender gone: cancellation can never arrive
                        std::future::pending::<()>().await;
                    }
                }
            } => None,
            value = fut => Some(value),
        }
    }

    fn finish_stage(&self, attempt: &mut DeploymentAttempt, stage: Stage, event: &StageEvent) {
        match event {
            StageEvent::Passed => attempt.record_stage(stage.as_str(), true, None),
            StageEvent::Failed(err) => {
                attempt.record_stage(stage.as_str(), false, Some(err.clone()))
            }
            StageEvent::Cancelled => {
                attempt.record_stage(stage.as_str(), false, Some("cancelled".to_string()))
            }
            StageEvent::RollbackSucceeded | StageEvent::RollbackFailed(_) => {}
        }
    }

    async fn persist_attempt(
        &self,
        attempt: &DeploymentAttempt,
    ) -> Result<(), OrchestratorError> {
        let path = self
            .layout
            .attempts_dir()
            .path()
            .join(format!("{}.json", attempt.id));
        File::new(path).write_json_atomic(attempt).await
    }
}

/// Most recent attempt logs under a storage layout, newest last
pub async fn recent_attempts(
    layout: &StorageLayout,
    limit: usize,
) -> Result<Vec<DeploymentAttempt>, OrchestratorError> {
    let dir = layout.attempts_dir();
    if !dir.exists().await {
        return Ok(Vec::new());
    }

    let files: Vec<_> = dir
        .list_files()
        .await?
        .into_iter()
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();

    // Attempt ids have second resolution; the start timestamp inside the
    // log breaks ties between attempts created in the same second.
    let mut attempts: Vec<DeploymentAttempt> = Vec::with_capacity(files.len());
    for path in &files {
        attempts.push(File::new(path).read_json().await?);
    }
    attempts.sort_by_key(|a| a.started_at);

    let start = attempts.len().saturating_sub(limit);
    Ok(attempts.split_off(start))
}

enum MigrateVerdict {
    Applied,
    DryRunDone,
    Cancelled,
    Failed { message: String, reverted: bool },
}

/// Walk the FSM from Migrate to Succeeded without performing the stages;
/// the remaining stages have nothing to do in a dry run.
fn fsm_finish_dry_run(fsm: &mut PipelineFsm) -> Result<(), OrchestratorError> {
    while fsm.stage() != Stage::Succeeded {
        fsm.process(StageEvent::Passed)
            .map_err(OrchestratorError::Internal)?;
    }
    Ok(())
}
