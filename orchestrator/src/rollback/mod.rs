//! Rollback coordination
//!
//! Restores the prior known-good state after a failed stage. Reverse
//! migrations are preferred over a full restore (faster, narrower blast
//! radius); the backup is the fallback of last resort. The whole
//! procedure is retried a bounded number of times and then escalates to a
//! terminal failure for human intervention, never a silent loop.

use tracing::{error, info, warn};

use crate::backup::BackupManager;
use crate::deploy::DeploymentController;
use crate::errors::OrchestratorError;
use crate::health::HealthMonitor;
use crate::migrate::MigrationRunner;
use crate::models::{BackupRecord, Color, DeploymentAttempt};

/// Everything the coordinator needs to know about the failed attempt
#[derive(Debug, Clone)]
pub struct RollbackContext {
    /// Why rollback was triggered
    pub reason: String,

    /// The new color whose instances must go
    pub target_color: Color,

    /// The old color that keeps serving; never touched beyond re-checking
    pub live_color: Color,

    /// Revisions applied to the live database during this attempt that
    /// are still in place
    pub migrations_applied: Vec<u32>,

    /// The migration runner already reversed the schema itself
    pub schema_reverted: bool,

    /// Backup taken at the start of this attempt
    pub backup: Option<BackupRecord>,

    /// Traffic was already switched to the target color
    pub traffic_switched: bool,

    /// Tag the live color was running before this attempt
    pub previous_tag: String,
}

/// Rollback coordinator
pub struct RollbackCoordinator<'a> {
    controller: &'a DeploymentController,
    migrations: Option<&'a MigrationRunner>,
    backups: &'a BackupManager,
    health: &'a HealthMonitor,
    retries: u32,
}

impl<'a> RollbackCoordinator<'a> {
    pub fn new(
        controller: &'a DeploymentController,
        migrations: Option<&'a MigrationRunner>,
        backups: &'a BackupManager,
        health: &'a HealthMonitor,
        retries: u32,
    ) -> Self {
        Self {
            controller,
            migrations,
            backups,
            health,
            retries,
        }
    }

    /// Run the rollback procedure, retrying up to the configured bound.
    /// The narrative of every step lands on the attempt for audit.
    pub async fn rollback(
        &self,
        ctx: &RollbackContext,
        attempt: &mut DeploymentAttempt,
    ) -> Result<(), OrchestratorError> {
        attempt.narrate(format!("rollback triggered: {}", ctx.reason));
        warn!("Rolling back deployment {}: {}", attempt.id, ctx.reason);

        let mut last_err: Option<OrchestratorError> = None;
        for round in 1..=self.retries.max(1) {
            match self.rollback_once(ctx, attempt).await {
                Ok(()) => {
                    attempt.narrate(format!("rollback completed on round {}", round));
                    info!("Rollback of attempt {} complete", attempt.id);
                    return Ok(());
                }
                Err(e) => {
                    attempt.narrate(format!("rollback round {} failed: {}", round, e));
                    error!("Rollback round {}/{} failed: {}", round, self.retries, e);
                    last_err = Some(e);
                }
            }
        }

        attempt.narrate("rollback retries exhausted; human intervention required");
        Err(OrchestratorError::RollbackError(format!(
            "rollback failed after {} round(s): {}",
            self.retries,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn rollback_once(
        &self,
        ctx: &RollbackContext,
        attempt: &mut DeploymentAttempt,
    ) -> Result<(), OrchestratorError> {
        // 1. If traffic already moved, point it back at the still-running
        //    old color before anything else.
        if ctx.traffic_switched {
            self.controller
                .switch_traffic(ctx.live_color, &ctx.previous_tag)
                .await?;
            attempt.narrate(format!("traffic switched back to {}", ctx.live_color));
        }

        // 2. Remove the failed new-color instances. The old color is
        //    never touched here.
        self.controller.teardown(ctx.target_color).await?;
        attempt.narrate(format!("removed {} instances", ctx.target_color));

        // 3. Schema rollback: reverse operations first, full restore only
        //    as fallback.
        if !ctx.schema_reverted && !ctx.migrations_applied.is_empty() {
            let reversed = match self.migrations {
                Some(runner) => match runner.reverse_revisions(&ctx.migrations_applied).await {
                    Ok(()) => {
                        attempt.narrate(format!(
                            "reversed migrations {:?}",
                            ctx.migrations_applied
                        ));
                        true
                    }
                    Err(e) => {
                        attempt.narrate(format!("reverse migration failed: {}", e));
                        warn!("Reverse migration failed, falling back to restore: {}", e);
                        false
                    }
                },
                None => false,
            };

            if !reversed {
                let backup = ctx.backup.as_ref().ok_or_else(|| {
                    OrchestratorError::RollbackError(
                        "schema needs restore but no backup exists for this attempt".to_string(),
                    )
                })?;
                self.backups.restore(backup).await?;
                attempt.narrate(format!("database restored from backup {}", backup.id));
            }
        }

        // 4. Re-verify the surviving state. A first deployment has no
        //    prior instances to verify.
        if self.controller.has_instances(ctx.live_color).await? {
            let targets = self.controller.health_targets(ctx.live_color);
            let round = self.health.wait_until_healthy(&targets).await;
            if !round.healthy {
                return Err(OrchestratorError::RollbackError(format!(
                    "{} instances unhealthy after rollback",
                    ctx.live_color
                )));
            }
            attempt.narrate(format!("verified {} healthy after rollback", ctx.live_color));
        } else {
            attempt.narrate("no prior instances to verify");
        }

        Ok(())
    }
}
