//! Migration runner
//!
//! Never touches the live database before the pending chain has been
//! applied and validated on a disposable copy of the pre-migration backup.
//! Live application runs under a deadline; a mid-chain failure triggers
//! reverse operations in strict reverse order, and only if reversal itself
//! fails does the caller fall back to a full backup restore.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::errors::OrchestratorError;
use crate::migrate::chain::{MigrationChain, Revision};
use crate::models::BackupRecord;
use crate::services::{Database, DbTarget};

/// Per-chain migration state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainState {
    /// Pending revisions exist, nothing rehearsed yet
    NotApplied,

    /// Chain applied and validated on the disposable copy
    TestApplied,

    /// Rehearsal failed; live target untouched
    TestFailed,

    /// Chain applied to the live target
    Applied,

    /// Run abandoned after a rehearsal failure
    Aborted,
}

/// Chain state machine event
#[derive(Debug, Clone)]
pub enum ChainEvent {
    RehearsalPassed,
    RehearsalFailed(String),
    LiveApplied,
    Abort,
}

impl ChainState {
    /// Process an event and transition state
    pub fn process(&mut self, event: ChainEvent) -> Result<(), String> {
        let next = match (&*self, &event) {
            (ChainState::NotApplied, ChainEvent::RehearsalPassed) => ChainState::TestApplied,
            (ChainState::NotApplied, ChainEvent::RehearsalFailed(_)) => ChainState::TestFailed,
            (ChainState::TestApplied, ChainEvent::LiveApplied) => ChainState::Applied,
            (ChainState::TestApplied, ChainEvent::Abort) => ChainState::Aborted,
            (ChainState::TestFailed, ChainEvent::Abort) => ChainState::Aborted,
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };
        *self = next;
        Ok(())
    }
}

/// Failure applying the chain to the live target
#[derive(Debug)]
pub struct LiveApplyError {
    /// What went wrong
    pub message: String,

    /// True when reverse operations brought the live schema back to its
    /// pre-run state; false means the caller must restore from backup.
    pub schema_reverted: bool,

    /// Revisions from this run still applied to the live database. Empty
    /// when the schema was reverted; the rollback path needs the survivors
    /// to know a restore is due.
    pub applied: Vec<u32>,
}

impl std::fmt::Display for LiveApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Migration runner
pub struct MigrationRunner {
    database: Arc<dyn Database>,
    chain: MigrationChain,
    scratch_name: String,
    live_timeout: Duration,
}

impl MigrationRunner {
    pub fn new(
        database: Arc<dyn Database>,
        chain: MigrationChain,
        scratch_name: String,
        live_timeout: Duration,
    ) -> Self {
        Self {
            database,
            chain,
            scratch_name,
            live_timeout,
        }
    }

    /// The chain being managed
    pub fn chain(&self) -> &MigrationChain {
        &self.chain
    }

    /// Highest revision applied to the live database
    pub async fn current(&self) -> Result<Option<u32>, OrchestratorError> {
        let applied = self.database.applied_revisions(&DbTarget::Live).await?;
        Ok(applied.into_iter().max())
    }

    /// Pending revision sequence numbers on the live database
    pub async fn pending_live(&self) -> Result<Vec<u32>, OrchestratorError> {
        let applied = self.database.applied_revisions(&DbTarget::Live).await?;
        let pending = self.chain.pending(&applied, None)?;
        Ok(pending.iter().map(|r| r.seq).collect())
    }

    /// Apply the pending chain to a disposable copy restored from `backup`
    /// and validate the result. The scratch database is dropped on every
    /// exit path.
    pub async fn rehearse(
        &self,
        backup: &BackupRecord,
        state: &mut ChainState,
    ) -> Result<Vec<u32>, OrchestratorError> {
        info!("Rehearsing migration chain on scratch copy {}", self.scratch_name);

        // A leftover scratch from an aborted run must not poison this one
        self.database.drop_scratch(&self.scratch_name).await?;
        self.database.create_scratch(&self.scratch_name).await?;

        let result = self.rehearse_inner(backup).await;

        if let Err(e) = self.database.drop_scratch(&self.scratch_name).await {
            warn!("Failed to drop scratch database {}: {}", self.scratch_name, e);
        }

        match result {
            Ok(applied) => {
                state
                    .process(ChainEvent::RehearsalPassed)
                    .map_err(OrchestratorError::MigrationError)?;
                info!("Rehearsal passed: {:?}", applied);
                Ok(applied)
            }
            Err(e) => {
                state
                    .process(ChainEvent::RehearsalFailed(e.to_string()))
                    .map_err(OrchestratorError::MigrationError)?;
                Err(e)
            }
        }
    }

    async fn rehearse_inner(
        &self,
        backup: &BackupRecord,
    ) -> Result<Vec<u32>, OrchestratorError> {
        let scratch = DbTarget::Scratch(self.scratch_name.clone());

        self.database
            .restore_into(&backup.path, &self.scratch_name)
            .await?;

        let applied = self.database.applied_revisions(&scratch).await?;
        let pending = self.chain.pending(&applied, None)?;

        let mut sequenced = Vec::new();
        for revision in pending {
            self.apply_one(&scratch, revision).await?;
            sequenced.push(revision.seq);
        }

        self.database.spot_check(&scratch).await?;
        Ok(sequenced)
    }

    /// Apply the pending chain to the live database under the configured
    /// deadline. Requires a passed rehearsal (`ChainState::TestApplied`).
    pub async fn apply_live(&self, state: &mut ChainState) -> Result<Vec<u32>, LiveApplyError> {
        if *state != ChainState::TestApplied {
            return Err(LiveApplyError {
                message: format!("cannot apply live from state {:?}", state),
                schema_reverted: true,
                applied: Vec::new(),
            });
        }

        let applied = self
            .database
            .applied_revisions(&DbTarget::Live)
            .await
            .map_err(|e| LiveApplyError {
                message: e.to_string(),
                schema_reverted: true,
                applied: Vec::new(),
            })?;
        let pending: Vec<Revision> = match self.chain.pending(&applied, None) {
            Ok(pending) => pending.into_iter().cloned().collect(),
            Err(e) => {
                return Err(LiveApplyError {
                    message: e.to_string(),
                    schema_reverted: true,
                    applied: Vec::new(),
                })
            }
        };

        if pending.is_empty() {
            state
                .process(ChainEvent::LiveApplied)
                .map_err(|e| LiveApplyError {
                    message: e,
                    schema_reverted: true,
                    applied: Vec::new(),
                })?;
            return Ok(Vec::new());
        }

        info!(
            "Applying {} pending revision(s) to live database (timeout {:?})",
            pending.len(),
            self.live_timeout
        );

        let deadline = Instant::now() + self.live_timeout;
        let mut applied_this_run: Vec<u32> = Vec::new();

        for revision in &pending {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                error!("Migration deadline exceeded at revision {:04}", revision.seq);
                return self
                    .reverse_after_failure(
                        &applied_this_run,
                        format!("deadline exceeded before revision {:04}", revision.seq),
                    )
                    .await;
            }

            let apply = self.apply_one(&DbTarget::Live, revision);
            match tokio::time::timeout(remaining, apply).await {
                Ok(Ok(())) => applied_this_run.push(revision.seq),
                Ok(Err(e)) => {
                    error!("Revision {:04} failed on live: {}", revision.seq, e);
                    return self
                        .reverse_after_failure(
                            &applied_this_run,
                            format!("revision {:04} failed: {}", revision.seq, e),
                        )
                        .await;
                }
                Err(_) => {
                    error!("Revision {:04} timed out on live", revision.seq);
                    return self
                        .reverse_after_failure(
                            &applied_this_run,
                            format!("revision {:04} timed out", revision.seq),
                        )
                        .await;
                }
            }
        }

        state
            .process(ChainEvent::LiveApplied)
            .map_err(|e| LiveApplyError {
                message: e,
                schema_reverted: false,
                applied: applied_this_run.clone(),
            })?;
        info!("Live migration complete: {:?}", applied_this_run);
        Ok(applied_this_run)
    }

    /// Reverse the revisions applied so far in this run, newest first
    async fn reverse_after_failure(
        &self,
        applied_this_run: &[u32],
        cause: String,
    ) -> Result<Vec<u32>, LiveApplyError> {
        if applied_this_run.is_empty() {
            return Err(LiveApplyError {
                message: cause,
                schema_reverted: true,
                applied: Vec::new(),
            });
        }

        warn!(
            "Reversing {} revision(s) after live failure",
            applied_this_run.len()
        );
        let mut still_applied = applied_this_run.to_vec();
        for seq in applied_this_run.iter().rev() {
            let revision = match self.chain.find(*seq) {
                Some(revision) => revision,
                None => {
                    return Err(LiveApplyError {
                        message: format!("{}; reverse failed: revision {:04} unknown", cause, seq),
                        schema_reverted: false,
                        applied: still_applied,
                    })
                }
            };
            if let Err(e) = self.reverse_one(&DbTarget::Live, revision).await {
                error!("Reverse of revision {:04} failed: {}", seq, e);
                return Err(LiveApplyError {
                    message: format!("{}; reverse of {:04} failed: {}", cause, seq, e),
                    schema_reverted: false,
                    applied: still_applied,
                });
            }
            still_applied.retain(|s| s != seq);
        }

        Err(LiveApplyError {
            message: format!("{}; schema reverted via reverse operations", cause),
            schema_reverted: true,
            applied: Vec::new(),
        })
    }

    /// Operator path: apply pending revisions up to `target` directly to
    /// the live database, without rehearsal
    pub async fn upgrade(&self, target: Option<u32>) -> Result<Vec<u32>, OrchestratorError> {
        let applied = self.database.applied_revisions(&DbTarget::Live).await?;
        let pending: Vec<Revision> = self
            .chain
            .pending(&applied, target)?
            .into_iter()
            .cloned()
            .collect();

        let mut sequenced = Vec::new();
        for revision in &pending {
            self.apply_one(&DbTarget::Live, revision).await?;
            sequenced.push(revision.seq);
        }
        Ok(sequenced)
    }

    /// Operator path: reverse applied revisions down to the `target` floor
    /// (exclusive). Without a target, reverses only the newest revision.
    pub async fn downgrade(&self, target: Option<u32>) -> Result<Vec<u32>, OrchestratorError> {
        let applied = self.database.applied_revisions(&DbTarget::Live).await?;
        let floor = match target {
            Some(floor) => Some(floor),
            None => {
                // Default: step back one revision
                let mut sorted = applied.clone();
                sorted.sort_unstable();
                match sorted.len() {
                    0 => return Ok(Vec::new()),
                    1 => None,
                    n => Some(sorted[n - 2]),
                }
            }
        };

        let plan: Vec<Revision> = self
            .chain
            .reversal(&applied, floor)?
            .into_iter()
            .cloned()
            .collect();

        let mut reversed = Vec::new();
        for revision in &plan {
            self.reverse_one(&DbTarget::Live, revision).await?;
            reversed.push(revision.seq);
        }
        Ok(reversed)
    }

    /// Reverse every revision in `seqs` on the live target, newest first.
    /// Used by the rollback coordinator.
    pub async fn reverse_revisions(&self, seqs: &[u32]) -> Result<(), OrchestratorError> {
        let mut sorted = seqs.to_vec();
        sorted.sort_unstable();
        for seq in sorted.iter().rev() {
            let revision = self.chain.find(*seq).ok_or_else(|| {
                OrchestratorError::MigrationError(format!("revision {:04} not in chain", seq))
            })?;
            self.reverse_one(&DbTarget::Live, revision).await?;
        }
        Ok(())
    }

    async fn apply_one(
        &self,
        target: &DbTarget,
        revision: &Revision,
    ) -> Result<(), OrchestratorError> {
        info!("Applying revision {:04}_{}", revision.seq, revision.name);
        self.database.apply_sql(target, &revision.up_sql).await?;
        self.database
            .set_revision_applied(target, revision.seq, &revision.name, true)
            .await
    }

    async fn reverse_one(
        &self,
        target: &DbTarget,
        revision: &Revision,
    ) -> Result<(), OrchestratorError> {
        info!("Reversing revision {:04}_{}", revision.seq, revision.name);
        self.database.apply_sql(target, &revision.down_sql).await?;
        self.database
            .set_revision_applied(target, revision.seq, &revision.name, false)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_state_happy_path() {
        let mut state = ChainState::NotApplied;
        state.process(ChainEvent::RehearsalPassed).unwrap();
        assert_eq!(state, ChainState::TestApplied);
        state.process(ChainEvent::LiveApplied).unwrap();
        assert_eq!(state, ChainState::Applied);
    }

    #[test]
    fn test_chain_state_failure_path() {
        let mut state = ChainState::NotApplied;
        state
            .process(ChainEvent::RehearsalFailed("boom".to_string()))
            .unwrap();
        assert_eq!(state, ChainState::TestFailed);
        state.process(ChainEvent::Abort).unwrap();
        assert_eq!(state, ChainState::Aborted);
    }

    #[test]
    fn test_chain_state_rejects_live_before_rehearsal() {
        let mut state = ChainState::NotApplied;
        assert!(state.process(ChainEvent::LiveApplied).is_err());
        assert_eq!(state, ChainState::NotApplied);
    }
}
