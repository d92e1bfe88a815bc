//! Finite state machine for the deployment pipeline
//!
//! Each stage's postcondition is the next stage's precondition, so the
//! pipeline is a linear chain with one compensation branch: any failure
//! past the backup stage routes through RollingBack. Failures before any
//! mutation (preflight, backup) terminate directly, since there is
//! nothing to compensate.

use serde::{Deserialize, Serialize};

use crate::models::AttemptStatus;

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Validating environment, connectivity, and resources
    Preflight,

    /// Taking and verifying the database snapshot
    Backup,

    /// Rehearsing and applying the migration chain
    Migrate,

    /// Launching new-color instances
    Launch,

    /// Waiting for new instances to become healthy
    HealthCheck,

    /// Atomically repointing traffic
    Switch,

    /// Letting old instances finish in-flight requests
    Drain,

    /// Removing old-color instances
    Cleanup,

    /// Compensating a failed stage
    RollingBack,

    /// Terminal: deployment complete
    Succeeded,

    /// Terminal: failure compensated, prior state restored
    RolledBack,

    /// Terminal: unrecoverable, human intervention required
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preflight => "preflight",
            Stage::Backup => "backup",
            Stage::Migrate => "migrate",
            Stage::Launch => "launch",
            Stage::HealthCheck => "health_check",
            Stage::Switch => "switch",
            Stage::Drain => "drain",
            Stage::Cleanup => "cleanup",
            Stage::RollingBack => "rolling_back",
            Stage::Succeeded => "succeeded",
            Stage::RolledBack => "rolled_back",
            Stage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline event
#[derive(Debug, Clone)]
pub enum StageEvent {
    /// Current stage completed
    Passed,

    /// Current stage failed
    Failed(String),

    /// Operator abort at a suspension point
    Cancelled,

    /// Compensation restored the prior state
    RollbackSucceeded,

    /// Compensation itself failed
    RollbackFailed(String),
}

/// Pipeline FSM
#[derive(Debug, Clone)]
pub struct PipelineFsm {
    stage: Stage,
    error: Option<String>,
}

impl PipelineFsm {
    /// Create a new FSM at the preflight stage
    pub fn new() -> Self {
        Self {
            stage: Stage::Preflight,
            error: None,
        }
    }

    /// Get current stage
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether the pipeline reached a terminal stage
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.stage,
            Stage::Succeeded | Stage::RolledBack | Stage::Failed
        )
    }

    /// Attempt status corresponding to a terminal stage
    pub fn attempt_status(&self) -> AttemptStatus {
        match self.stage {
            Stage::Succeeded => AttemptStatus::Succeeded,
            Stage::RolledBack => AttemptStatus::RolledBack,
            Stage::Failed => AttemptStatus::Failed,
            _ => AttemptStatus::Pending,
        }
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: StageEvent) -> Result<(), String> {
        let next = match (&self.stage, &event) {
            // Linear happy path
            (Stage::Preflight, StageEvent::Passed) => Stage::Backup,
            (Stage::Backup, StageEvent::Passed) => Stage::Migrate,
            (Stage::Migrate, StageEvent::Passed) => Stage::Launch,
            (Stage::Launch, StageEvent::Passed) => Stage::HealthCheck,
            (Stage::HealthCheck, StageEvent::Passed) => Stage::Switch,
            (Stage::Switch, StageEvent::Passed) => Stage::Drain,
            (Stage::Drain, StageEvent::Passed) => Stage::Cleanup,
            (Stage::Cleanup, StageEvent::Passed) => Stage::Succeeded,

            // Nothing mutated yet: fail or cancel terminates directly
            (Stage::Preflight | Stage::Backup, StageEvent::Failed(err)) => {
                self.error = Some(err.clone());
                Stage::Failed
            }
            (Stage::Preflight | Stage::Backup, StageEvent::Cancelled) => {
                self.error = Some("cancelled by operator".to_string());
                Stage::Failed
            }

            // Mutations exist: compensate
            (
                Stage::Migrate
                | Stage::Launch
                | Stage::HealthCheck
                | Stage::Switch
                | Stage::Drain
                | Stage::Cleanup,
                StageEvent::Failed(err),
            ) => {
                self.error = Some(err.clone());
                Stage::RollingBack
            }
            (
                Stage::Migrate
                | Stage::Launch
                | Stage::HealthCheck
                | Stage::Switch
                | Stage::Drain
                | Stage::Cleanup,
                StageEvent::Cancelled,
            ) => {
                self.error = Some("cancelled by operator".to_string());
                Stage::RollingBack
            }

            // Compensation outcome
            (Stage::RollingBack, StageEvent::RollbackSucceeded) => Stage::RolledBack,
            (Stage::RollingBack, StageEvent::RollbackFailed(err)) => {
                self.error = Some(err.clone());
                Stage::Failed
            }

            (stage, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", stage, event));
            }
        };

        self.stage = next;
        Ok(())
    }
}

impl Default for PipelineFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fsm_happy_path() {
        let mut fsm = PipelineFsm::new();
        for _ in 0..8 {
            fsm.process(StageEvent::Passed).unwrap();
        }
        assert_eq!(fsm.stage(), Stage::Succeeded);
        assert!(fsm.is_terminal());
        assert_eq!(fsm.attempt_status(), AttemptStatus::Succeeded);
    }

    #[test]
    fn test_fsm_preflight_failure_skips_rollback() {
        let mut fsm = PipelineFsm::new();
        fsm.process(StageEvent::Failed("disk".to_string())).unwrap();
        assert_eq!(fsm.stage(), Stage::Failed);
        assert_eq!(fsm.error(), Some("disk"));
    }

    #[test]
    fn test_fsm_health_failure_rolls_back() {
        let mut fsm = PipelineFsm::new();
        for _ in 0..4 {
            fsm.process(StageEvent::Passed).unwrap();
        }
        assert_eq!(fsm.stage(), Stage::HealthCheck);

        fsm.process(StageEvent::Failed("unhealthy".to_string())).unwrap();
        assert_eq!(fsm.stage(), Stage::RollingBack);

        fsm.process(StageEvent::RollbackSucceeded).unwrap();
        assert_eq!(fsm.stage(), Stage::RolledBack);
        assert_eq!(fsm.attempt_status(), AttemptStatus::RolledBack);
    }

    #[test]
    fn test_fsm_rejects_invalid_transition() {
        let mut fsm = PipelineFsm::new();
        assert!(fsm.process(StageEvent::RollbackSucceeded).is_err());
        assert_eq!(fsm.stage(), Stage::Preflight);
    }
}
