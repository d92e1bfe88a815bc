//! Deployment attempt models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Blue/green color label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Blue,
    Green,
}

impl Color {
    /// The other color
    pub fn opposite(&self) -> Color {
        match self {
            Color::Blue => Color::Green,
            Color::Green => Color::Blue,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Blue => "blue",
            Color::Green => "green",
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of a deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Succeeded,
    RolledBack,
    Failed,
}

/// Outcome of a single pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name as reported to operators
    pub stage: String,

    /// Whether the stage completed
    pub passed: bool,

    /// When the stage finished
    pub finished_at: DateTime<Utc>,

    /// Error message on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One end-to-end deployment attempt.
///
/// Created at invocation, mutated as stages complete, immutable once a
/// terminal status is set. Persisted as one JSON file per attempt in the
/// logs directory for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentAttempt {
    /// Time-based unique identifier
    pub id: String,

    /// Target environment this attempt ran against
    pub environment: String,

    /// Image tag being deployed
    pub tag: String,

    /// Color the new instances were launched under
    pub target_color: Color,

    /// Start timestamp
    pub started_at: DateTime<Utc>,

    /// End timestamp, set with the terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Current status
    pub status: AttemptStatus,

    /// Per-stage outcomes in execution order
    pub stages: Vec<StageResult>,

    /// Tag the previous release was running, for switch-back
    #[serde(default)]
    pub previous_tag: String,

    /// Backup taken for this attempt, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,

    /// Revisions applied to the live database during this attempt
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub migrations_applied: Vec<u32>,

    /// Health sub-check results gathered while the attempt ran
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub health_results: Vec<super::HealthCheckResult>,

    /// Rollback narrative: trigger reason, steps taken, final verified state
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub rollback_narrative: Vec<String>,
}

impl DeploymentAttempt {
    /// Create a pending attempt
    pub fn new(id: String, environment: String, tag: String, target_color: Color) -> Self {
        Self {
            id,
            environment,
            tag,
            target_color,
            started_at: Utc::now(),
            finished_at: None,
            status: AttemptStatus::Pending,
            stages: Vec::new(),
            previous_tag: String::new(),
            backup_id: None,
            migrations_applied: Vec::new(),
            health_results: Vec::new(),
            rollback_narrative: Vec::new(),
        }
    }

    /// Record a stage outcome
    pub fn record_stage(&mut self, stage: &str, passed: bool, error: Option<String>) {
        self.stages.push(StageResult {
            stage: stage.to_string(),
            passed,
            finished_at: Utc::now(),
            error,
        });
    }

    /// Append a line to the rollback narrative
    pub fn narrate(&mut self, line: impl Into<String>) {
        self.rollback_narrative.push(line.into());
    }

    /// Set the terminal status. Returns an error if already terminal.
    pub fn finish(&mut self, status: AttemptStatus) -> Result<(), String> {
        if self.is_terminal() {
            return Err(format!(
                "attempt {} already terminal with status {:?}",
                self.id, self.status
            ));
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Whether the attempt has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status != AttemptStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_opposite() {
        assert_eq!(Color::Blue.opposite(), Color::Green);
        assert_eq!(Color::Green.opposite(), Color::Blue);
    }

    #[test]
    fn test_attempt_terminal_is_immutable() {
        let mut attempt = DeploymentAttempt::new(
            "20250101T000000Z-abcd1234".to_string(),
            "production".to_string(),
            "v1.2.3".to_string(),
            Color::Green,
        );
        assert!(!attempt.is_terminal());

        attempt.finish(AttemptStatus::Succeeded).unwrap();
        assert!(attempt.is_terminal());
        assert!(attempt.finish(AttemptStatus::Failed).is_err());
        assert_eq!(attempt.status, AttemptStatus::Succeeded);
    }
}
