//! Data models

pub mod attempt;
pub mod backup;
pub mod health;

pub use attempt::{AttemptStatus, Color, DeploymentAttempt, StageResult};
pub use backup::BackupRecord;
pub use health::{CheckKind, HealthCheckResult};
