//! Health check models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of health sub-check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Process,
    Http,
    Database,
    Cache,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Process => "process",
            CheckKind::Http => "http",
            CheckKind::Database => "database",
            CheckKind::Cache => "cache",
        }
    }
}

/// Result of one health sub-check against one target.
///
/// Ephemeral: recorded in the attempt log, never persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Target name (instance or service)
    pub target: String,

    /// Which sub-check ran
    pub kind: CheckKind,

    /// When the check completed
    pub checked_at: DateTime<Utc>,

    /// Pass/fail
    pub passed: bool,

    /// Observed latency in milliseconds
    pub latency_ms: u64,

    /// Failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
