//! Error types for the deployment orchestrator

use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connectivity error: {0}")]
    ConnectivityError(String),

    #[error("Backup error: {0}")]
    BackupError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Health check error: {0}")]
    HealthCheckError(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Rollback error: {0}")]
    RollbackError(String),

    #[error("Deployment already in progress: {0}")]
    LockHeld(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}
