//! Deployment serialization lock
//!
//! One deployment per environment at a time. The lock is a file created
//! with `create_new` so two concurrent invocations cannot both win; the
//! loser is rejected immediately rather than queued.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::OrchestratorError;
use crate::filesys::file::File;

/// Metadata recorded inside the lock file for diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockHolder {
    /// Attempt that holds the lock
    pub attempt_id: String,

    /// Process id of the holder
    pub pid: u32,

    /// When the lock was taken
    pub acquired_at: DateTime<Utc>,
}

/// A held deployment lock. Released on [`DeployLock::release`].
#[derive(Debug)]
pub struct DeployLock {
    file: File,
    holder: LockHolder,
}

impl DeployLock {
    /// Try to acquire the lock for an environment.
    ///
    /// A lock older than `stale_after_secs` is reported as stale in the
    /// error message but never removed automatically; `force` removes a
    /// stale lock before retrying the acquisition. A fresh lock is never
    /// removed, forced or not, since its holder may still be deploying.
    pub async fn acquire(
        file: File,
        attempt_id: &str,
        stale_after_secs: u64,
        force: bool,
    ) -> Result<Self, OrchestratorError> {
        if file.exists().await {
            let holder: LockHolder = file.read_json().await?;
            let age = Utc::now() - holder.acquired_at;
            let stale = age.num_seconds() >= stale_after_secs as i64;

            if force && stale {
                warn!(
                    "Removing stale deployment lock held by attempt {} (pid {}) due to --force",
                    holder.attempt_id, holder.pid
                );
                file.delete().await?;
            } else if force {
                return Err(OrchestratorError::LockHeld(format!(
                    "attempt {} (pid {}) started at {} and is not stale; \
                     --force only removes stale locks",
                    holder.attempt_id, holder.pid, holder.acquired_at
                )));
            } else if stale {
                return Err(OrchestratorError::LockHeld(format!(
                    "lock held by attempt {} (pid {}) since {} looks stale; \
                     verify the process is gone, then re-run with --force",
                    holder.attempt_id, holder.pid, holder.acquired_at
                )));
            } else {
                return Err(OrchestratorError::LockHeld(format!(
                    "attempt {} (pid {}) started at {}",
                    holder.attempt_id, holder.pid, holder.acquired_at
                )));
            }
        }

        let holder = LockHolder {
            attempt_id: attempt_id.to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };

        // create_new is the atomicity point: exactly one concurrent caller
        // can create the file.
        if let Some(parent) = file.path().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(&holder)?;
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        match options.open(file.path()).await {
            Ok(mut f) => {
                use tokio::io::AsyncWriteExt;
                f.write_all(contents.as_bytes()).await?;
                f.sync_all().await?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // Lost the race to another invocation
                return Err(OrchestratorError::LockHeld(
                    "another deployment acquired the lock first".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        info!("Acquired deployment lock for attempt {}", attempt_id);
        Ok(Self { file, holder })
    }

    /// The holder metadata
    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    /// Release the lock
    pub async fn release(self) -> Result<(), OrchestratorError> {
        self.file.delete().await?;
        info!("Released deployment lock for attempt {}", self.holder.attempt_id);
        Ok(())
    }

    /// Describe the current lock holder for an environment, if any
    pub async fn current_holder(file: &File) -> Result<Option<LockHolder>, OrchestratorError> {
        if !file.exists().await {
            return Ok(None);
        }
        let holder = file.read_json().await?;
        Ok(Some(holder))
    }
}
