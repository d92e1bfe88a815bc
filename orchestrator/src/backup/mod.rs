//! Backup management
//!
//! A verified backup is the hard precondition for every mutating stage:
//! the pipeline refuses to migrate or switch traffic unless a readable,
//! checksummed snapshot exists first.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::BackupRecord;
use crate::services::Database;
use crate::utils::{generate_attempt_id, sha256_hash};

/// Backup manager
pub struct BackupManager {
    database: Arc<dyn Database>,
    backups_dir: Dir,
    index_file: File,
    keep: usize,
    retention_days: i64,
}

impl BackupManager {
    pub fn new(
        database: Arc<dyn Database>,
        backups_dir: Dir,
        index_file: File,
        keep: usize,
        retention_days: i64,
    ) -> Self {
        Self {
            database,
            backups_dir,
            index_file,
            keep,
            retention_days,
        }
    }

    /// Create a verified snapshot, record it, and prune old backups.
    ///
    /// The snapshot must be readable and its checksum recorded before this
    /// returns; any failure surfaces as [`OrchestratorError::BackupError`].
    pub async fn create(
        &self,
        attempt_id: Option<&str>,
    ) -> Result<BackupRecord, OrchestratorError> {
        self.backups_dir.create().await?;

        let id = generate_attempt_id(Utc::now());
        let path = self.backups_dir.path().join(format!("pazpaz-{}.dump", id));
        info!("Creating backup {} -> {}", id, path.display());

        self.database.dump(&path).await?;
        self.database.verify_dump(&path).await?;

        let file = File::new(&path);
        let contents = file.read_bytes().await?;
        let checksum = sha256_hash(&contents);
        let size = contents.len() as u64;

        let record = BackupRecord {
            id: id.clone(),
            path,
            created_at: Utc::now(),
            size,
            checksum,
            retention_expires_at: Utc::now() + Duration::days(self.retention_days),
            attempt_id: attempt_id.map(str::to_string),
        };

        let mut records = self.list().await?;
        records.push(record.clone());
        self.store_index(&records).await?;

        self.prune().await?;
        info!("Backup {} created and verified ({} bytes)", id, size);
        Ok(record)
    }

    /// Dump and verify a snapshot into `dir` without recording it in the
    /// index or touching the retention window. The caller owns the file.
    pub async fn snapshot_unindexed(&self, dir: &Dir) -> Result<BackupRecord, OrchestratorError> {
        dir.create().await?;

        let id = generate_attempt_id(Utc::now());
        let path = dir.path().join(format!("pazpaz-rehearsal-{}.dump", id));
        info!("Creating unindexed snapshot {} -> {}", id, path.display());

        self.database.dump(&path).await?;
        self.database.verify_dump(&path).await?;

        let file = File::new(&path);
        let contents = file.read_bytes().await?;
        let checksum = sha256_hash(&contents);
        let size = contents.len() as u64;

        Ok(BackupRecord {
            id,
            path,
            created_at: Utc::now(),
            size,
            checksum,
            retention_expires_at: Utc::now() + Duration::days(self.retention_days),
            attempt_id: None,
        })
    }

    /// All known backups, oldest first
    pub async fn list(&self) -> Result<Vec<BackupRecord>, OrchestratorError> {
        if !self.index_file.exists().await {
            return Ok(Vec::new());
        }
        let mut records: Vec<BackupRecord> = self.index_file.read_json().await?;
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    /// Look up a backup by id
    pub async fn find(&self, id: &str) -> Result<BackupRecord, OrchestratorError> {
        self.list()
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("backup {}", id)))
    }

    /// The most recent backup, if any
    pub async fn latest(&self) -> Result<Option<BackupRecord>, OrchestratorError> {
        Ok(self.list().await?.into_iter().last())
    }

    /// Restore the live database from a record, verifying the checksum
    /// first
    pub async fn restore(&self, record: &BackupRecord) -> Result<(), OrchestratorError> {
        let file = File::new(&record.path);
        if !file.exists().await {
            return Err(OrchestratorError::BackupError(format!(
                "snapshot file missing: {}",
                record.path.display()
            )));
        }

        let contents = file.read_bytes().await?;
        let checksum = sha256_hash(&contents);
        if checksum != record.checksum {
            return Err(OrchestratorError::BackupError(format!(
                "checksum mismatch for backup {}: snapshot is corrupt",
                record.id
            )));
        }

        info!("Restoring database from backup {}", record.id);
        self.database.restore(&record.path).await
    }

    /// Delete backups beyond the keep-last-N window, oldest first
    pub async fn prune(&self) -> Result<Vec<String>, OrchestratorError> {
        let records = self.list().await?;
        if records.len() <= self.keep {
            return Ok(Vec::new());
        }

        let excess = records.len() - self.keep;
        let to_delete = &records[..excess];

        let mut deleted = Vec::new();
        for record in to_delete {
            match File::new(&record.path).delete().await {
                Ok(()) => {
                    info!("Pruned backup {} ({})", record.id, record.path.display());
                    deleted.push(record.id.clone());
                }
                Err(e) => {
                    // Keep the index entry so a later prune retries the
                    // delete
                    warn!("Failed to prune backup {}: {}", record.id, e);
                }
            }
        }

        let remaining: Vec<BackupRecord> = records
            .iter()
            .filter(|r| !deleted.contains(&r.id))
            .cloned()
            .collect();
        self.store_index(&remaining).await?;
        Ok(deleted)
    }

    async fn store_index(&self, records: &[BackupRecord]) -> Result<(), OrchestratorError> {
        self.index_file.write_json_atomic(&records.to_vec()).await
    }
}
