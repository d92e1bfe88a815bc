//! Backup record model

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for one database snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Unique identifier, shared with the snapshot filename
    pub id: String,

    /// Snapshot location on disk
    pub path: PathBuf,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Snapshot size in bytes
    pub size: u64,

    /// SHA256 of the snapshot contents, checked before any restore
    pub checksum: String,

    /// End of the retention window
    pub retention_expires_at: DateTime<Utc>,

    /// Deployment attempt this backup was taken for, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<String>,
}
