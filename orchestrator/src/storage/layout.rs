//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the orchestrator
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all persistent state
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Directory holding timestamped database snapshots
    pub fn backups_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("backups"))
    }

    /// Directory holding one JSON log per deployment attempt
    pub fn attempts_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Directory for per-run tracing output
    pub fn run_logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs").join("runs"))
    }

    /// The release-state file recording which color is live
    pub fn release_state_file(&self) -> File {
        File::new(self.base_dir.join("release.json"))
    }

    /// The deployment-in-progress lock file for an environment
    pub fn lock_file(&self, environment: &str) -> File {
        File::new(self.base_dir.join(format!("deploy-{}.lock", environment)))
    }

    /// Backup index file mapping record ids to metadata
    pub fn backup_index_file(&self) -> File {
        File::new(self.base_dir.join("backups").join("index.json"))
    }

    /// Scratch directory for short-lived files such as dry-run snapshots
    pub fn scratch_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("tmp"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::OrchestratorError> {
        self.backups_dir().create().await?;
        self.attempts_dir().create().await?;
        self.run_logs_dir().create().await?;
        self.scratch_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/pazdeploy");

        #[cfg(not(target_os = "linux"))]
        let base_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pazdeploy");

        Self::new(base_dir)
    }
}

// Minimal home-dir lookup for non-Linux platforms
#[cfg(not(target_os = "linux"))]
mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}
