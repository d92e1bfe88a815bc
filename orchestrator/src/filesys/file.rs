//! File operations

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::OrchestratorError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Get the file size in bytes
    pub async fn size(&self) -> Result<u64, OrchestratorError> {
        Ok(fs::metadata(&self.path).await?.len())
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, OrchestratorError> {
        let mut file = fs::File::open(&self.path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;
        Ok(contents)
    }

    /// Read file contents as bytes
    pub async fn read_bytes(&self) -> Result<Vec<u8>, OrchestratorError> {
        let mut file = fs::File::open(&self.path).await?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await?;
        Ok(contents)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, OrchestratorError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Write string to file
    pub async fn write_string(&self, contents: &str) -> Result<(), OrchestratorError> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&self.path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Write JSON to file
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), OrchestratorError> {
        let contents = serde_json::to_string_pretty(value)?;
        self.write_string(&contents).await
    }

    /// Atomic write using a temporary file.
    ///
    /// Readers observe either the old contents or the new contents, never a
    /// partial write. Used for the release-state file and proxy upstream
    /// configuration.
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), OrchestratorError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// Atomic JSON write
    pub async fn write_json_atomic<T: Serialize>(&self, value: &T) -> Result<(), OrchestratorError> {
        let contents = serde_json::to_string_pretty(value)?;
        self.write_atomic(contents.as_bytes()).await
    }

    /// Delete the file
    pub async fn delete(&self) -> Result<(), OrchestratorError> {
        if self.exists().await {
            fs::remove_file(&self.path).await?;
        }
        Ok(())
    }
}
