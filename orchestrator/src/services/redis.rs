//! Cache service operations via redis-cli

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::settings::CacheSettings;
use crate::errors::OrchestratorError;
use crate::services::CacheStore;

/// Redis-backed [`CacheStore`] implementation
pub struct RedisCache {
    url: String,
    timeout: Duration,
}

impl RedisCache {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            url: settings.url.clone(),
            timeout: Duration::from_secs(settings.command_timeout_secs),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, OrchestratorError> {
        debug!("Running redis-cli {:?}", args);
        let child = Command::new("redis-cli")
            .arg("-u")
            .arg(&self.url)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                OrchestratorError::ConnectivityError(format!("failed to spawn redis-cli: {}", e))
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                OrchestratorError::ConnectivityError(format!(
                    "redis-cli timed out after {:?}",
                    self.timeout
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::ConnectivityError(format!(
                "redis-cli failed: {}",
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn ping(&self) -> Result<(), OrchestratorError> {
        let reply = self.run(&["PING"]).await?;
        if reply != "PONG" {
            return Err(OrchestratorError::ConnectivityError(format!(
                "unexpected PING reply: {}",
                reply
            )));
        }
        Ok(())
    }

    async fn round_trip(&self, key: &str, value: &str) -> Result<(), OrchestratorError> {
        self.run(&["SET", key, value, "EX", "60"]).await?;
        let read_back = self.run(&["GET", key]).await?;
        if read_back != value {
            return Err(OrchestratorError::ConnectivityError(format!(
                "cache round trip mismatch: wrote {:?}, read {:?}",
                value, read_back
            )));
        }
        let _ = self.run(&["DEL", key]).await;
        Ok(())
    }
}
