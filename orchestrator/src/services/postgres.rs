//! PostgreSQL operations via the client tools
//!
//! Drives psql/pg_dump/pg_restore/createdb/dropdb as child processes.
//! Dumps use the custom format (`-Fc`), which is compressed and lets
//! `pg_restore --list` act as an archive readability check.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use url::Url;

use crate::config::settings::DatabaseSettings;
use crate::errors::OrchestratorError;
use crate::services::{Database, DbTarget};

const REVISIONS_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_revisions (\
     seq integer PRIMARY KEY, name text NOT NULL, applied_at timestamptz NOT NULL DEFAULT now())";

/// PostgreSQL-backed [`Database`] implementation
pub struct PostgresDatabase {
    live_url: Url,
    query_timeout: Duration,
    bulk_timeout: Duration,
}

impl PostgresDatabase {
    pub fn new(settings: &DatabaseSettings) -> Result<Self, OrchestratorError> {
        let live_url = Url::parse(&settings.url)
            .map_err(|e| OrchestratorError::ConfigError(format!("invalid database url: {}", e)))?;
        let query_timeout = Duration::from_secs(settings.command_timeout_secs);
        Ok(Self {
            live_url,
            query_timeout,
            // Dumps and restores of a full database run far longer than
            // single statements
            bulk_timeout: query_timeout * 30,
        })
    }

    /// Connection URL for a target database
    fn url_for(&self, target: &DbTarget) -> Url {
        match target {
            DbTarget::Live => self.live_url.clone(),
            DbTarget::Scratch(name) => {
                let mut url = self.live_url.clone();
                url.set_path(name);
                url
            }
        }
    }

    /// Maintenance URL (connects to the stock `postgres` database) for
    /// create/drop operations
    fn admin_url(&self) -> Url {
        let mut url = self.live_url.clone();
        url.set_path("postgres");
        url
    }

    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<String, OrchestratorError> {
        debug!("Running {} {:?}", program, args);
        let child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                OrchestratorError::ConnectivityError(format!("failed to spawn {}: {}", program, e))
            })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                OrchestratorError::ConnectivityError(format!(
                    "{} timed out after {:?}",
                    program, timeout
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::ConnectivityError(format!(
                "{} failed: {}",
                program,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn query(&self, target: &DbTarget, sql: &str) -> Result<String, OrchestratorError> {
        let url = self.url_for(target);
        self.run(
            "psql",
            &[url.as_str(), "-v", "ON_ERROR_STOP=1", "-tA", "-c", sql],
            self.query_timeout,
        )
        .await
    }

    async fn ensure_revisions_table(&self, target: &DbTarget) -> Result<(), OrchestratorError> {
        self.query(target, REVISIONS_TABLE_DDL).await?;
        Ok(())
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn ping(&self) -> Result<(), OrchestratorError> {
        self.query(&DbTarget::Live, "SELECT 1").await?;
        Ok(())
    }

    async fn dump(&self, dest: &Path) -> Result<(), OrchestratorError> {
        let dest = dest.to_string_lossy();
        self.run(
            "pg_dump",
            &[self.live_url.as_str(), "-Fc", "-f", &dest],
            self.bulk_timeout,
        )
        .await
        .map_err(|e| OrchestratorError::BackupError(e.to_string()))?;
        Ok(())
    }

    async fn verify_dump(&self, path: &Path) -> Result<(), OrchestratorError> {
        let path = path.to_string_lossy();
        let listing = self
            .run("pg_restore", &["--list", &path], self.query_timeout)
            .await
            .map_err(|e| OrchestratorError::BackupError(e.to_string()))?;
        if listing.trim().is_empty() {
            return Err(OrchestratorError::BackupError(format!(
                "dump {} lists no archive entries",
                path
            )));
        }
        Ok(())
    }

    async fn restore(&self, path: &Path) -> Result<(), OrchestratorError> {
        let path = path.to_string_lossy();
        self.run(
            "pg_restore",
            &[
                "--clean",
                "--if-exists",
                "--no-owner",
                "-d",
                self.live_url.as_str(),
                &path,
            ],
            self.bulk_timeout,
        )
        .await
        .map_err(|e| OrchestratorError::BackupError(e.to_string()))?;
        Ok(())
    }

    async fn create_scratch(&self, name: &str) -> Result<(), OrchestratorError> {
        let admin = self.admin_url();
        self.run(
            "psql",
            &[
                admin.as_str(),
                "-v",
                "ON_ERROR_STOP=1",
                "-c",
                &format!("CREATE DATABASE \"{}\"", name),
            ],
            self.query_timeout,
        )
        .await?;
        Ok(())
    }

    async fn drop_scratch(&self, name: &str) -> Result<(), OrchestratorError> {
        let admin = self.admin_url();
        self.run(
            "psql",
            &[
                admin.as_str(),
                "-v",
                "ON_ERROR_STOP=1",
                "-c",
                &format!("DROP DATABASE IF EXISTS \"{}\"", name),
            ],
            self.query_timeout,
        )
        .await?;
        Ok(())
    }

    async fn restore_into(&self, path: &Path, name: &str) -> Result<(), OrchestratorError> {
        let target = DbTarget::Scratch(name.to_string());
        let url = self.url_for(&target);
        let path = path.to_string_lossy();
        self.run(
            "pg_restore",
            &["--no-owner", "-d", url.as_str(), &path],
            self.bulk_timeout,
        )
        .await?;
        Ok(())
    }

    async fn apply_sql(&self, target: &DbTarget, sql: &str) -> Result<(), OrchestratorError> {
        self.query(target, sql)
            .await
            .map_err(|e| OrchestratorError::MigrationError(e.to_string()))?;
        Ok(())
    }

    async fn applied_revisions(&self, target: &DbTarget) -> Result<Vec<u32>, OrchestratorError> {
        self.ensure_revisions_table(target).await?;
        let out = self
            .query(target, "SELECT seq FROM schema_revisions ORDER BY seq")
            .await?;
        let mut revisions = Vec::new();
        for line in out.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let seq = line.parse::<u32>().map_err(|_| {
                OrchestratorError::MigrationError(format!("bad revision row: {}", line))
            })?;
            revisions.push(seq);
        }
        Ok(revisions)
    }

    async fn set_revision_applied(
        &self,
        target: &DbTarget,
        seq: u32,
        name: &str,
        applied: bool,
    ) -> Result<(), OrchestratorError> {
        self.ensure_revisions_table(target).await?;
        let sql = if applied {
            format!(
                "INSERT INTO schema_revisions (seq, name) VALUES ({}, '{}') \
                 ON CONFLICT (seq) DO NOTHING",
                seq,
                name.replace('\'', "''")
            )
        } else {
            format!("DELETE FROM schema_revisions WHERE seq = {}", seq)
        };
        self.query(target, &sql)
            .await
            .map_err(|e| OrchestratorError::MigrationError(e.to_string()))?;
        Ok(())
    }

    async fn spot_check(&self, target: &DbTarget) -> Result<(), OrchestratorError> {
        // Schema shape: the public schema must contain tables after a
        // migration run
        let tables = self
            .query(
                target,
                "SELECT count(*) FROM information_schema.tables WHERE table_schema = 'public'",
            )
            .await?;
        let count: u64 = tables.trim().parse().unwrap_or(0);
        if count == 0 {
            return Err(OrchestratorError::MigrationError(
                "spot check failed: no tables in public schema".to_string(),
            ));
        }

        // Referential integrity: no constraint may be left unvalidated
        let invalid = self
            .query(
                target,
                "SELECT conname FROM pg_constraint WHERE NOT convalidated",
            )
            .await?;
        if !invalid.trim().is_empty() {
            return Err(OrchestratorError::MigrationError(format!(
                "spot check failed: unvalidated constraints: {}",
                invalid.trim().replace('\n', ", ")
            )));
        }

        Ok(())
    }
}
