//! Command-line interface definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "pazdeploy",
    version,
    about = "Blue/green deployment orchestrator for the PazPaz application"
)]
pub struct Cli {
    /// Path to the settings file
    #[arg(long, global = true, default_value = "/etc/pazdeploy/settings.json")]
    pub config: PathBuf,

    /// Override the persistent state directory
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy a release to the standby color and switch traffic to it
    Deploy {
        /// Image tag to deploy
        #[arg(long)]
        tag: String,

        /// Run preflight, backup, and migration rehearsal without
        /// touching the live system
        #[arg(long)]
        dry_run: bool,

        /// Skip the pre-migration backup. Refused when migrations are
        /// pending, since rehearsal needs a snapshot.
        #[arg(long)]
        skip_backup: bool,

        /// Skip the readiness gate on the new instances
        #[arg(long)]
        skip_health_checks: bool,

        /// Override overridable preflight violations and stale locks
        #[arg(long)]
        force: bool,

        /// Deadline in seconds for applying migrations to the live
        /// database
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Roll back the most recent deployment
    Rollback {
        /// Remove a stale deployment lock before rolling back
        #[arg(long)]
        force: bool,
    },

    /// Manage database schema revisions
    Migrate {
        #[command(subcommand)]
        command: MigrateCommand,
    },

    /// Manage database snapshots
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },

    /// Show the live color, lock state, and recent attempts
    Status,
}

#[derive(Subcommand)]
pub enum MigrateCommand {
    /// Apply pending revisions, optionally up to a target
    Upgrade {
        /// Highest revision to apply
        #[arg(long)]
        to: Option<u32>,
    },

    /// Reverse applied revisions down to a target (exclusive); without a
    /// target, steps back one revision
    Downgrade {
        /// Revision to keep as the new head
        #[arg(long)]
        to: Option<u32>,
    },

    /// Print the highest revision applied to the live database
    Current,

    /// List the revision chain with applied markers
    History,

    /// Check the on-disk chain for gaps, duplicates, and missing
    /// reverse operations
    Validate,
}

#[derive(Subcommand)]
pub enum BackupCommand {
    /// Take and verify a snapshot now
    Create,

    /// List known snapshots
    List,

    /// Delete snapshots beyond the keep-last-N window
    Prune,
}
