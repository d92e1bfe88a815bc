//! PazDeploy - Entry Point
//!
//! Blue/green deployment orchestrator for the PazPaz application stack.
//! Wraps the pipeline, migration, and backup machinery in an operator CLI.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use pazdeploy::cli::{BackupCommand, Cli, Command, MigrateCommand};
use pazdeploy::config::settings::Settings;
use pazdeploy::errors::OrchestratorError;
use pazdeploy::filesys::dir::Dir;
use pazdeploy::lock::DeployLock;
use pazdeploy::logs::{init_logging, LogOptions};
use pazdeploy::migrate::chain::MigrationChain;
use pazdeploy::models::AttemptStatus;
use pazdeploy::pipeline::{recent_attempts, DeployOptions, PipelineOutcome, PipelineRunner};
use pazdeploy::services::docker::{DockerRegistry, DockerRuntime};
use pazdeploy::services::http::ReqwestProbe;
use pazdeploy::services::nginx::NginxProxy;
use pazdeploy::services::postgres::PostgresDatabase;
use pazdeploy::services::redis::RedisCache;
use pazdeploy::services::Services;
use pazdeploy::storage::layout::StorageLayout;
use pazdeploy::storage::release::ReleaseState;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load(&cli.config).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    let layout = cli
        .state_dir
        .clone()
        .map(StorageLayout::new)
        .unwrap_or_default();
    if let Err(e) = layout.setup().await {
        eprintln!("{} cannot prepare state directory: {}", "error:".red().bold(), e);
        std::process::exit(1);
    }

    // File logging goes under the state directory; the guard must outlive
    // all work or trailing lines are dropped.
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: Some(layout.run_logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        await_shutdown_signal().await;
        warn!("Shutdown requested; cancelling at the next safe point");
        let _ = cancel_tx.send(true);
    });

    let code = match run(cli.command, settings, layout, cancel_rx).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("{} {}", "error:".red().bold(), e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(
    command: Command,
    settings: Settings,
    layout: StorageLayout,
    cancel: watch::Receiver<bool>,
) -> Result<i32, OrchestratorError> {
    match command {
        Command::Deploy {
            tag,
            dry_run,
            skip_backup,
            skip_health_checks,
            force,
            timeout,
        } => {
            let runner = build_runner(settings, layout, cancel)?;
            let options = DeployOptions {
                tag,
                dry_run,
                skip_backup,
                skip_health_checks,
                force,
                timeout_override: timeout.map(Duration::from_secs),
            };
            let outcome = runner.deploy(&options).await?;
            print_outcome(&outcome);
            Ok(outcome.exit_code())
        }

        Command::Rollback { force } => {
            let runner = build_runner(settings, layout, cancel)?;
            let outcome = runner.rollback_last(force).await?;
            print_outcome(&outcome);
            Ok(outcome.exit_code())
        }

        Command::Migrate { command } => run_migrate(command, settings, layout, cancel).await,

        Command::Backup { command } => run_backup(command, settings, layout, cancel).await,

        Command::Status => run_status(&settings, &layout).await,
    }
}

async fn run_migrate(
    command: MigrateCommand,
    settings: Settings,
    layout: StorageLayout,
    cancel: watch::Receiver<bool>,
) -> Result<i32, OrchestratorError> {
    // Chain validation needs no live services
    if let MigrateCommand::Validate = command {
        let dir = Dir::new(&settings.migrations_dir);
        let chain = MigrationChain::load(&dir).await?;
        println!(
            "{} {} revision(s), every forward operation paired",
            "chain valid:".green().bold(),
            chain.revisions().len()
        );
        return Ok(0);
    }

    let runner = build_runner(settings, layout, cancel)?;
    let migrations = runner.migration_runner(None).await?;

    match command {
        MigrateCommand::Upgrade { to } => {
            let applied = migrations.upgrade(to).await?;
            match applied.len() {
                0 => println!("nothing to apply"),
                n => println!("{} {} revision(s): {:?}", "applied".green().bold(), n, applied),
            }
        }
        MigrateCommand::Downgrade { to } => {
            let reversed = migrations.downgrade(to).await?;
            match reversed.len() {
                0 => println!("nothing to reverse"),
                n => println!(
                    "{} {} revision(s): {:?}",
                    "reversed".yellow().bold(),
                    n,
                    reversed
                ),
            }
        }
        MigrateCommand::Current => match migrations.current().await? {
            Some(seq) => println!("{:04}", seq),
            None => println!("no revisions applied"),
        },
        MigrateCommand::History => {
            let pending = migrations.pending_live().await?;
            for revision in migrations.chain().revisions() {
                let marker = if pending.contains(&revision.seq) {
                    "[ ]".to_string()
                } else {
                    "[x]".green().to_string()
                };
                println!("{} {:04}_{}", marker, revision.seq, revision.name);
            }
        }
        MigrateCommand::Validate => unreachable!(),
    }
    Ok(0)
}

async fn run_backup(
    command: BackupCommand,
    settings: Settings,
    layout: StorageLayout,
    cancel: watch::Receiver<bool>,
) -> Result<i32, OrchestratorError> {
    let runner = build_runner(settings, layout, cancel)?;
    let backups = runner.backups();

    match command {
        BackupCommand::Create => {
            let record = backups.create(None).await?;
            println!(
                "{} {} ({} bytes, sha256 {})",
                "backup created:".green().bold(),
                record.id,
                record.size,
                &record.checksum[..12]
            );
        }
        BackupCommand::List => {
            let records = backups.list().await?;
            if records.is_empty() {
                println!("no backups recorded");
            }
            for record in records {
                println!(
                    "{}  {}  {} bytes  expires {}",
                    record.id,
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.size,
                    record.retention_expires_at.format("%Y-%m-%d")
                );
            }
        }
        BackupCommand::Prune => {
            let deleted = backups.prune().await?;
            match deleted.len() {
                0 => println!("nothing to prune"),
                n => println!("{} {} backup(s): {:?}", "pruned".yellow().bold(), n, deleted),
            }
        }
    }
    Ok(0)
}

async fn run_status(
    settings: &Settings,
    layout: &StorageLayout,
) -> Result<i32, OrchestratorError> {
    match ReleaseState::load(&layout.release_state_file()).await? {
        Some(state) => println!(
            "live: {} (tag {}, since {})",
            state.active_color.to_string().green().bold(),
            state.tag,
            state.updated_at.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("no release recorded"),
    }

    let lock_file = layout.lock_file(&settings.environment);
    if let Some(holder) = DeployLock::current_holder(&lock_file).await? {
        println!(
            "{} attempt {} (pid {}) since {}",
            "deployment in progress:".yellow().bold(),
            holder.attempt_id,
            holder.pid,
            holder.acquired_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    let attempts = recent_attempts(layout, 5).await?;
    if !attempts.is_empty() {
        println!("recent attempts:");
        for attempt in attempts.iter().rev() {
            let status = match attempt.status {
                AttemptStatus::Succeeded => "succeeded".green().to_string(),
                AttemptStatus::RolledBack => "rolled back".yellow().to_string(),
                AttemptStatus::Failed => "failed".red().to_string(),
                AttemptStatus::Pending => "pending".to_string(),
            };
            println!(
                "  {}  {}  {} -> {}",
                attempt.id, status, attempt.tag, attempt.target_color
            );
        }
    }
    Ok(0)
}

fn build_runner(
    settings: Settings,
    layout: StorageLayout,
    cancel: watch::Receiver<bool>,
) -> Result<PipelineRunner, OrchestratorError> {
    let services = build_services(&settings)?;
    Ok(PipelineRunner::new(settings, services, layout, cancel))
}

fn build_services(settings: &Settings) -> Result<Services, OrchestratorError> {
    Ok(Services {
        database: Arc::new(PostgresDatabase::new(&settings.database)?),
        cache: Arc::new(RedisCache::new(&settings.cache)),
        registry: Arc::new(DockerRegistry::new(settings.registry.clone())),
        proxy: Arc::new(NginxProxy::new(&settings.proxy)),
        runtime: Arc::new(DockerRuntime::new(Duration::from_secs(
            settings.app.runtime_timeout_secs,
        ))),
        http: Arc::new(ReqwestProbe::new(Duration::from_secs(
            settings.health.timeout_secs,
        ))?),
    })
}

fn print_outcome(outcome: &PipelineOutcome) {
    let attempt = &outcome.attempt;

    if outcome.dry_run {
        match &outcome.failure {
            None => {
                println!(
                    "{} preflight, backup, and migration rehearsal passed",
                    "dry run complete:".green().bold()
                );
                println!(
                    "planned: launch {} as {}, readiness checks, traffic switch, \
                     drain, removal of {}",
                    attempt.tag,
                    attempt.target_color,
                    attempt.target_color.opposite()
                );
            }
            Some(failure) => {
                println!("{} {}", "dry run failed:".red().bold(), failure.message);
            }
        }
        return;
    }

    match &outcome.failure {
        None if attempt.status == AttemptStatus::Succeeded => {
            info!("Attempt {} finished successfully", attempt.id);
            println!(
                "{} {} is live as {} (attempt {})",
                "deployment succeeded:".green().bold(),
                attempt.tag,
                attempt.target_color,
                attempt.id
            );
        }
        None => {
            println!(
                "{} attempt {} compensated",
                "rollback complete:".yellow().bold(),
                attempt.id
            );
        }
        Some(failure) => {
            println!("{} {}", "deployment failed:".red().bold(), failure.message);
            for line in &attempt.rollback_narrative {
                println!("  {}", line);
            }
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).unwrap();
        let mut sigint = signal(SignalKind::interrupt()).unwrap();

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
