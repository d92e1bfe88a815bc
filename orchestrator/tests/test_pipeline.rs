//! End-to-end pipeline tests against in-memory service doubles

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::watch;

use pazdeploy::errors::OrchestratorError;
use pazdeploy::lock::DeployLock;
use pazdeploy::models::{AttemptStatus, Color};
use pazdeploy::pipeline::{DeployOptions, PipelineRunner};
use pazdeploy::services::mock::{MockProxy, MockServices};
use pazdeploy::storage::layout::StorageLayout;
use pazdeploy::storage::release::ReleaseState;

const GIB: u64 = 1024 * 1024 * 1024;

fn runner_for(
    services: &MockServices,
    layout: &StorageLayout,
    migrations_dir: &std::path::Path,
) -> (PipelineRunner, watch::Sender<bool>) {
    let (tx, rx) = watch::channel(false);
    let runner = PipelineRunner::new(
        common::test_settings(migrations_dir),
        services.bundle(),
        layout.clone(),
        rx,
    )
    .with_free_space_probe(|_| Some(100 * GIB));
    (runner, tx)
}

fn deploy_options(tag: &str) -> DeployOptions {
    DeployOptions {
        tag: tag.to_string(),
        ..DeployOptions::default()
    }
}

#[tokio::test]
async fn test_deploy_success_switches_and_cleans_up() {
    let layout = common::test_layout();
    let services = MockServices {
        proxy: Arc::new(MockProxy::with_active(Color::Blue)),
        ..MockServices::new()
    };
    services
        .runtime
        .seed_running(Color::Blue, &["pazpaz-blue-0", "pazpaz-blue-1"]);

    let (runner, _tx) = runner_for(&services, &layout, &common::temp_base());
    let outcome = runner.deploy(&deploy_options("v2.0.0")).await.unwrap();

    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.attempt.status, AttemptStatus::Succeeded);
    assert_eq!(outcome.attempt.target_color, Color::Green);

    // Traffic moved exactly once and the old color is gone
    assert_eq!(services.proxy.current(), Some(Color::Green));
    assert_eq!(services.proxy.switches.load(Ordering::SeqCst), 1);
    assert_eq!(
        services.runtime.names(),
        vec!["pazpaz-green-0", "pazpaz-green-1"]
    );
    assert_eq!(
        services.registry.pulls.lock().unwrap().as_slice(),
        ["ghcr.io/pazpaz/pazpaz:v2.0.0"]
    );

    // Release state and a verified backup were persisted
    let state = ReleaseState::load(&layout.release_state_file())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.active_color, Color::Green);
    assert_eq!(state.tag, "v2.0.0");
    assert_eq!(runner.backups().list().await.unwrap().len(), 1);

    // One attempt log exists and the lock is gone
    assert_eq!(runner.recent_attempts(10).await.unwrap().len(), 1);
    assert!(!layout.lock_file("production").path().exists());
}

#[tokio::test]
async fn test_deploy_health_failure_rolls_back() {
    let layout = common::test_layout();
    let services = MockServices {
        proxy: Arc::new(MockProxy::with_active(Color::Blue)),
        ..MockServices::new()
    };
    services
        .runtime
        .seed_running(Color::Blue, &["pazpaz-blue-0", "pazpaz-blue-1"]);
    // New instances launch but never report as running
    services.runtime.instances_unhealthy.store(true, Ordering::SeqCst);

    let (runner, _tx) = runner_for(&services, &layout, &common::temp_base());
    let outcome = runner.deploy(&deploy_options("v2.0.0")).await.unwrap();

    assert_eq!(outcome.exit_code(), 3);
    assert_eq!(outcome.attempt.status, AttemptStatus::RolledBack);
    assert!(!outcome.attempt.rollback_narrative.is_empty());

    // Old color kept serving the whole time; the failed instances are gone
    assert_eq!(services.proxy.current(), Some(Color::Blue));
    assert_eq!(services.proxy.switches.load(Ordering::SeqCst), 0);
    assert_eq!(
        services.runtime.names(),
        vec!["pazpaz-blue-0", "pazpaz-blue-1"]
    );

    // No migrations ran, so the backup stayed unused
    assert_eq!(services.database.restores.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_launch_failure_rolls_back() {
    let layout = common::test_layout();
    let services = MockServices {
        proxy: Arc::new(MockProxy::with_active(Color::Blue)),
        ..MockServices::new()
    };
    services
        .runtime
        .seed_running(Color::Blue, &["pazpaz-blue-0", "pazpaz-blue-1"]);
    services.runtime.fail_launch.store(true, Ordering::SeqCst);

    let (runner, _tx) = runner_for(&services, &layout, &common::temp_base());
    let outcome = runner.deploy(&deploy_options("v2.0.0")).await.unwrap();

    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(outcome.attempt.status, AttemptStatus::RolledBack);
    assert_eq!(services.proxy.current(), Some(Color::Blue));
    assert_eq!(
        services.runtime.names(),
        vec!["pazpaz-blue-0", "pazpaz-blue-1"]
    );
}

#[tokio::test]
async fn test_preflight_disk_violation_stops_everything() {
    let layout = common::test_layout();
    let services = MockServices::new();

    let (tx, rx) = watch::channel(false);
    drop(tx);
    let runner = PipelineRunner::new(
        common::test_settings(&common::temp_base()),
        services.bundle(),
        layout.clone(),
        rx,
    )
    .with_free_space_probe(|_| Some(5 * GIB));

    // Disk space is never overridable, even with --force
    let options = DeployOptions {
        force: true,
        ..deploy_options("v2.0.0")
    };
    let outcome = runner.deploy(&options).await.unwrap();

    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.attempt.status, AttemptStatus::Failed);
    assert!(runner.backups().list().await.unwrap().is_empty());
    assert!(services.runtime.names().is_empty());
    assert_eq!(services.proxy.switches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dry_run_makes_no_changes_and_takes_no_lock() {
    let layout = common::test_layout();
    let services = MockServices {
        proxy: Arc::new(MockProxy::with_active(Color::Blue)),
        ..MockServices::new()
    };
    services
        .runtime
        .seed_running(Color::Blue, &["pazpaz-blue-0", "pazpaz-blue-1"]);

    let migrations_dir = common::temp_base();
    common::write_revision(&migrations_dir, 1, "init", "CREATE TABLE clients (id int);").await;

    let (runner, _tx) = runner_for(&services, &layout, &migrations_dir);
    let options = DeployOptions {
        dry_run: true,
        ..deploy_options("v2.0.0")
    };
    let outcome = runner.deploy(&options).await.unwrap();

    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.attempt.status, AttemptStatus::Succeeded);

    // Rehearsal ran on the scratch copy only; live system untouched
    assert!(services.database.live_revision_seqs().is_empty());
    assert!(services
        .database
        .applied_scripts()
        .iter()
        .all(|(target, _)| target.starts_with("scratch:")));
    assert_eq!(
        services.runtime.names(),
        vec!["pazpaz-blue-0", "pazpaz-blue-1"]
    );
    assert_eq!(services.proxy.switches.load(Ordering::SeqCst), 0);
    assert!(!layout.lock_file("production").path().exists());

    // No backup was recorded and the rehearsal snapshot was cleaned up
    assert!(runner.backups().list().await.unwrap().is_empty());
    assert!(!layout.backup_index_file().path().exists());
    assert!(dir_dump_count(layout.backups_dir().path()).await == 0);
    assert!(dir_dump_count(layout.scratch_dir().path()).await == 0);
}

/// Count .dump files in a directory, tolerating a missing directory
async fn dir_dump_count(dir: &std::path::Path) -> usize {
    let mut count = 0;
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.path().extension().is_some_and(|ext| ext == "dump") {
            count += 1;
        }
    }
    count
}

#[tokio::test]
async fn test_dry_run_preserves_existing_backups() {
    let layout = common::test_layout();
    let services = MockServices::new();

    let migrations_dir = common::temp_base();
    common::write_revision(&migrations_dir, 1, "clients", "CREATE TABLE clients (id int);").await;

    // keep=1 makes any accidental backup creation prune the original
    let mut settings = common::test_settings(&migrations_dir);
    settings.backup.keep = 1;
    let (_tx, rx) = watch::channel(false);
    let runner = PipelineRunner::new(settings, services.bundle(), layout.clone(), rx)
        .with_free_space_probe(|_| Some(100 * GIB));

    layout.setup().await.unwrap();
    let existing = runner.backups().create(None).await.unwrap();

    let options = DeployOptions {
        dry_run: true,
        ..deploy_options("v2.0.0")
    };
    let outcome = runner.deploy(&options).await.unwrap();

    assert_eq!(outcome.exit_code(), 0);
    let records = runner.backups().list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, existing.id);
    assert!(existing.path.exists());
}

#[tokio::test]
async fn test_deploy_applies_pending_migrations() {
    let layout = common::test_layout();
    let services = MockServices::new();

    let migrations_dir = common::temp_base();
    common::write_revision(&migrations_dir, 1, "clients", "CREATE TABLE clients (id int);").await;
    common::write_revision(&migrations_dir, 2, "notes", "CREATE TABLE notes (id int);").await;

    let (runner, _tx) = runner_for(&services, &layout, &migrations_dir);
    let outcome = runner.deploy(&deploy_options("v1.0.0")).await.unwrap();

    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.attempt.migrations_applied, vec![1, 2]);
    assert_eq!(services.database.live_revision_seqs(), vec![1, 2]);

    // Rehearsal preceded the live apply for every revision
    let scripts = services.database.applied_scripts();
    let first_live = scripts.iter().position(|(t, _)| t == "live").unwrap();
    assert!(scripts[..first_live]
        .iter()
        .all(|(target, _)| target.starts_with("scratch:")));
}

#[tokio::test]
async fn test_skip_backup_refused_when_migrations_pending() {
    let layout = common::test_layout();
    let services = MockServices::new();

    let migrations_dir = common::temp_base();
    common::write_revision(&migrations_dir, 1, "clients", "CREATE TABLE clients (id int);").await;

    let (runner, _tx) = runner_for(&services, &layout, &migrations_dir);
    let options = DeployOptions {
        skip_backup: true,
        ..deploy_options("v1.0.0")
    };
    let outcome = runner.deploy(&options).await.unwrap();

    assert_ne!(outcome.exit_code(), 0);
    assert!(services.database.live_revision_seqs().is_empty());
}

#[tokio::test]
async fn test_lock_blocks_second_deployment() {
    let layout = common::test_layout();
    layout.setup().await.unwrap();
    let services = MockServices::new();

    let lock = DeployLock::acquire(layout.lock_file("production"), "other-attempt", 3600, false)
        .await
        .unwrap();

    let (runner, _tx) = runner_for(&services, &layout, &common::temp_base());
    let err = runner.deploy(&deploy_options("v2.0.0")).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::LockHeld(_)));

    lock.release().await.unwrap();
    let outcome = runner.deploy(&deploy_options("v2.0.0")).await.unwrap();
    assert_eq!(outcome.exit_code(), 0);
}

#[tokio::test]
async fn test_cancellation_before_start_fails_cleanly() {
    let layout = common::test_layout();
    let services = MockServices::new();

    let (runner, tx) = runner_for(&services, &layout, &common::temp_base());
    tx.send(true).unwrap();

    let outcome = runner.deploy(&deploy_options("v2.0.0")).await.unwrap();

    // Nothing was mutated, so there is nothing to compensate
    assert_eq!(outcome.attempt.status, AttemptStatus::Failed);
    assert!(runner.backups().list().await.unwrap().is_empty());
    assert!(services.runtime.names().is_empty());
}

#[tokio::test]
async fn test_failed_reverse_falls_back_to_restore() {
    let layout = common::test_layout();
    let services = MockServices::new();

    let migrations_dir = common::temp_base();
    common::write_revision(&migrations_dir, 1, "clients", "CREATE TABLE clients (id int);").await;
    common::write_revision(
        &migrations_dir,
        2,
        "notes",
        "CREATE TABLE notes (id int);\nDROP TABLE IF EXISTS clients_legacy;",
    )
    .await;

    // Revision 2 fails mid-chain on live, and so does the reverse of
    // revision 1; rehearsal on the scratch copy is unaffected
    *services.database.fail_apply_containing.lock().unwrap() =
        Some("DROP TABLE IF EXISTS clients".to_string());
    services.database.fail_live_only.store(true, Ordering::SeqCst);
    services.database.fail_reverse.store(true, Ordering::SeqCst);

    let (runner, _tx) = runner_for(&services, &layout, &migrations_dir);
    let outcome = runner.deploy(&deploy_options("v1.0.0")).await.unwrap();

    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(outcome.attempt.status, AttemptStatus::RolledBack);

    // Reversal could not undo revision 1, so the backup restore fired and
    // brought the live schema back to its pre-run state
    assert_eq!(services.database.restores.load(Ordering::SeqCst), 1);
    assert!(services.database.live_revision_seqs().is_empty());
    assert!(outcome
        .attempt
        .rollback_narrative
        .iter()
        .any(|line| line.contains("restored from backup")));
}

#[tokio::test]
async fn test_rollback_last_redeploys_previous_tag() {
    let layout = common::test_layout();
    let services = MockServices::new();

    let (runner, _tx) = runner_for(&services, &layout, &common::temp_base());
    assert_eq!(
        runner.deploy(&deploy_options("v1.0.0")).await.unwrap().exit_code(),
        0
    );
    assert_eq!(
        runner.deploy(&deploy_options("v2.0.0")).await.unwrap().exit_code(),
        0
    );

    let outcome = runner.rollback_last(false).await.unwrap();
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.attempt.tag, "v1.0.0");

    let state = ReleaseState::load(&layout.release_state_file())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.tag, "v1.0.0");
}
