//! Backup manager tests

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use pazdeploy::backup::BackupManager;
use pazdeploy::errors::OrchestratorError;
use pazdeploy::services::mock::MockDatabase;
use pazdeploy::storage::layout::StorageLayout;

fn manager(database: Arc<MockDatabase>, layout: &StorageLayout, keep: usize) -> BackupManager {
    BackupManager::new(
        database,
        layout.backups_dir(),
        layout.backup_index_file(),
        keep,
        30,
    )
}

#[tokio::test]
async fn test_create_verifies_and_records() {
    let layout = common::test_layout();
    let database = Arc::new(MockDatabase::new());
    let backups = manager(database, &layout, 10);

    let record = backups.create(Some("attempt-1")).await.unwrap();

    assert!(record.path.exists());
    assert!(record.size > 0);
    assert_eq!(record.checksum.len(), 64);
    assert_eq!(record.attempt_id.as_deref(), Some("attempt-1"));

    let listed = backups.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, record.id);
}

#[tokio::test]
async fn test_create_surfaces_dump_failure() {
    let layout = common::test_layout();
    let database = Arc::new(MockDatabase::new());
    database.fail_dump.store(true, Ordering::SeqCst);
    let backups = manager(database, &layout, 10);

    let err = backups.create(None).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::BackupError(_)));
    assert!(backups.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_prune_keeps_newest_n() {
    let layout = common::test_layout();
    let database = Arc::new(MockDatabase::new());
    let backups = manager(database, &layout, 2);

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(backups.create(None).await.unwrap().id);
        // Ids carry second resolution; spacing keeps creation order stable
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    let remaining = backups.list().await.unwrap();
    assert_eq!(remaining.len(), 2);

    // Only the two newest survive, and the pruned files are gone from disk
    let remaining_ids: Vec<&str> = remaining.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(remaining_ids, vec![ids[2].as_str(), ids[3].as_str()]);
    for record in &remaining {
        assert!(record.path.exists());
    }
    let files = layout.backups_dir().list_files().await.unwrap();
    let dumps = files
        .iter()
        .filter(|p| p.extension().is_some_and(|e| e == "dump"))
        .count();
    assert_eq!(dumps, 2);
}

#[tokio::test]
async fn test_restore_roundtrip() {
    let layout = common::test_layout();
    let database = Arc::new(MockDatabase::new());
    let backups = manager(database.clone(), &layout, 10);

    let record = backups.create(None).await.unwrap();
    backups.restore(&record).await.unwrap();
    assert_eq!(database.restores.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_restore_rejects_corrupt_snapshot() {
    let layout = common::test_layout();
    let database = Arc::new(MockDatabase::new());
    let backups = manager(database.clone(), &layout, 10);

    let record = backups.create(None).await.unwrap();
    tokio::fs::write(&record.path, "tampered").await.unwrap();

    let err = backups.restore(&record).await.unwrap_err();
    assert!(err.to_string().contains("checksum mismatch"));
    assert_eq!(database.restores.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_find_unknown_backup() {
    let layout = common::test_layout();
    let backups = manager(Arc::new(MockDatabase::new()), &layout, 10);
    let err = backups.find("missing").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}
