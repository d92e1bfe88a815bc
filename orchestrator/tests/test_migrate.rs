//! Migration runner tests against the in-memory database double

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use pazdeploy::filesys::dir::Dir;
use pazdeploy::migrate::chain::{MigrationChain, Revision};
use pazdeploy::migrate::runner::{ChainState, MigrationRunner};
use pazdeploy::models::BackupRecord;
use pazdeploy::services::mock::MockDatabase;

fn rev(seq: u32, name: &str, up_sql: &str, down_sql: &str) -> Revision {
    Revision {
        seq,
        name: name.to_string(),
        up_sql: up_sql.to_string(),
        down_sql: format!("-- reverse\n{}", down_sql),
    }
}

fn runner_with(database: Arc<MockDatabase>, revisions: Vec<Revision>) -> MigrationRunner {
    let chain = MigrationChain::from_revisions(revisions).unwrap();
    MigrationRunner::new(
        database,
        chain,
        "pazpaz_rehearsal".to_string(),
        Duration::from_secs(60),
    )
}

async fn fake_backup() -> BackupRecord {
    let path = common::temp_base().join("snapshot.dump");
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&path, "MOCK-DUMP revisions=[]\n").await.unwrap();
    BackupRecord {
        id: "test-backup".to_string(),
        path,
        created_at: Utc::now(),
        size: 24,
        checksum: String::new(),
        retention_expires_at: Utc::now(),
        attempt_id: None,
    }
}

#[tokio::test]
async fn test_rehearsal_failure_leaves_live_untouched() {
    let database = Arc::new(MockDatabase::new());
    *database.fail_apply_containing.lock().unwrap() = Some("notes".to_string());

    let runner = runner_with(
        database.clone(),
        vec![
            rev(1, "clients", "CREATE TABLE clients (id int);", "DROP TABLE clients;"),
            rev(2, "notes", "CREATE TABLE notes (id int);", "DROP TABLE notes;"),
        ],
    );

    let backup = fake_backup().await;
    let mut state = ChainState::NotApplied;
    let result = runner.rehearse(&backup, &mut state).await;

    assert!(result.is_err());
    assert_eq!(state, ChainState::TestFailed);
    assert!(database.live_revision_seqs().is_empty());
    // The scratch copy is dropped on the failure path too
    assert!(database.live_scratches().is_empty());
}

#[tokio::test]
async fn test_live_failure_reverses_applied_revisions() {
    let database = Arc::new(MockDatabase::new());
    let runner = runner_with(
        database.clone(),
        vec![
            rev(1, "clients", "CREATE TABLE clients (id int);", "DROP TABLE clients;"),
            rev(2, "notes", "CREATE TABLE notes (id int);", "DROP TABLE notes;"),
        ],
    );

    let backup = fake_backup().await;
    let mut state = ChainState::NotApplied;
    runner.rehearse(&backup, &mut state).await.unwrap();
    assert_eq!(state, ChainState::TestApplied);

    // Fail revision 2 on the live target only, after the rehearsal passed
    *database.fail_apply_containing.lock().unwrap() =
        Some("CREATE TABLE notes".to_string());

    let err = runner.apply_live(&mut state).await.unwrap_err();
    assert!(err.schema_reverted);
    // Revision 1 was applied and then reversed, newest first
    assert!(database.live_revision_seqs().is_empty());
}

#[tokio::test]
async fn test_live_reverse_failure_demands_restore() {
    let database = Arc::new(MockDatabase::new());
    let runner = runner_with(
        database.clone(),
        vec![
            rev(1, "clients", "CREATE TABLE clients (id int);", "DROP TABLE clients; -- boom"),
            rev(2, "notes", "CREATE TABLE notes (id int); -- boom", "DROP TABLE notes;"),
        ],
    );

    let backup = fake_backup().await;
    let mut state = ChainState::NotApplied;
    runner.rehearse(&backup, &mut state).await.unwrap();

    // Revision 2 fails forward and revision 1 fails in reverse
    *database.fail_apply_containing.lock().unwrap() = Some("boom".to_string());
    database.fail_reverse.store(true, Ordering::SeqCst);

    let err = runner.apply_live(&mut state).await.unwrap_err();
    assert!(!err.schema_reverted);
    // Revision 1 is still applied; only a restore can clean this up, and
    // the error names the survivor so the caller knows that
    assert_eq!(err.applied, vec![1]);
    assert_eq!(database.live_revision_seqs(), vec![1]);
}

#[tokio::test]
async fn test_apply_live_requires_passed_rehearsal() {
    let database = Arc::new(MockDatabase::new());
    let runner = runner_with(
        database,
        vec![rev(1, "clients", "CREATE TABLE clients (id int);", "DROP TABLE clients;")],
    );

    let mut state = ChainState::NotApplied;
    let err = runner.apply_live(&mut state).await.unwrap_err();
    assert!(err.message.contains("cannot apply live"));
}

#[tokio::test]
async fn test_upgrade_and_downgrade_honor_targets() {
    let database = Arc::new(MockDatabase::new());
    database.seed_live(&[(1, "clients")]);

    let runner = runner_with(
        database.clone(),
        vec![
            rev(1, "clients", "CREATE TABLE clients (id int);", "DROP TABLE clients;"),
            rev(2, "notes", "CREATE TABLE notes (id int);", "DROP TABLE notes;"),
            rev(3, "audit", "CREATE TABLE audit (id int);", "DROP TABLE audit;"),
        ],
    );

    let applied = runner.upgrade(Some(2)).await.unwrap();
    assert_eq!(applied, vec![2]);
    assert_eq!(runner.current().await.unwrap(), Some(2));

    // Default downgrade steps back exactly one revision
    let reversed = runner.downgrade(None).await.unwrap();
    assert_eq!(reversed, vec![2]);
    assert_eq!(runner.current().await.unwrap(), Some(1));
}

#[tokio::test]
async fn test_chain_load_rejects_unpaired_revision() {
    let dir_path = common::temp_base();
    tokio::fs::create_dir_all(&dir_path).await.unwrap();
    tokio::fs::write(
        dir_path.join("0001_clients.up.sql"),
        "CREATE TABLE clients (id int);\n",
    )
    .await
    .unwrap();

    let err = MigrationChain::load(&Dir::new(&dir_path)).await.unwrap_err();
    assert!(err.to_string().contains("no reverse operation"));
}

#[tokio::test]
async fn test_chain_load_parses_pairs() {
    let dir_path = common::temp_base();
    common::write_revision(&dir_path, 1, "clients", "CREATE TABLE clients (id int);").await;
    common::write_revision(&dir_path, 2, "notes", "CREATE TABLE notes (id int);").await;

    let chain = MigrationChain::load(&Dir::new(&dir_path)).await.unwrap();
    let seqs: Vec<u32> = chain.revisions().iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![1, 2]);
}
