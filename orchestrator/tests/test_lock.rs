//! Deployment lock tests

mod common;

use pazdeploy::errors::OrchestratorError;
use pazdeploy::lock::DeployLock;

#[tokio::test]
async fn test_lock_is_exclusive_per_environment() {
    let layout = common::test_layout();
    layout.setup().await.unwrap();

    let lock = DeployLock::acquire(layout.lock_file("production"), "attempt-a", 3600, false)
        .await
        .unwrap();
    assert_eq!(lock.holder().attempt_id, "attempt-a");

    let err = DeployLock::acquire(layout.lock_file("production"), "attempt-b", 3600, false)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::LockHeld(_)));

    // A different environment is a different lock
    let staging = DeployLock::acquire(layout.lock_file("staging"), "attempt-c", 3600, false)
        .await
        .unwrap();
    staging.release().await.unwrap();

    lock.release().await.unwrap();
    DeployLock::acquire(layout.lock_file("production"), "attempt-d", 3600, false)
        .await
        .unwrap()
        .release()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_stale_lock_reported_but_not_removed() {
    let layout = common::test_layout();
    layout.setup().await.unwrap();

    let _held = DeployLock::acquire(layout.lock_file("production"), "attempt-a", 0, false)
        .await
        .unwrap();

    let err = DeployLock::acquire(layout.lock_file("production"), "attempt-b", 0, false)
        .await
        .unwrap_err();
    match err {
        OrchestratorError::LockHeld(message) => assert!(message.contains("stale")),
        other => panic!("unexpected error: {}", other),
    }

    // Still held: a third non-force attempt fails the same way
    assert!(
        DeployLock::acquire(layout.lock_file("production"), "attempt-c", 0, false)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_force_removes_stale_lock() {
    let layout = common::test_layout();
    layout.setup().await.unwrap();

    let _held = DeployLock::acquire(layout.lock_file("production"), "attempt-a", 0, false)
        .await
        .unwrap();

    let forced = DeployLock::acquire(layout.lock_file("production"), "attempt-b", 0, true)
        .await
        .unwrap();
    assert_eq!(forced.holder().attempt_id, "attempt-b");
}

#[tokio::test]
async fn test_force_refuses_fresh_lock() {
    let layout = common::test_layout();
    layout.setup().await.unwrap();

    let _held = DeployLock::acquire(layout.lock_file("production"), "attempt-a", 3600, false)
        .await
        .unwrap();

    let err = DeployLock::acquire(layout.lock_file("production"), "attempt-b", 3600, true)
        .await
        .unwrap_err();
    match err {
        OrchestratorError::LockHeld(message) => assert!(message.contains("not stale")),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_current_holder_metadata() {
    let layout = common::test_layout();
    layout.setup().await.unwrap();
    let file = layout.lock_file("production");

    assert!(DeployLock::current_holder(&file).await.unwrap().is_none());

    let lock = DeployLock::acquire(layout.lock_file("production"), "attempt-a", 3600, false)
        .await
        .unwrap();
    let holder = DeployLock::current_holder(&file).await.unwrap().unwrap();
    assert_eq!(holder.attempt_id, "attempt-a");
    assert_eq!(holder.pid, std::process::id());

    lock.release().await.unwrap();
    assert!(DeployLock::current_holder(&file).await.unwrap().is_none());
}
