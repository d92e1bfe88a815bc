//! Preflight validator tests

mod common;

use std::sync::atomic::Ordering;

use pazdeploy::preflight::PreflightValidator;
use pazdeploy::services::mock::MockServices;

const GIB: u64 = 1024 * 1024 * 1024;

fn validator(services: &MockServices, free_bytes: u64) -> PreflightValidator {
    PreflightValidator::new(
        common::test_settings(&common::temp_base()),
        services.bundle(),
        common::temp_base(),
    )
    .with_free_space_probe(move |_| Some(free_bytes))
}

#[tokio::test]
async fn test_all_checks_pass() {
    let services = MockServices::new();
    let report = validator(&services, 100 * GIB).run().await;

    assert!(report.passed());
    assert_eq!(report.checks.len(), 5);
    assert!(report.violations().is_empty());
}

#[tokio::test]
async fn test_all_violations_reported_at_once() {
    let services = MockServices::new();
    services.database.fail_ping.store(true, Ordering::SeqCst);
    services.cache.fail_ping.store(true, Ordering::SeqCst);

    let report = validator(&services, 100 * GIB).run().await;

    assert!(!report.passed());
    let names: Vec<&str> = report.violations().iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["database", "cache"]);
}

#[tokio::test]
async fn test_disk_space_violation_is_not_overridable() {
    let services = MockServices::new();
    let report = validator(&services, 5 * GIB).run().await;

    assert!(!report.passed());
    assert!(!report.passes_with_override());
    let disk = report
        .violations()
        .into_iter()
        .find(|c| c.name == "disk-space")
        .unwrap();
    assert!(!disk.overridable);
}

#[tokio::test]
async fn test_registry_auth_violation_is_not_overridable() {
    let services = MockServices::new();
    services.registry.fail_login.store(true, Ordering::SeqCst);

    let report = validator(&services, 100 * GIB).run().await;
    assert!(!report.passes_with_override());
}

#[tokio::test]
async fn test_connectivity_violations_are_overridable() {
    let services = MockServices::new();
    services.database.fail_ping.store(true, Ordering::SeqCst);
    services.cache.fail_round_trip.store(true, Ordering::SeqCst);

    let report = validator(&services, 100 * GIB).run().await;
    assert!(!report.passed());
    assert!(report.passes_with_override());
}

#[tokio::test]
async fn test_placeholder_config_is_flagged() {
    let services = MockServices::new();
    let mut settings = common::test_settings(&common::temp_base());
    settings.database.url = "CHANGEME".to_string();

    let report = PreflightValidator::new(settings, services.bundle(), common::temp_base())
        .with_free_space_probe(|_| Some(100 * GIB))
        .run()
        .await;

    let config = report
        .violations()
        .into_iter()
        .find(|c| c.name == "config-keys")
        .unwrap();
    assert!(config.message.contains("database.url"));
    assert!(config.overridable);
}
