//! Health monitor tests

mod common;

use std::sync::atomic::Ordering;

use pazdeploy::health::{HealthMonitor, HealthTarget};
use pazdeploy::models::{CheckKind, Color};
use pazdeploy::services::mock::MockServices;
use pazdeploy::services::InstanceSpec;

fn target(name: &str, port: u16) -> HealthTarget {
    HealthTarget {
        spec: InstanceSpec {
            name: name.to_string(),
            color: Color::Green,
            port,
        },
        health_url: format!("http://127.0.0.1:{}/health", port),
    }
}

fn monitor(services: &MockServices) -> HealthMonitor {
    let settings = common::test_settings(&common::temp_base());
    HealthMonitor::new(services.bundle(), &settings.health)
}

#[tokio::test]
async fn test_all_sub_checks_pass_for_running_instance() {
    let services = MockServices::new();
    services.runtime.seed_running(Color::Green, &["pazpaz-green-0"]);

    let results = monitor(&services).check(&target("pazpaz-green-0", 8020)).await;
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.passed));
}

#[tokio::test]
async fn test_one_failing_sub_check_fails_the_round() {
    let services = MockServices::new();
    services.runtime.seed_running(Color::Green, &["pazpaz-green-0"]);
    services.cache.fail_round_trip.store(true, Ordering::SeqCst);

    let round = monitor(&services)
        .check_round(&[target("pazpaz-green-0", 8020)], 1)
        .await;

    assert!(!round.healthy);
    let failed: Vec<CheckKind> = round
        .results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| r.kind)
        .collect();
    assert_eq!(failed, vec![CheckKind::Cache]);
}

#[tokio::test]
async fn test_round_covers_every_instance() {
    let services = MockServices::new();
    services
        .runtime
        .seed_running(Color::Green, &["pazpaz-green-0", "pazpaz-green-1"]);

    let targets = [target("pazpaz-green-0", 8020), target("pazpaz-green-1", 8021)];
    let round = monitor(&services).check_round(&targets, 1).await;

    assert!(round.healthy);
    assert_eq!(round.results.len(), 8);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let services = MockServices::new();
    // Instance never appears, so the process check fails every round
    let round = monitor(&services)
        .wait_until_healthy(&[target("pazpaz-green-0", 8020)])
        .await;

    assert!(!round.healthy);
    // test settings allow two attempts
    assert_eq!(round.attempt, 2);
}

#[tokio::test]
async fn test_bad_http_status_fails_check() {
    let services = MockServices {
        http: std::sync::Arc::new(pazdeploy::services::mock::MockHttpProbe::with_status(503)),
        ..MockServices::new()
    };
    services.runtime.seed_running(Color::Green, &["pazpaz-green-0"]);

    let results = monitor(&services).check(&target("pazpaz-green-0", 8020)).await;
    let http = results.iter().find(|r| r.kind == CheckKind::Http).unwrap();
    assert!(!http.passed);
    assert!(http.error.as_deref().unwrap().contains("503"));
}
