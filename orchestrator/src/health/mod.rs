//! Health monitoring
//!
//! A target is healthy only when every sub-check passes in the same
//! attempt; attempts never carry partial credit forward. Checks across
//! instances in one round run concurrently, and the round verdict is a
//! barrier: nothing proceeds until every parallel check has resolved.

use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::settings::HealthSettings;
use crate::errors::OrchestratorError;
use crate::models::{CheckKind, HealthCheckResult};
use crate::services::{InstanceSpec, Services};
use crate::utils::{calc_backoff, BackoffOptions};

/// One instance to check plus its health endpoint
#[derive(Debug, Clone)]
pub struct HealthTarget {
    pub spec: InstanceSpec,
    pub health_url: String,
}

/// Verdict of one retry round across all targets
#[derive(Debug, Clone)]
pub struct RoundReport {
    /// All sub-checks of all targets passed
    pub healthy: bool,

    /// Every sub-check result from the round
    pub results: Vec<HealthCheckResult>,

    /// 1-based attempt number this round ran as
    pub attempt: u32,
}

/// Health monitor
pub struct HealthMonitor {
    services: Services,
    retries: u32,
    backoff: BackoffOptions,
    check_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(services: Services, settings: &HealthSettings) -> Self {
        Self {
            services,
            retries: settings.retries,
            backoff: BackoffOptions {
                base_delay: Duration::from_secs(settings.backoff_secs),
                linear: false,
            },
            check_timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    /// Run one full check against one target
    pub async fn check(&self, target: &HealthTarget) -> Vec<HealthCheckResult> {
        let name = &target.spec.name;
        let mut results = Vec::with_capacity(4);

        results.push(
            self.timed_check(name, CheckKind::Process, async {
                match self.services.runtime.is_running(name).await? {
                    true => Ok(()),
                    false => Err(OrchestratorError::HealthCheckError(format!(
                        "instance {} is not running",
                        name
                    ))),
                }
            })
            .await,
        );

        results.push(
            self.timed_check(name, CheckKind::Http, async {
                let status = self.services.http.probe(&target.health_url).await?;
                if (200..300).contains(&status) {
                    Ok(())
                } else {
                    Err(OrchestratorError::HealthCheckError(format!(
                        "health endpoint returned {}",
                        status
                    )))
                }
            })
            .await,
        );

        results.push(
            self.timed_check(name, CheckKind::Database, async {
                self.services.database.ping().await
            })
            .await,
        );

        results.push(
            self.timed_check(name, CheckKind::Cache, async {
                let key = format!("pazdeploy:health:{}", name);
                self.services.cache.round_trip(&key, "ok").await
            })
            .await,
        );

        results
    }

    /// Run sub-checks for all targets concurrently and gather the round
    pub async fn check_round(&self, targets: &[HealthTarget], attempt: u32) -> RoundReport {
        let checks = targets.iter().map(|target| self.check(target));
        let results: Vec<HealthCheckResult> =
            join_all(checks).await.into_iter().flatten().collect();
        let healthy = !results.is_empty() && results.iter().all(|r| r.passed);
        RoundReport {
            healthy,
            results,
            attempt,
        }
    }

    /// Retry rounds with fixed backoff until healthy or retries exhaust.
    /// Returns the final round either way.
    pub async fn wait_until_healthy(&self, targets: &[HealthTarget]) -> RoundReport {
        let mut last = RoundReport {
            healthy: false,
            results: Vec::new(),
            attempt: 0,
        };

        for attempt in 1..=self.retries {
            let round = self.check_round(targets, attempt).await;
            if round.healthy {
                info!("All {} target(s) healthy on attempt {}", targets.len(), attempt);
                return round;
            }

            let failed: Vec<&str> = round
                .results
                .iter()
                .filter(|r| !r.passed)
                .map(|r| r.kind.as_str())
                .collect();
            warn!(
                "Health round {}/{} failed ({} sub-check failures: {:?})",
                attempt,
                self.retries,
                failed.len(),
                failed
            );
            last = round;

            if attempt < self.retries {
                tokio::time::sleep(calc_backoff(&self.backoff, attempt - 1)).await;
            }
        }

        last
    }

    /// Run `check` under the per-check timeout, producing a result either
    /// way. Timeout expiry is a failed check, never a crash.
    async fn timed_check<F>(&self, target: &str, kind: CheckKind, check: F) -> HealthCheckResult
    where
        F: std::future::Future<Output = Result<(), OrchestratorError>>,
    {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.check_timeout, check).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (passed, error) = match outcome {
            Ok(Ok(())) => (true, None),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (
                false,
                Some(format!("timed out after {:?}", self.check_timeout)),
            ),
        };

        debug!(
            "Check {}/{}: {} ({} ms)",
            target,
            kind.as_str(),
            if passed { "pass" } else { "fail" },
            latency_ms
        );

        HealthCheckResult {
            target: target.to_string(),
            kind,
            checked_at: Utc::now(),
            passed,
            latency_ms,
            error,
        }
    }
}
