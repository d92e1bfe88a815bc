//! Preflight validation
//!
//! Every check runs independently and in no particular order; the report
//! carries all violations at once so an operator fixes everything in one
//! pass. Nothing is mutated before the report passes.

use std::path::{Path, PathBuf};

use sysinfo::Disks;
use tracing::{info, warn};

use crate::config::settings::Settings;
use crate::services::Services;

/// Outcome of one preflight check
#[derive(Debug, Clone)]
pub struct PreflightCheck {
    /// Check name as shown to operators
    pub name: &'static str,

    pub passed: bool,

    /// Human-readable detail
    pub message: String,

    /// Whether --force may override a failure of this check.
    /// Disk space and registry auth are never overridable: continuing
    /// would corrupt the backup or launch stage.
    pub overridable: bool,
}

/// Full preflight report
#[derive(Debug, Clone, Default)]
pub struct PreflightReport {
    pub checks: Vec<PreflightCheck>,
}

impl PreflightReport {
    /// All checks passed
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Violated checks
    pub fn violations(&self) -> Vec<&PreflightCheck> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    /// Whether the report passes once overridable violations are waived
    pub fn passes_with_override(&self) -> bool {
        self.violations().iter().all(|c| c.overridable)
    }
}

type FreeSpaceProbe = Box<dyn Fn(&Path) -> Option<u64> + Send + Sync>;

/// Preflight validator
pub struct PreflightValidator {
    settings: Settings,
    services: Services,
    /// Directory whose filesystem must hold the free-space minimum
    backup_target_dir: PathBuf,
    free_space: FreeSpaceProbe,
}

impl PreflightValidator {
    pub fn new(settings: Settings, services: Services, backup_target_dir: PathBuf) -> Self {
        Self {
            settings,
            services,
            backup_target_dir,
            free_space: Box::new(free_space_for),
        }
    }

    /// Replace the free-space probe (tests inject fixed values here)
    pub fn with_free_space_probe(
        mut self,
        probe: impl Fn(&Path) -> Option<u64> + Send + Sync + 'static,
    ) -> Self {
        self.free_space = Box::new(probe);
        self
    }

    /// Run every check and collect the report
    pub async fn run(&self) -> PreflightReport {
        info!("Running preflight checks...");
        let mut report = PreflightReport::default();

        report.checks.push(self.check_config_keys());
        report.checks.push(self.check_disk_space());
        report.checks.push(self.check_database().await);
        report.checks.push(self.check_cache().await);
        report.checks.push(self.check_registry().await);

        for violation in report.violations() {
            warn!("Preflight violation [{}]: {}", violation.name, violation.message);
        }
        report
    }

    fn check_config_keys(&self) -> PreflightCheck {
        let placeholders = self.settings.placeholder_keys();
        if placeholders.is_empty() {
            PreflightCheck {
                name: "config-keys",
                passed: true,
                message: "all required keys configured".to_string(),
                overridable: true,
            }
        } else {
            PreflightCheck {
                name: "config-keys",
                passed: false,
                message: format!("missing or placeholder values: {}", placeholders.join(", ")),
                overridable: true,
            }
        }
    }

    fn check_disk_space(&self) -> PreflightCheck {
        let required = self.settings.min_free_disk_bytes;
        match (self.free_space)(&self.backup_target_dir) {
            Some(available) if available >= required => PreflightCheck {
                name: "disk-space",
                passed: true,
                message: format!(
                    "{:.1} GiB free (minimum {:.1} GiB)",
                    gib(available),
                    gib(required)
                ),
                overridable: false,
            },
            Some(available) => PreflightCheck {
                name: "disk-space",
                passed: false,
                message: format!(
                    "{:.1} GiB free, minimum is {:.1} GiB",
                    gib(available),
                    gib(required)
                ),
                overridable: false,
            },
            None => PreflightCheck {
                name: "disk-space",
                passed: false,
                message: format!(
                    "no disk found for {}",
                    self.backup_target_dir.display()
                ),
                overridable: false,
            },
        }
    }

    async fn check_database(&self) -> PreflightCheck {
        match self.services.database.ping().await {
            Ok(()) => PreflightCheck {
                name: "database",
                passed: true,
                message: "reachable".to_string(),
                overridable: true,
            },
            Err(e) => PreflightCheck {
                name: "database",
                passed: false,
                message: e.to_string(),
                overridable: true,
            },
        }
    }

    async fn check_cache(&self) -> PreflightCheck {
        let probe = async {
            self.services.cache.ping().await?;
            let key = format!("pazdeploy:preflight:{}", uuid::Uuid::new_v4());
            self.services.cache.round_trip(&key, "ok").await
        };
        match probe.await {
            Ok(()) => PreflightCheck {
                name: "cache",
                passed: true,
                message: "round trip ok".to_string(),
                overridable: true,
            },
            Err(e) => PreflightCheck {
                name: "cache",
                passed: false,
                message: e.to_string(),
                overridable: true,
            },
        }
    }

    async fn check_registry(&self) -> PreflightCheck {
        match self.services.registry.login().await {
            Ok(()) => PreflightCheck {
                name: "registry-auth",
                passed: true,
                message: "authenticated".to_string(),
                overridable: false,
            },
            Err(e) => PreflightCheck {
                name: "registry-auth",
                passed: false,
                message: e.to_string(),
                overridable: false,
            },
        }
    }
}

/// Available bytes on the filesystem holding `path`, by longest matching
/// mount point
fn free_space_for(path: &Path) -> Option<u64> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}
