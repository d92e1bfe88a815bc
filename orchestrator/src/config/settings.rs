//! Settings file management

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Placeholder values that count as "not configured" during preflight.
/// Carried over from the stock settings template.
const PLACEHOLDER_VALUES: &[&str] = &["", "CHANGEME", "changeme", "TODO", "<set-me>"];

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Target environment identity (e.g. "production", "staging").
    /// Keys the deployment lock; never hardcoded anywhere else.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseSettings,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheSettings,

    /// Container registry configuration
    #[serde(default)]
    pub registry: RegistrySettings,

    /// Reverse proxy configuration
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Application instance configuration
    #[serde(default)]
    pub app: AppSettings,

    /// Backup configuration
    #[serde(default)]
    pub backup: BackupSettings,

    /// Health check configuration
    #[serde(default)]
    pub health: HealthSettings,

    /// Migrations directory
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,

    /// Minimum free disk space in bytes required to start a deployment
    #[serde(default = "default_min_free_disk_bytes")]
    pub min_free_disk_bytes: u64,

    /// Seconds to let old-color instances finish in-flight requests after
    /// the traffic switch
    #[serde(default = "default_drain_secs")]
    pub drain_secs: u64,

    /// Timeout for applying the migration chain to the live database
    #[serde(default = "default_migration_timeout_secs")]
    pub migration_timeout_secs: u64,

    /// Age after which a deployment lock is reported as stale
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Bounded retries for the rollback procedure itself
    #[serde(default = "default_rollback_retries")]
    pub rollback_retries: u32,
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_min_free_disk_bytes() -> u64 {
    20 * 1024 * 1024 * 1024 // 20 GiB
}

fn default_drain_secs() -> u64 {
    30
}

fn default_migration_timeout_secs() -> u64 {
    300
}

fn default_lock_ttl_secs() -> u64 {
    3600
}

fn default_rollback_retries() -> u32 {
    2
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            environment: default_environment(),
            database: DatabaseSettings::default(),
            cache: CacheSettings::default(),
            registry: RegistrySettings::default(),
            proxy: ProxySettings::default(),
            app: AppSettings::default(),
            backup: BackupSettings::default(),
            health: HealthSettings::default(),
            migrations_dir: default_migrations_dir(),
            min_free_disk_bytes: default_min_free_disk_bytes(),
            drain_secs: default_drain_secs(),
            migration_timeout_secs: default_migration_timeout_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
            rollback_retries: default_rollback_retries(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file
    pub async fn load(path: &std::path::Path) -> Result<Self, OrchestratorError> {
        let file = File::new(path);
        if !file.exists().await {
            return Err(OrchestratorError::ConfigError(format!(
                "settings file not found: {}",
                path.display()
            )));
        }
        file.read_json().await
    }

    /// Names of required keys whose values are missing or still placeholders
    pub fn placeholder_keys(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let required = [
            ("environment", self.environment.as_str()),
            ("database.url", self.database.url.as_str()),
            ("cache.url", self.cache.url.as_str()),
            ("registry.host", self.registry.host.as_str()),
            ("app.image", self.app.image.as_str()),
            ("proxy.upstream_conf", &self.proxy.upstream_conf.to_string_lossy()),
        ];
        for (name, value) in required {
            if is_placeholder(value) {
                violations.push(name.to_string());
            }
        }
        violations
    }
}

/// Whether a configured value is absent or a known template placeholder
pub fn is_placeholder(value: &str) -> bool {
    PLACEHOLDER_VALUES.contains(&value.trim())
}

/// Database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Connection URL for the live database
    #[serde(default)]
    pub url: String,

    /// Database name used for migration rehearsal copies
    #[serde(default = "default_scratch_db")]
    pub scratch_name: String,

    /// Timeout for individual database commands in seconds
    #[serde(default = "default_db_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_scratch_db() -> String {
    "pazpaz_rehearsal".to_string()
}

fn default_db_timeout_secs() -> u64 {
    60
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            scratch_name: default_scratch_db(),
            command_timeout_secs: default_db_timeout_secs(),
        }
    }
}

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Connection URL for the cache service
    #[serde(default)]
    pub url: String,

    /// Timeout for cache commands in seconds
    #[serde(default = "default_cache_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_cache_timeout_secs() -> u64 {
    5
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            command_timeout_secs: default_cache_timeout_secs(),
        }
    }
}

/// Container registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Registry host (e.g. "ghcr.io")
    #[serde(default = "default_registry_host")]
    pub host: String,

    /// Registry username
    #[serde(default)]
    pub username: String,

    /// Registry password or token. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub password: Option<SecretString>,

    /// Timeout for short registry commands (login) in seconds
    #[serde(default = "default_registry_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Timeout for image pulls in seconds; pulls move real data and get a
    /// wider bound than other commands
    #[serde(default = "default_pull_timeout_secs")]
    pub pull_timeout_secs: u64,
}

fn default_registry_host() -> String {
    "ghcr.io".to_string()
}

fn default_registry_timeout_secs() -> u64 {
    60
}

fn default_pull_timeout_secs() -> u64 {
    600
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            host: default_registry_host(),
            username: String::new(),
            password: None,
            command_timeout_secs: default_registry_timeout_secs(),
            pull_timeout_secs: default_pull_timeout_secs(),
        }
    }
}

/// Reverse proxy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Path of the upstream include file the proxy reads
    #[serde(default = "default_upstream_conf")]
    pub upstream_conf: PathBuf,

    /// Command run to reload the proxy after an upstream swap
    #[serde(default = "default_reload_command")]
    pub reload_command: Vec<String>,

    /// Timeout for the reload command in seconds
    #[serde(default = "default_reload_timeout_secs")]
    pub reload_timeout_secs: u64,
}

fn default_upstream_conf() -> PathBuf {
    PathBuf::from("/etc/nginx/conf.d/pazpaz-upstream.conf")
}

fn default_reload_command() -> Vec<String> {
    vec!["nginx".to_string(), "-s".to_string(), "reload".to_string()]
}

fn default_reload_timeout_secs() -> u64 {
    30
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            upstream_conf: default_upstream_conf(),
            reload_command: default_reload_command(),
            reload_timeout_secs: default_reload_timeout_secs(),
        }
    }
}

/// Application instance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Image to deploy, without tag
    #[serde(default = "default_image")]
    pub image: String,

    /// Instances launched per color
    #[serde(default = "default_instances_per_color")]
    pub instances_per_color: u16,

    /// First host port for blue instances; instance i binds base + i
    #[serde(default = "default_blue_base_port")]
    pub blue_base_port: u16,

    /// First host port for green instances
    #[serde(default = "default_green_base_port")]
    pub green_base_port: u16,

    /// Host where instance health endpoints are reachable
    #[serde(default = "default_health_host")]
    pub health_host: String,

    /// HTTP path of the application health endpoint
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Timeout for container runtime commands in seconds
    #[serde(default = "default_runtime_timeout_secs")]
    pub runtime_timeout_secs: u64,
}

fn default_image() -> String {
    "ghcr.io/pazpaz/pazpaz".to_string()
}

fn default_instances_per_color() -> u16 {
    2
}

fn default_blue_base_port() -> u16 {
    8010
}

fn default_green_base_port() -> u16 {
    8020
}

fn default_health_host() -> String {
    "127.0.0.1".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_runtime_timeout_secs() -> u64 {
    60
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            image: default_image(),
            instances_per_color: default_instances_per_color(),
            blue_base_port: default_blue_base_port(),
            green_base_port: default_green_base_port(),
            health_host: default_health_host(),
            health_path: default_health_path(),
            runtime_timeout_secs: default_runtime_timeout_secs(),
        }
    }
}

/// Backup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Number of most-recent backups kept after pruning
    #[serde(default = "default_backup_keep")]
    pub keep: usize,

    /// Days a backup stays within its retention window
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_backup_keep() -> usize {
    10
}

fn default_retention_days() -> i64 {
    30
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            keep: default_backup_keep(),
            retention_days: default_retention_days(),
        }
    }
}

/// Health check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Attempts before a target is declared unhealthy
    #[serde(default = "default_health_retries")]
    pub retries: u32,

    /// Seconds between attempts
    #[serde(default = "default_health_backoff_secs")]
    pub backoff_secs: u64,

    /// Per-check timeout in seconds
    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_health_retries() -> u32 {
    5
}

fn default_health_backoff_secs() -> u64 {
    10
}

fn default_health_timeout_secs() -> u64 {
    10
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            retries: default_health_retries(),
            backoff_secs: default_health_backoff_secs(),
            timeout_secs: default_health_timeout_secs(),
        }
    }
}
