//! External service seams
//!
//! Every collaborator the pipeline mutates or probes (database, cache,
//! registry, reverse proxy, container runtime, HTTP endpoints) sits behind
//! an async trait. Production implementations drive the corresponding CLI
//! tools; `mock` provides in-memory doubles for the test suite.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::OrchestratorError;
use crate::models::Color;

pub mod docker;
pub mod http;
pub mod mock;
pub mod nginx;
pub mod postgres;
pub mod redis;

/// Which database a migration operation targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbTarget {
    /// The live database
    Live,
    /// A disposable rehearsal copy
    Scratch(String),
}

/// One application instance to run under a color
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    /// Container name
    pub name: String,

    /// Color label
    pub color: Color,

    /// Host port the instance listens on
    pub port: u16,
}

/// Relational database operations
#[async_trait]
pub trait Database: Send + Sync {
    /// Lightweight reachability probe
    async fn ping(&self) -> Result<(), OrchestratorError>;

    /// Write a consistent compressed logical dump to `dest`
    async fn dump(&self, dest: &Path) -> Result<(), OrchestratorError>;

    /// Verify a dump is a readable archive
    async fn verify_dump(&self, path: &Path) -> Result<(), OrchestratorError>;

    /// Restore a dump over the live database
    async fn restore(&self, path: &Path) -> Result<(), OrchestratorError>;

    /// Create an empty scratch database
    async fn create_scratch(&self, name: &str) -> Result<(), OrchestratorError>;

    /// Drop a scratch database
    async fn drop_scratch(&self, name: &str) -> Result<(), OrchestratorError>;

    /// Restore a dump into a scratch database
    async fn restore_into(&self, path: &Path, name: &str) -> Result<(), OrchestratorError>;

    /// Apply a SQL script to the target
    async fn apply_sql(&self, target: &DbTarget, sql: &str) -> Result<(), OrchestratorError>;

    /// Revision sequence numbers currently applied to the target
    async fn applied_revisions(&self, target: &DbTarget) -> Result<Vec<u32>, OrchestratorError>;

    /// Record or erase a revision in the target's revision table
    async fn set_revision_applied(
        &self,
        target: &DbTarget,
        seq: u32,
        name: &str,
        applied: bool,
    ) -> Result<(), OrchestratorError>;

    /// Post-migration validation: schema shape and referential-integrity
    /// spot checks
    async fn spot_check(&self, target: &DbTarget) -> Result<(), OrchestratorError>;
}

/// Cache service operations
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reachability probe
    async fn ping(&self) -> Result<(), OrchestratorError>;

    /// Write a value and read it back, failing on any mismatch
    async fn round_trip(&self, key: &str, value: &str) -> Result<(), OrchestratorError>;
}

/// Container registry operations
#[async_trait]
pub trait ContainerRegistry: Send + Sync {
    /// Authenticate against the registry
    async fn login(&self) -> Result<(), OrchestratorError>;

    /// Pull an image reference
    async fn pull(&self, image_ref: &str) -> Result<(), OrchestratorError>;
}

/// Reverse proxy / load balancer operations
#[async_trait]
pub trait ReverseProxy: Send + Sync {
    /// Color the proxy currently routes to, if configured
    async fn active_color(&self) -> Result<Option<Color>, OrchestratorError>;

    /// Atomically repoint traffic at the given color's upstream addresses
    async fn switch_to(&self, color: Color, upstreams: &[String]) -> Result<(), OrchestratorError>;
}

/// Container runtime operations
#[async_trait]
pub trait InstanceRuntime: Send + Sync {
    /// Launch one instance
    async fn launch(&self, spec: &InstanceSpec, image_ref: &str) -> Result<(), OrchestratorError>;

    /// Whether the named instance process is up
    async fn is_running(&self, name: &str) -> Result<bool, OrchestratorError>;

    /// Stop an instance
    async fn stop(&self, name: &str) -> Result<(), OrchestratorError>;

    /// Remove a stopped instance
    async fn remove(&self, name: &str) -> Result<(), OrchestratorError>;

    /// Names of instances carrying the given color label
    async fn list(&self, color: Color) -> Result<Vec<String>, OrchestratorError>;
}

/// HTTP reachability probe for application health endpoints
#[async_trait]
pub trait HttpProbe: Send + Sync {
    /// GET the URL, returning the status code
    async fn probe(&self, url: &str) -> Result<u16, OrchestratorError>;
}

/// Bundle of all external collaborators used by the pipeline
#[derive(Clone)]
pub struct Services {
    pub database: Arc<dyn Database>,
    pub cache: Arc<dyn CacheStore>,
    pub registry: Arc<dyn ContainerRegistry>,
    pub proxy: Arc<dyn ReverseProxy>,
    pub runtime: Arc<dyn InstanceRuntime>,
    pub http: Arc<dyn HttpProbe>,
}
