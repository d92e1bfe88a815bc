//! In-memory service doubles for the test suite
//!
//! Each double keeps just enough state to assert on what the pipeline did
//! (dumps written, revisions applied, instances launched, switches made)
//! and exposes failure switches to drive the compensation paths.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::OrchestratorError;
use crate::models::Color;
use crate::services::{
    CacheStore, ContainerRegistry, Database, DbTarget, HttpProbe, InstanceRuntime, InstanceSpec,
    ReverseProxy,
};

fn target_key(target: &DbTarget) -> String {
    match target {
        DbTarget::Live => "live".to_string(),
        DbTarget::Scratch(name) => format!("scratch:{}", name),
    }
}

/// Mock database: revisions per target, dumps written as real files
#[derive(Default)]
pub struct MockDatabase {
    pub fail_ping: AtomicBool,
    pub fail_dump: AtomicBool,
    pub fail_restore: AtomicBool,
    /// Fail `apply_sql` when the script contains this marker
    pub fail_apply_containing: Mutex<Option<String>>,
    /// Also fail the matching reverse script, forcing the restore fallback
    pub fail_reverse: AtomicBool,
    /// Restrict the failure marker to the live target, sparing rehearsal
    /// copies
    pub fail_live_only: AtomicBool,
    pub fail_spot_check: AtomicBool,
    pub restores: AtomicU32,
    revisions: Mutex<HashMap<String, Vec<(u32, String)>>>,
    applied_scripts: Mutex<Vec<(String, String)>>,
    scratches: Mutex<Vec<String>>,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-mark revisions as applied to the live database
    pub fn seed_live(&self, revisions: &[(u32, &str)]) {
        let mut map = self.revisions.lock().unwrap();
        let entry = map.entry("live".to_string()).or_default();
        for (seq, name) in revisions {
            entry.push((*seq, name.to_string()));
        }
    }

    /// Scripts applied so far, as (target, sql) pairs
    pub fn applied_scripts(&self) -> Vec<(String, String)> {
        self.applied_scripts.lock().unwrap().clone()
    }

    /// Scratch databases created and not yet dropped
    pub fn live_scratches(&self) -> Vec<String> {
        self.scratches.lock().unwrap().clone()
    }

    pub fn live_revision_seqs(&self) -> Vec<u32> {
        self.revisions
            .lock()
            .unwrap()
            .get("live")
            .map(|revs| revs.iter().map(|(seq, _)| *seq).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Database for MockDatabase {
    async fn ping(&self) -> Result<(), OrchestratorError> {
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ConnectivityError(
                "mock database unreachable".to_string(),
            ));
        }
        Ok(())
    }

    async fn dump(&self, dest: &Path) -> Result<(), OrchestratorError> {
        if self.fail_dump.load(Ordering::SeqCst) {
            return Err(OrchestratorError::BackupError("mock dump failure".to_string()));
        }
        let revisions = self.live_revision_seqs();
        let body = format!("MOCK-DUMP revisions={:?}\n", revisions);
        tokio::fs::create_dir_all(dest.parent().unwrap_or_else(|| Path::new("."))).await?;
        tokio::fs::write(dest, body).await?;
        Ok(())
    }

    async fn verify_dump(&self, path: &Path) -> Result<(), OrchestratorError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| OrchestratorError::BackupError(e.to_string()))?;
        if meta.len() == 0 {
            return Err(OrchestratorError::BackupError("empty dump".to_string()));
        }
        Ok(())
    }

    async fn restore(&self, path: &Path) -> Result<(), OrchestratorError> {
        if self.fail_restore.load(Ordering::SeqCst) {
            return Err(OrchestratorError::BackupError(
                "mock restore failure".to_string(),
            ));
        }
        let body = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| OrchestratorError::BackupError(e.to_string()))?;
        if !body.starts_with("MOCK-DUMP") {
            return Err(OrchestratorError::BackupError(
                "unrecognized dump contents".to_string(),
            ));
        }

        // Restoring resets the live revision set to what the dump captured
        let seqs: Vec<u32> = body
            .trim()
            .strip_prefix("MOCK-DUMP revisions=[")
            .and_then(|rest| rest.strip_suffix(']'))
            .map(|inner| {
                inner
                    .split(',')
                    .filter_map(|s| s.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default();
        let restored = seqs
            .into_iter()
            .map(|seq| (seq, format!("restored-{}", seq)))
            .collect();
        self.revisions
            .lock()
            .unwrap()
            .insert("live".to_string(), restored);

        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_scratch(&self, name: &str) -> Result<(), OrchestratorError> {
        self.scratches.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn drop_scratch(&self, name: &str) -> Result<(), OrchestratorError> {
        self.scratches.lock().unwrap().retain(|s| s != name);
        self.revisions
            .lock()
            .unwrap()
            .remove(&format!("scratch:{}", name));
        Ok(())
    }

    async fn restore_into(&self, path: &Path, name: &str) -> Result<(), OrchestratorError> {
        let _ = tokio::fs::metadata(path)
            .await
            .map_err(|e| OrchestratorError::BackupError(e.to_string()))?;
        // The scratch copy starts from the live revision set captured in
        // the dump
        let live = self
            .revisions
            .lock()
            .unwrap()
            .get("live")
            .cloned()
            .unwrap_or_default();
        self.revisions
            .lock()
            .unwrap()
            .insert(format!("scratch:{}", name), live);
        Ok(())
    }

    async fn apply_sql(&self, target: &DbTarget, sql: &str) -> Result<(), OrchestratorError> {
        let marker = self.fail_apply_containing.lock().unwrap().clone();
        if let Some(marker) = marker {
            let applies = !self.fail_live_only.load(Ordering::SeqCst)
                || matches!(target, DbTarget::Live);
            let is_reverse = sql.contains("-- reverse");
            let should_fail = applies
                && sql.contains(&marker)
                && (!is_reverse || self.fail_reverse.load(Ordering::SeqCst));
            if should_fail {
                return Err(OrchestratorError::MigrationError(format!(
                    "mock failure applying script containing {:?}",
                    marker
                )));
            }
        }
        self.applied_scripts
            .lock()
            .unwrap()
            .push((target_key(target), sql.to_string()));
        Ok(())
    }

    async fn applied_revisions(&self, target: &DbTarget) -> Result<Vec<u32>, OrchestratorError> {
        Ok(self
            .revisions
            .lock()
            .unwrap()
            .get(&target_key(target))
            .map(|revs| revs.iter().map(|(seq, _)| *seq).collect())
            .unwrap_or_default())
    }

    async fn set_revision_applied(
        &self,
        target: &DbTarget,
        seq: u32,
        name: &str,
        applied: bool,
    ) -> Result<(), OrchestratorError> {
        let mut map = self.revisions.lock().unwrap();
        let entry = map.entry(target_key(target)).or_default();
        if applied {
            if !entry.iter().any(|(s, _)| *s == seq) {
                entry.push((seq, name.to_string()));
                entry.sort_by_key(|(s, _)| *s);
            }
        } else {
            entry.retain(|(s, _)| *s != seq);
        }
        Ok(())
    }

    async fn spot_check(&self, _target: &DbTarget) -> Result<(), OrchestratorError> {
        if self.fail_spot_check.load(Ordering::SeqCst) {
            return Err(OrchestratorError::MigrationError(
                "mock spot check failure".to_string(),
            ));
        }
        Ok(())
    }
}

/// Mock cache store
#[derive(Default)]
pub struct MockCache {
    pub fail_ping: AtomicBool,
    pub fail_round_trip: AtomicBool,
}

impl MockCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MockCache {
    async fn ping(&self) -> Result<(), OrchestratorError> {
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ConnectivityError(
                "mock cache unreachable".to_string(),
            ));
        }
        Ok(())
    }

    async fn round_trip(&self, _key: &str, _value: &str) -> Result<(), OrchestratorError> {
        if self.fail_round_trip.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ConnectivityError(
                "mock cache round trip failure".to_string(),
            ));
        }
        Ok(())
    }
}

/// Mock container registry
#[derive(Default)]
pub struct MockRegistry {
    pub fail_login: AtomicBool,
    pub fail_pull: AtomicBool,
    pub pulls: Mutex<Vec<String>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContainerRegistry for MockRegistry {
    async fn login(&self) -> Result<(), OrchestratorError> {
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ConnectivityError(
                "mock registry auth failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn pull(&self, image_ref: &str) -> Result<(), OrchestratorError> {
        if self.fail_pull.load(Ordering::SeqCst) {
            return Err(OrchestratorError::DeployError("mock pull failure".to_string()));
        }
        self.pulls.lock().unwrap().push(image_ref.to_string());
        Ok(())
    }
}

/// Mock reverse proxy
#[derive(Default)]
pub struct MockProxy {
    pub fail_switch: AtomicBool,
    active: Mutex<Option<(Color, Vec<String>)>>,
    pub switches: AtomicU32,
}

impl MockProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_active(color: Color) -> Self {
        let proxy = Self::default();
        *proxy.active.lock().unwrap() = Some((color, Vec::new()));
        proxy
    }

    pub fn current(&self) -> Option<Color> {
        self.active.lock().unwrap().as_ref().map(|(c, _)| *c)
    }
}

#[async_trait]
impl ReverseProxy for MockProxy {
    async fn active_color(&self) -> Result<Option<Color>, OrchestratorError> {
        Ok(self.current())
    }

    async fn switch_to(&self, color: Color, upstreams: &[String]) -> Result<(), OrchestratorError> {
        if self.fail_switch.load(Ordering::SeqCst) {
            return Err(OrchestratorError::DeployError(
                "mock proxy switch failure".to_string(),
            ));
        }
        *self.active.lock().unwrap() = Some((color, upstreams.to_vec()));
        self.switches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock instance runtime
#[derive(Default)]
pub struct MockRuntime {
    pub fail_launch: AtomicBool,
    /// Launched instances report as not running, failing the process check
    pub instances_unhealthy: AtomicBool,
    instances: Mutex<HashMap<String, (Color, bool)>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an already-running instance set for a color
    pub fn seed_running(&self, color: Color, names: &[&str]) {
        let mut map = self.instances.lock().unwrap();
        for name in names {
            map.insert(name.to_string(), (color, true));
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl InstanceRuntime for MockRuntime {
    async fn launch(&self, spec: &InstanceSpec, _image_ref: &str) -> Result<(), OrchestratorError> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(OrchestratorError::DeployError(
                "mock launch failure".to_string(),
            ));
        }
        let running = !self.instances_unhealthy.load(Ordering::SeqCst);
        self.instances
            .lock()
            .unwrap()
            .insert(spec.name.clone(), (spec.color, running));
        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<bool, OrchestratorError> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .get(name)
            .map(|(_, running)| *running)
            .unwrap_or(false))
    }

    async fn stop(&self, name: &str) -> Result<(), OrchestratorError> {
        if let Some(entry) = self.instances.lock().unwrap().get_mut(name) {
            entry.1 = false;
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), OrchestratorError> {
        self.instances.lock().unwrap().remove(name);
        Ok(())
    }

    async fn list(&self, color: Color) -> Result<Vec<String>, OrchestratorError> {
        let mut names: Vec<String> = self
            .instances
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, (c, _))| *c == color)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

/// Mock HTTP probe, always returning a configured status
pub struct MockHttpProbe {
    pub status: AtomicU32,
    pub fail: AtomicBool,
}

impl MockHttpProbe {
    pub fn ok() -> Self {
        Self {
            status: AtomicU32::new(200),
            fail: AtomicBool::new(false),
        }
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            status: AtomicU32::new(status as u32),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl HttpProbe for MockHttpProbe {
    async fn probe(&self, _url: &str) -> Result<u16, OrchestratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ConnectivityError(
                "mock http probe failure".to_string(),
            ));
        }
        Ok(self.status.load(Ordering::SeqCst) as u16)
    }
}

/// Assemble a [`crate::services::Services`] bundle from mock parts
pub struct MockServices {
    pub database: std::sync::Arc<MockDatabase>,
    pub cache: std::sync::Arc<MockCache>,
    pub registry: std::sync::Arc<MockRegistry>,
    pub proxy: std::sync::Arc<MockProxy>,
    pub runtime: std::sync::Arc<MockRuntime>,
    pub http: std::sync::Arc<MockHttpProbe>,
}

impl MockServices {
    pub fn new() -> Self {
        Self {
            database: std::sync::Arc::new(MockDatabase::new()),
            cache: std::sync::Arc::new(MockCache::new()),
            registry: std::sync::Arc::new(MockRegistry::new()),
            proxy: std::sync::Arc::new(MockProxy::new()),
            runtime: std::sync::Arc::new(MockRuntime::new()),
            http: std::sync::Arc::new(MockHttpProbe::ok()),
        }
    }

    pub fn bundle(&self) -> crate::services::Services {
        crate::services::Services {
            database: self.database.clone(),
            cache: self.cache.clone(),
            registry: self.registry.clone(),
            proxy: self.proxy.clone(),
            runtime: self.runtime.clone(),
            http: self.http.clone(),
        }
    }
}

impl Default for MockServices {
    fn default() -> Self {
        Self::new()
    }
}
