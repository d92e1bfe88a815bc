//! Blue/green deployment controller
//!
//! Sole owner of the active/standby color assignment: only this type
//! writes the release-state file or repoints the proxy. The switch is
//! ordered so traffic is never routed to zero healthy instances: old
//! instances keep serving until the proxy swap lands, and drain only
//! starts after it.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::settings::AppSettings;
use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::health::HealthTarget;
use crate::models::Color;
use crate::services::{InstanceSpec, Services};
use crate::storage::release::ReleaseState;

/// Deployment controller
pub struct DeploymentController {
    services: Services,
    app: AppSettings,
    release_file: File,
    drain: Duration,
}

impl DeploymentController {
    pub fn new(
        services: Services,
        app: AppSettings,
        release_file: File,
        drain: Duration,
    ) -> Self {
        Self {
            services,
            app,
            release_file,
            drain,
        }
    }

    /// Full image reference for a tag
    pub fn image_ref(&self, tag: &str) -> String {
        format!("{}:{}", self.app.image, tag)
    }

    /// Instance specs for a color
    pub fn instance_specs(&self, color: Color) -> Vec<InstanceSpec> {
        let base_port = match color {
            Color::Blue => self.app.blue_base_port,
            Color::Green => self.app.green_base_port,
        };
        (0..self.app.instances_per_color)
            .map(|i| InstanceSpec {
                name: format!("pazpaz-{}-{}", color, i),
                color,
                port: base_port + i,
            })
            .collect()
    }

    /// Health targets for a color's instances
    pub fn health_targets(&self, color: Color) -> Vec<HealthTarget> {
        self.instance_specs(color)
            .into_iter()
            .map(|spec| {
                let health_url = format!(
                    "http://{}:{}{}",
                    self.app.health_host, spec.port, self.app.health_path
                );
                HealthTarget { spec, health_url }
            })
            .collect()
    }

    /// Upstream addresses for a color
    fn upstreams(&self, color: Color) -> Vec<String> {
        self.instance_specs(color)
            .iter()
            .map(|spec| format!("{}:{}", self.app.health_host, spec.port))
            .collect()
    }

    /// Determine the live color: the release state is authoritative, the
    /// proxy configuration is the fallback for a first run on an existing
    /// host. A host with neither defaults to blue as live, so the first
    /// orchestrated deployment goes out as green.
    pub async fn live_color(&self) -> Result<Color, OrchestratorError> {
        if let Some(state) = ReleaseState::load(&self.release_file).await? {
            return Ok(state.active_color);
        }
        if let Some(color) = self.services.proxy.active_color().await? {
            return Ok(color);
        }
        Ok(Color::Blue)
    }

    /// Pull the image and launch all instances for a color
    pub async fn launch(
        &self,
        color: Color,
        tag: &str,
    ) -> Result<Vec<InstanceSpec>, OrchestratorError> {
        let image_ref = self.image_ref(tag);
        self.services.registry.pull(&image_ref).await?;

        let specs = self.instance_specs(color);
        info!("Launching {} {} instance(s) of {}", specs.len(), color, image_ref);
        for spec in &specs {
            self.services.runtime.launch(spec, &image_ref).await?;
        }
        Ok(specs)
    }

    /// Atomically repoint traffic at the target color and persist the new
    /// release state
    pub async fn switch_traffic(&self, color: Color, tag: &str) -> Result<(), OrchestratorError> {
        self.services
            .proxy
            .switch_to(color, &self.upstreams(color))
            .await?;
        ReleaseState::new(color, tag.to_string())
            .store(&self.release_file)
            .await?;
        info!("Traffic switched to {}", color);
        Ok(())
    }

    /// Drain delay before old instances may be terminated
    pub fn drain_period(&self) -> Duration {
        self.drain
    }

    /// Whether any instances of a color exist in the runtime
    pub async fn has_instances(&self, color: Color) -> Result<bool, OrchestratorError> {
        Ok(!self.services.runtime.list(color).await?.is_empty())
    }

    /// Stop and remove every instance of a color.
    ///
    /// Used both for post-switch cleanup of the old color and for tearing
    /// down failed new instances; removal failures are logged and skipped
    /// so one stuck container cannot wedge the whole procedure.
    pub async fn teardown(&self, color: Color) -> Result<(), OrchestratorError> {
        let names = self.services.runtime.list(color).await?;
        if names.is_empty() {
            return Ok(());
        }

        info!("Removing {} {} instance(s)", names.len(), color);
        let mut last_err = None;
        for name in &names {
            if let Err(e) = self.services.runtime.stop(name).await {
                warn!("Failed to stop {}: {}", name, e);
            }
            if let Err(e) = self.services.runtime.remove(name).await {
                warn!("Failed to remove {}: {}", name, e);
                last_err = Some(e);
            }
        }

        match last_err {
            None => Ok(()),
            Some(e) => Err(OrchestratorError::DeployError(format!(
                "some {} instances could not be removed: {}",
                color, e
            ))),
        }
    }
}
