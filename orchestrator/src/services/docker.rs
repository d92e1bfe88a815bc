//! Container registry and runtime operations via the docker CLI

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::settings::RegistrySettings;
use crate::errors::OrchestratorError;
use crate::models::Color;
use crate::services::{ContainerRegistry, InstanceRuntime, InstanceSpec};

/// Label attached to every instance so colors can be listed later
const COLOR_LABEL: &str = "pazdeploy.color";

/// Port the application listens on inside its container
const CONTAINER_PORT: u16 = 8000;

async fn run_docker(args: &[&str], timeout: Duration) -> Result<String, OrchestratorError> {
    debug!("Running docker {:?}", args);
    let child = Command::new("docker")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| OrchestratorError::DeployError(format!("failed to run docker: {}", e)))?;

    // A hung daemon must not stall the pipeline indefinitely
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| {
            OrchestratorError::DeployError(format!(
                "docker {} timed out after {:?}",
                args.first().unwrap_or(&""),
                timeout
            ))
        })??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OrchestratorError::DeployError(format!(
            "docker {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Registry client backed by `docker login` / `docker pull`
pub struct DockerRegistry {
    settings: RegistrySettings,
    login_timeout: Duration,
    pull_timeout: Duration,
}

impl DockerRegistry {
    pub fn new(settings: RegistrySettings) -> Self {
        let login_timeout = Duration::from_secs(settings.command_timeout_secs);
        let pull_timeout = Duration::from_secs(settings.pull_timeout_secs);
        Self {
            settings,
            login_timeout,
            pull_timeout,
        }
    }
}

#[async_trait]
impl ContainerRegistry for DockerRegistry {
    async fn login(&self) -> Result<(), OrchestratorError> {
        let password = match &self.settings.password {
            Some(p) => p,
            // Anonymous pulls are allowed for public images; auth is then
            // a no-op that always succeeds
            None => {
                debug!("No registry credentials configured, skipping login");
                return Ok(());
            }
        };

        let mut child = Command::new("docker")
            .args([
                "login",
                &self.settings.host,
                "-u",
                &self.settings.username,
                "--password-stdin",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                OrchestratorError::ConnectivityError(format!("failed to run docker login: {}", e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(password.expose_secret().as_bytes())
                .await?;
        }

        let output = tokio::time::timeout(self.login_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                OrchestratorError::ConnectivityError(format!(
                    "docker login to {} timed out after {:?}",
                    self.settings.host, self.login_timeout
                ))
            })??;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::ConnectivityError(format!(
                "registry authentication failed for {}: {}",
                self.settings.host,
                stderr.trim()
            )));
        }

        debug!("Authenticated with registry {}", self.settings.host);
        Ok(())
    }

    async fn pull(&self, image_ref: &str) -> Result<(), OrchestratorError> {
        info!("Pulling image: {}", image_ref);
        run_docker(&["pull", image_ref], self.pull_timeout).await?;
        Ok(())
    }
}

/// Instance runtime backed by `docker run` / `docker ps`
pub struct DockerRuntime {
    command_timeout: Duration,
}

impl DockerRuntime {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }
}

#[async_trait]
impl InstanceRuntime for DockerRuntime {
    async fn launch(&self, spec: &InstanceSpec, image_ref: &str) -> Result<(), OrchestratorError> {
        info!("Launching instance {} ({})", spec.name, spec.color);
        let port_map = format!("{}:{}", spec.port, CONTAINER_PORT);
        let label = format!("{}={}", COLOR_LABEL, spec.color);
        run_docker(
            &[
                "run",
                "-d",
                "--name",
                &spec.name,
                "--restart",
                "unless-stopped",
                "-l",
                &label,
                "-p",
                &port_map,
                image_ref,
            ],
            self.command_timeout,
        )
        .await?;
        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<bool, OrchestratorError> {
        let args = ["inspect", "-f", "{{.State.Running}}", name];
        match run_docker(&args, self.command_timeout).await {
            Ok(out) => Ok(out.trim() == "true"),
            // Unknown container counts as not running, not as a crash
            Err(_) => Ok(false),
        }
    }

    async fn stop(&self, name: &str) -> Result<(), OrchestratorError> {
        debug!("Stopping instance {}", name);
        run_docker(&["stop", name], self.command_timeout).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), OrchestratorError> {
        debug!("Removing instance {}", name);
        run_docker(&["rm", "-f", name], self.command_timeout).await?;
        Ok(())
    }

    async fn list(&self, color: Color) -> Result<Vec<String>, OrchestratorError> {
        let filter = format!("label={}={}", COLOR_LABEL, color);
        let args = ["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"];
        let out = run_docker(&args, self.command_timeout).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}
