//! Reverse proxy upstream management
//!
//! The proxy reads its upstream pool from a single include file. Switching
//! traffic is an atomic rewrite of that file followed by a reload; the old
//! pool keeps serving until the reload lands, so there is never a window
//! with zero healthy upstreams.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::settings::ProxySettings;
use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::models::Color;
use crate::services::ReverseProxy;

const COLOR_MARKER: &str = "# pazdeploy color: ";

/// Nginx-style [`ReverseProxy`] implementation
pub struct NginxProxy {
    conf: File,
    reload_command: Vec<String>,
    reload_timeout: Duration,
}

impl NginxProxy {
    pub fn new(settings: &ProxySettings) -> Self {
        Self {
            conf: File::new(&settings.upstream_conf),
            reload_command: settings.reload_command.clone(),
            reload_timeout: Duration::from_secs(settings.reload_timeout_secs),
        }
    }

    fn render(color: Color, upstreams: &[String]) -> String {
        let mut out = String::new();
        out.push_str(COLOR_MARKER);
        out.push_str(color.as_str());
        out.push('\n');
        out.push_str("upstream pazpaz_backend {\n");
        for addr in upstreams {
            out.push_str(&format!("    server {};\n", addr));
        }
        out.push_str("}\n");
        out
    }

    async fn reload(&self) -> Result<(), OrchestratorError> {
        let (program, args) = match self.reload_command.split_first() {
            Some(split) => split,
            None => {
                return Err(OrchestratorError::ConfigError(
                    "proxy reload command is empty".to_string(),
                ))
            }
        };

        debug!("Reloading proxy: {} {:?}", program, args);
        // The old pool serves until the reload lands; a hung reload must
        // surface as a failure rather than stall the switch forever
        let status = tokio::time::timeout(
            self.reload_timeout,
            Command::new(program).args(args).status(),
        )
        .await
        .map_err(|_| {
            OrchestratorError::DeployError(format!(
                "proxy reload timed out after {:?}",
                self.reload_timeout
            ))
        })?
        .map_err(|e| {
            OrchestratorError::DeployError(format!("failed to run proxy reload: {}", e))
        })?;

        if !status.success() {
            return Err(OrchestratorError::DeployError(
                "proxy reload command failed".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ReverseProxy for NginxProxy {
    async fn active_color(&self) -> Result<Option<Color>, OrchestratorError> {
        if !self.conf.exists().await {
            return Ok(None);
        }
        let contents = self.conf.read_string().await?;
        for line in contents.lines() {
            if let Some(color) = line.strip_prefix(COLOR_MARKER) {
                return match color.trim() {
                    "blue" => Ok(Some(Color::Blue)),
                    "green" => Ok(Some(Color::Green)),
                    other => Err(OrchestratorError::ConfigError(format!(
                        "unrecognized color in upstream conf: {}",
                        other
                    ))),
                };
            }
        }
        Ok(None)
    }

    async fn switch_to(&self, color: Color, upstreams: &[String]) -> Result<(), OrchestratorError> {
        if upstreams.is_empty() {
            return Err(OrchestratorError::DeployError(
                "refusing to switch traffic to an empty upstream pool".to_string(),
            ));
        }

        info!("Switching proxy upstream to {} ({} instances)", color, upstreams.len());
        let rendered = Self::render(color, upstreams);
        self.conf.write_atomic(rendered.as_bytes()).await?;
        self.reload().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reload_timeout_bounds_hung_command() {
        let conf = std::env::temp_dir().join(format!(
            "pazdeploy-proxytest-{}.conf",
            uuid::Uuid::new_v4().simple()
        ));
        let proxy = NginxProxy::new(&ProxySettings {
            upstream_conf: conf.clone(),
            reload_command: vec!["sleep".to_string(), "5".to_string()],
            reload_timeout_secs: 0,
        });

        let err = proxy
            .switch_to(Color::Blue, &["127.0.0.1:8010".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"), "{}", err);
        std::fs::remove_file(&conf).ok();
    }

    #[test]
    fn test_render_upstream_block() {
        let rendered = NginxProxy::render(
            Color::Green,
            &["127.0.0.1:8020".to_string(), "127.0.0.1:8021".to_string()],
        );
        assert!(rendered.starts_with("# pazdeploy color: green\n"));
        assert!(rendered.contains("server 127.0.0.1:8020;"));
        assert!(rendered.contains("server 127.0.0.1:8021;"));
        assert!(rendered.trim_end().ends_with('}'));
    }
}
