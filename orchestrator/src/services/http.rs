//! HTTP health endpoint probe

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::errors::OrchestratorError;
use crate::services::HttpProbe;

/// reqwest-backed [`HttpProbe`] with a hard per-request timeout
pub struct ReqwestProbe {
    client: Client,
}

impl ReqwestProbe {
    pub fn new(timeout: Duration) -> Result<Self, OrchestratorError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn probe(&self, url: &str) -> Result<u16, OrchestratorError> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        Ok(response.status().as_u16())
    }
}
