//! Release state: which color is live

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::models::Color;

/// The single queryable record of which color currently serves traffic.
///
/// Written atomically so a crashed deployment can never leave a torn state.
/// Only the deployment controller flips the active color.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseState {
    /// Color currently receiving traffic
    pub active_color: Color,

    /// Tag the active color is running
    pub tag: String,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl ReleaseState {
    pub fn new(active_color: Color, tag: String) -> Self {
        Self {
            active_color,
            tag,
            updated_at: Utc::now(),
        }
    }

    /// Load the release state, or None when no deployment has ever run
    pub async fn load(file: &File) -> Result<Option<Self>, OrchestratorError> {
        if !file.exists().await {
            return Ok(None);
        }
        let state = file.read_json().await?;
        Ok(Some(state))
    }

    /// Persist the release state atomically
    pub async fn store(&self, file: &File) -> Result<(), OrchestratorError> {
        file.write_json_atomic(self).await
    }
}
