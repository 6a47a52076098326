use garde::Validate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::job::JobStatus;

/// Metadata read out of a submitted analysis request body.
#[derive(Debug, Deserialize, Validate)]
pub struct AnalyzeMetadata {
    #[garde(length(min = 1, max = 200))]
    #[serde(default = "placeholder")]
    pub image_name: String,

    #[garde(length(min = 1, max = 200))]
    #[serde(default = "placeholder")]
    pub version: String,
}

fn placeholder() -> String {
    "-".to_string()
}

impl AnalyzeMetadata {
    /// Pull metadata out of an arbitrary request body. Non-string values fall back to "-".
    pub fn from_body(body: &serde_json::Value) -> Self {
        let field = |name: &str| {
            body.get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(placeholder)
        };
        Self {
            image_name: field("image_name"),
            version: field("version"),
        }
    }
}

/// Response after submitting an image for analysis.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub job_id: uuid::Uuid,
    pub status: JobStatus,
    pub message: String,
}

/// Longest a caller may block on the wait endpoint.
pub const MAX_WAIT_SECS: u64 = 300;

/// Query string for the blocking wait endpoint.
#[derive(Debug, Deserialize, Validate)]
pub struct WaitQuery {
    #[garde(range(min = 1))]
    #[serde(default = "default_wait_secs")]
    pub timeout_secs: u64,
}

fn default_wait_secs() -> u64 {
    30
}

impl WaitQuery {
    /// Requested wait, capped at [`MAX_WAIT_SECS`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.min(MAX_WAIT_SECS))
    }
}
