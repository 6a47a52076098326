use serde::Deserialize;
use std::time::Duration;

use crate::services::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the job store
    pub redis_url: String,

    /// Bearer token for the OpenRouter-compatible analysis API. Only the worker needs it.
    #[serde(default)]
    pub openrouter_api_key: String,

    #[serde(default = "default_openrouter_base_url")]
    pub openrouter_base_url: String,

    /// Model name injected into every analysis request
    #[serde(default = "default_analysis_model")]
    pub analysis_model: String,

    /// Per-attempt HTTP timeout for the analysis call
    #[serde(default = "default_analysis_timeout_secs")]
    pub analysis_timeout_secs: u64,

    /// Expiry applied to every per-job key
    #[serde(default = "default_task_ttl_secs")]
    pub task_ttl_secs: u64,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Blocking pop timeout of the worker loop
    #[serde(default = "default_pop_timeout_secs")]
    pub pop_timeout_secs: u64,

    /// Polling interval used by wait-for-completion
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Age after which an orphaned in-progress entry is force-failed
    #[serde(default = "default_stale_job_secs")]
    pub stale_job_secs: u64,

    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    /// Deployment label stamped on every enqueued job
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_analysis_model() -> String {
    "gpt-4-vision-preview".to_string()
}

fn default_analysis_timeout_secs() -> u64 {
    60
}

fn default_task_ttl_secs() -> u64 {
    3600
}

fn default_max_concurrent_jobs() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_pop_timeout_secs() -> u64 {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_stale_job_secs() -> u64 {
    900
}

fn default_reaper_interval_secs() -> u64 {
    60
}

fn default_environment() -> String {
    "prod".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

/// Timing knobs shared by the producer, worker loop and status service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueSettings {
    pub ttl: Duration,
    pub pop_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(default_task_ttl_secs()),
            pop_timeout: Duration::from_secs(default_pop_timeout_secs()),
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReaperSettings {
    pub stale_after: Duration,
    pub interval: Duration,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(default_stale_job_secs()),
            interval: Duration::from_secs(default_reaper_interval_secs()),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid("MAX_CONCURRENT_JOBS must be at least 1"));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("MAX_RETRIES must be at least 1"));
        }
        if self.task_ttl_secs == 0 {
            return Err(ConfigError::Invalid("TASK_TTL_SECS must be at least 1"));
        }
        if self.pop_timeout_secs == 0 {
            return Err(ConfigError::Invalid("POP_TIMEOUT_SECS must be at least 1"));
        }
        Ok(())
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            ttl: Duration::from_secs(self.task_ttl_secs),
            pop_timeout: Duration::from_secs(self.pop_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn reaper_settings(&self) -> ReaperSettings {
        ReaperSettings {
            stale_after: Duration::from_secs(self.stale_job_secs),
            interval: Duration::from_secs(self.reaper_interval_secs),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
