use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of an analysis job.
///
/// Only the first four variants are ever written to the job store.
/// `NotFound` is reported when the status key is absent or expired, and
/// `Timeout` is a caller-side signal from wait-for-completion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    NotFound,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether this variant may appear as a stored value.
    pub fn is_stored(self) -> bool {
        matches!(
            self,
            JobStatus::Queued | JobStatus::Processing | JobStatus::Completed | JobStatus::Failed
        )
    }
}

/// Metadata that travels with a job but is not forwarded to the analysis API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMetadata {
    pub image_name: String,
    pub version: String,
    pub environment: String,
}

/// Record pushed onto the incoming list by the producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub body: serde_json::Value,
    #[serde(flatten)]
    pub metadata: JobMetadata,
    pub enqueued_at: DateTime<Utc>,
}

/// Record pushed onto the in-progress list when the worker claims a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InProgressEntry {
    pub job_id: Uuid,
    #[serde(flatten)]
    pub metadata: JobMetadata,
    pub started_at: DateTime<Utc>,
}

impl InProgressEntry {
    pub fn claim(job: &QueuedJob) -> Self {
        Self {
            job_id: job.job_id,
            metadata: job.metadata.clone(),
            started_at: Utc::now(),
        }
    }

    /// True when the serialized entry belongs to `job_id`. Unparseable entries never match.
    pub fn matches_raw(raw: &str, job_id: Uuid) -> bool {
        serde_json::from_str::<InProgressEntry>(raw)
            .map(|entry| entry.job_id == job_id)
            .unwrap_or(false)
    }
}

/// Record appended to the completed list on a terminal transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionRecord {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failed_at: Option<DateTime<Utc>>,
}

impl CompletionRecord {
    pub fn completed(job_id: Uuid) -> Self {
        Self {
            job_id,
            status: JobStatus::Completed,
            completed_at: Some(Utc::now()),
            failed_at: None,
        }
    }

    pub fn failed(job_id: Uuid) -> Self {
        Self {
            job_id,
            status: JobStatus::Failed,
            completed_at: None,
            failed_at: Some(Utc::now()),
        }
    }
}

/// Error stored for a failed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Attempt number that failed (1-based). Zero means no attempt was recorded.
    pub attempt: u32,
}

impl JobError {
    pub fn new(message: impl Into<String>, attempt: u32) -> Self {
        Self {
            message: message.into(),
            timestamp: Utc::now(),
            attempt,
        }
    }
}

/// Snapshot returned by the status service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<JobError>,
}

impl JobStatusView {
    pub fn bare(job_id: Uuid, status: JobStatus) -> Self {
        Self {
            job_id,
            status,
            result: None,
            error: None,
        }
    }
}
