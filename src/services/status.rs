use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::QueueSettings;
use crate::models::job::{JobError, JobStatus, JobStatusView};

use super::store::{keys, JobStore, StoreError};

/// Read-only view over job state, used by clients polling for results.
pub struct StatusService {
    store: Arc<dyn JobStore>,
    settings: QueueSettings,
}

impl StatusService {
    pub fn new(store: Arc<dyn JobStore>, settings: QueueSettings) -> Self {
        Self { store, settings }
    }

    /// Current status of a job, with its result or error once terminal.
    ///
    /// A missing status key reads as `not_found`. Reading a `processing` job
    /// refreshes its status TTL so a long analysis does not expire while polled.
    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatusView, StoreError> {
        let Some(raw) = self.store.get(&keys::status(job_id)).await? else {
            tracing::debug!(job_id = %job_id, "Status key absent");
            return Ok(JobStatusView::bare(job_id, JobStatus::NotFound));
        };

        let status = JobStatus::from_str(&raw)
            .ok()
            .filter(|s| s.is_stored())
            .ok_or_else(|| StoreError::Corrupt {
                job_id,
                detail: format!("unknown status {raw:?}"),
            })?;

        let mut view = JobStatusView::bare(job_id, status);
        match status {
            JobStatus::Processing => {
                tracing::debug!(job_id = %job_id, "Job still processing, refreshing TTL");
                self.store
                    .refresh_ttl(&keys::status(job_id), self.settings.ttl)
                    .await?;
            }
            JobStatus::Completed => {
                view.result = self.read_json(job_id, &keys::result(job_id)).await?;
            }
            JobStatus::Failed => {
                view.error = self.read_json::<JobError>(job_id, &keys::error(job_id)).await?;
            }
            _ => {}
        }
        Ok(view)
    }

    /// Poll [`get_status`](Self::get_status) until the job is terminal or
    /// `timeout` elapses.
    ///
    /// On deadline the returned view has status `timeout`; nothing is written
    /// back to the store.
    pub async fn wait_for_completion(
        &self,
        job_id: Uuid,
        timeout: Duration,
    ) -> Result<JobStatusView, StoreError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let view = self.get_status(job_id).await?;
            if view.status.is_terminal() {
                return Ok(view);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            let nap = self.settings.poll_interval.min(deadline - now);
            tokio::time::sleep(nap).await;
        }

        tracing::info!(job_id = %job_id, timeout_secs = timeout.as_secs(), "Gave up waiting for job");
        Ok(JobStatusView {
            job_id,
            status: JobStatus::Timeout,
            result: None,
            error: Some(JobError::new("Job processing timed out", 0)),
        })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        job_id: Uuid,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.store.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    job_id,
                    detail: e.to_string(),
                }),
            None => Ok(None),
        }
    }
}
