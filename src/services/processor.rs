use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use crate::models::job::{CompletionRecord, InProgressEntry, JobError, JobStatus, QueuedJob};

use super::analysis::{strip_internal_fields, AnalysisClient, AnalysisError};
use super::retry::{RetryFailure, RetryPolicy};
use super::store::{keys, JobStore, StoreError};

/// Terminal result of processing one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { attempts: u32 },
    Failed { attempt: u32 },
}

#[derive(Debug, thiserror::Error)]
enum ProcessError {
    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{error}")]
    Analysis { error: AnalysisError, attempt: u32 },
}

impl ProcessError {
    fn attempt(&self) -> u32 {
        match self {
            ProcessError::Store(_) => 0,
            ProcessError::Analysis { attempt, .. } => *attempt,
        }
    }
}

/// Runs a single claimed job to a terminal state.
pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    analysis: Arc<dyn AnalysisClient>,
    retry: RetryPolicy,
    ttl: Duration,
    model: String,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        analysis: Arc<dyn AnalysisClient>,
        retry: RetryPolicy,
        ttl: Duration,
        model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            analysis,
            retry,
            ttl,
            model: model.into(),
        }
    }

    /// Process a claimed job: mark it processing, call the analysis API with
    /// retries, record the result or error, and drop it from the in-progress list.
    ///
    /// Failures are recorded in the store rather than returned.
    pub async fn process(&self, job: &QueuedJob) -> JobOutcome {
        let span = tracing::info_span!("analysis_job", job_id = %job.job_id);
        self.process_job(job).instrument(span).await
    }

    async fn process_job(&self, job: &QueuedJob) -> JobOutcome {
        let job_id = job.job_id;
        let start = std::time::Instant::now();
        tracing::info!(
            job_id = %job_id,
            image_name = %job.metadata.image_name,
            "Starting analysis"
        );

        let outcome = match self.run(job).await {
            Ok((result, attempts)) => match self.record_success(job_id, &result).await {
                Ok(()) => {
                    tracing::info!(job_id = %job_id, attempts, "Job completed");
                    JobOutcome::Completed { attempts }
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to persist result");
                    let error = JobError::new(format!("failed to persist result: {e}"), attempts);
                    self.record_failure(job_id, error).await;
                    JobOutcome::Failed { attempt: attempts }
                }
            },
            Err(e) => {
                let attempt = e.attempt();
                tracing::error!(job_id = %job_id, attempt, error = %e, "Job failed");
                self.record_failure(job_id, JobError::new(e.to_string(), attempt))
                    .await;
                JobOutcome::Failed { attempt }
            }
        };

        let record = match outcome {
            JobOutcome::Completed { .. } => CompletionRecord::completed(job_id),
            JobOutcome::Failed { .. } => CompletionRecord::failed(job_id),
        };
        if let Err(e) = self.push_completion(record).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to push completion record");
        }

        self.release(job_id).await;

        metrics::histogram!("analysis_processing_seconds").record(start.elapsed().as_secs_f64());
        match outcome {
            JobOutcome::Completed { .. } => {
                metrics::counter!("analysis_jobs_completed_total").increment(1)
            }
            JobOutcome::Failed { .. } => metrics::counter!("analysis_jobs_failed_total").increment(1),
        }
        outcome
    }

    async fn run(&self, job: &QueuedJob) -> Result<(serde_json::Value, u32), ProcessError> {
        self.set_status(job.job_id, JobStatus::Processing).await?;

        let request = strip_internal_fields(&job.body, &self.model);
        let mut last_attempt = 0;
        let result = self
            .retry
            .run(
                |attempt| {
                    last_attempt = attempt;
                    tracing::debug!(job_id = %job.job_id, attempt, "Calling analysis API");
                    self.analysis.analyze(&request)
                },
                AnalysisError::is_retryable,
            )
            .await
            .map_err(|RetryFailure { error, attempt }| ProcessError::Analysis { error, attempt })?;

        Ok((result, last_attempt))
    }

    /// Result is written before the status flips, so a `completed` status always has a result.
    ///
    /// Once this returns `Ok` the job is terminal; later bookkeeping failures must not touch its status.
    async fn record_success(&self, job_id: Uuid, result: &serde_json::Value) -> Result<(), StoreError> {
        let payload = serde_json::to_string(result)?;
        self.store
            .set_with_ttl(&keys::result(job_id), &payload, self.ttl)
            .await?;
        self.set_status(job_id, JobStatus::Completed).await
    }

    async fn record_failure(&self, job_id: Uuid, error: JobError) {
        let write = async {
            let payload = serde_json::to_string(&error)?;
            self.store
                .set_with_ttl(&keys::error(job_id), &payload, self.ttl)
                .await?;
            self.set_status(job_id, JobStatus::Failed).await?;
            Ok::<(), StoreError>(())
        };
        if let Err(e) = write.await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record job failure");
        }
    }

    async fn release(&self, job_id: Uuid) {
        let matches = move |raw: &str| InProgressEntry::matches_raw(raw, job_id);
        match self
            .store
            .remove_first_match(keys::IN_PROGRESS_QUEUE, &matches)
            .await
        {
            Ok(true) => tracing::debug!(job_id = %job_id, "Removed from in-progress list"),
            Ok(false) => tracing::warn!(job_id = %job_id, "Job missing from in-progress list"),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to remove from in-progress list")
            }
        }
    }

    async fn set_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        self.store
            .set_with_ttl(&keys::status(job_id), &status.to_string(), self.ttl)
            .await
    }

    async fn push_completion(&self, record: CompletionRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&record)?;
        self.store.push_right(keys::COMPLETED_QUEUE, &payload).await
    }
}
