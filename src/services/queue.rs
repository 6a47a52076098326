use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::QueueSettings;
use crate::models::job::{JobMetadata, JobStatus, QueuedJob};

use super::store::{keys, JobStore, StoreError};

/// Producer side of the analysis queue.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    settings: QueueSettings,
}

/// Number of entries on each work list.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct QueueDepth {
    pub incoming: u64,
    pub in_progress: u64,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, settings: QueueSettings) -> Self {
        Self { store, settings }
    }

    /// Enqueue an analysis job and return its id.
    ///
    /// The `queued` status is written before the record is pushed, so a store
    /// failure in between can only leave an orphaned status, never unowned work.
    pub async fn enqueue(
        &self,
        body: serde_json::Value,
        metadata: JobMetadata,
    ) -> Result<Uuid, StoreError> {
        let job = QueuedJob {
            job_id: Uuid::new_v4(),
            body,
            metadata,
            enqueued_at: Utc::now(),
        };
        let payload = serde_json::to_string(&job).map_err(StoreError::Serialize)?;

        self.store
            .set_then_push(
                &keys::status(job.job_id),
                &JobStatus::Queued.to_string(),
                self.settings.ttl,
                keys::INCOMING_QUEUE,
                &payload,
            )
            .await?;

        metrics::counter!("analysis_jobs_enqueued_total").increment(1);
        tracing::info!(
            job_id = %job.job_id,
            image_name = %job.metadata.image_name,
            version = %job.metadata.version,
            environment = %job.metadata.environment,
            "Job enqueued"
        );
        Ok(job.job_id)
    }

    /// Current depth of the incoming and in-progress lists.
    pub async fn queue_depth(&self) -> Result<QueueDepth, StoreError> {
        let incoming = self.store.list_len(keys::INCOMING_QUEUE).await?;
        let in_progress = self.store.list_len(keys::IN_PROGRESS_QUEUE).await?;
        metrics::gauge!("analysis_queue_depth").set(incoming as f64);
        Ok(QueueDepth {
            incoming,
            in_progress,
        })
    }

    /// Check store connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }
}
