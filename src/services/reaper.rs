//! Stale in-progress reaper.
//!
//! A worker that dies mid-job leaves its in-progress entry behind and the
//! job's status stuck at `processing`. The reaper periodically fails such
//! jobs so clients see a terminal `failed` instead of the status silently
//! expiring. Jobs are never re-queued; transitions stay one-directional.
//!
//! An entry is reaped only when it is older than the stale threshold and its
//! job is not owned by a live processor in this process.

use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::config::ReaperSettings;
use crate::models::job::{CompletionRecord, InProgressEntry, JobError, JobStatus};

use super::store::{keys, JobStore, StoreError};
use super::worker::ActiveJobs;

pub const ABANDONED_MESSAGE: &str = "job abandoned by a previous worker";

pub struct Reaper {
    store: Arc<dyn JobStore>,
    active: ActiveJobs,
    settings: ReaperSettings,
    ttl: Duration,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn JobStore>,
        active: ActiveJobs,
        settings: ReaperSettings,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            active,
            settings,
            ttl,
        }
    }

    /// Run sweeps on an interval until cancelled.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.settings.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Reaper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            tracing::warn!(error = %e, "Reaper sweep failed");
                        }
                    }
                }
            }
        })
    }

    /// One pass over the in-progress list. Returns how many jobs were failed.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let entries = self.store.list_range(keys::IN_PROGRESS_QUEUE).await?;
        let stale_after = chrono::Duration::from_std(self.settings.stale_after)
            .unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let mut reaped = 0;

        for raw in entries {
            let entry: InProgressEntry = match serde_json::from_str(&raw) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Removing undecodable in-progress entry");
                    let target = raw.clone();
                    self.store
                        .remove_first_match(keys::IN_PROGRESS_QUEUE, &move |item: &str| item == target)
                        .await?;
                    continue;
                }
            };

            if self.active.contains(entry.job_id) || now - entry.started_at < stale_after {
                continue;
            }

            self.fail_abandoned(&entry).await?;
            reaped += 1;
        }

        if reaped > 0 {
            metrics::counter!("analysis_jobs_reaped_total").increment(reaped as u64);
            tracing::warn!(reaped, "Failed abandoned jobs");
        }
        Ok(reaped)
    }

    async fn fail_abandoned(&self, entry: &InProgressEntry) -> Result<(), StoreError> {
        let job_id = entry.job_id;
        let status = self
            .store
            .get(&keys::status(job_id))
            .await?
            .and_then(|raw| JobStatus::from_str(&raw).ok());

        match status {
            // Status TTL already lapsed; nothing left to report on.
            None => {}
            Some(status) if status.is_terminal() => {}
            Some(_) => {
                let error = JobError::new(ABANDONED_MESSAGE, 0);
                self.store
                    .set_with_ttl(&keys::error(job_id), &serde_json::to_string(&error)?, self.ttl)
                    .await?;
                self.store
                    .set_with_ttl(&keys::status(job_id), &JobStatus::Failed.to_string(), self.ttl)
                    .await?;
                let record = serde_json::to_string(&CompletionRecord::failed(job_id))?;
                self.store.push_right(keys::COMPLETED_QUEUE, &record).await?;
                tracing::warn!(
                    job_id = %job_id,
                    started_at = %entry.started_at,
                    "Force-failed abandoned job"
                );
            }
        }

        self.store
            .remove_first_match(keys::IN_PROGRESS_QUEUE, &move |raw: &str| {
                InProgressEntry::matches_raw(raw, job_id)
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{JobMetadata, QueuedJob};
    use crate::services::memory_store::InMemoryJobStore;
    use uuid::Uuid;

    fn entry(age: chrono::Duration) -> InProgressEntry {
        InProgressEntry {
            job_id: Uuid::new_v4(),
            metadata: JobMetadata {
                image_name: "dinner.jpg".to_string(),
                version: "1".to_string(),
                environment: "test".to_string(),
            },
            started_at: Utc::now() - age,
        }
    }

    async fn seed(store: &InMemoryJobStore, entry: &InProgressEntry, status: &str) {
        store
            .set_with_ttl(&keys::status(entry.job_id), status, Duration::from_secs(3600))
            .await
            .unwrap();
        store
            .push_right(keys::IN_PROGRESS_QUEUE, &serde_json::to_string(entry).unwrap())
            .await
            .unwrap();
    }

    fn reaper(store: Arc<InMemoryJobStore>, active: ActiveJobs) -> Reaper {
        Reaper::new(
            store,
            active,
            ReaperSettings {
                stale_after: Duration::from_secs(900),
                interval: Duration::from_secs(60),
            },
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_stale_orphan_is_failed() {
        let store = Arc::new(InMemoryJobStore::new());
        let stale = entry(chrono::Duration::minutes(30));
        seed(&store, &stale, "processing").await;

        let reaped = reaper(store.clone(), ActiveJobs::default()).sweep().await.unwrap();

        assert_eq!(reaped, 1);
        assert_eq!(
            store.get(&keys::status(stale.job_id)).await.unwrap().as_deref(),
            Some("failed")
        );
        let error: JobError = serde_json::from_str(
            &store.get(&keys::error(stale.job_id)).await.unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(error.message, ABANDONED_MESSAGE);
        assert_eq!(store.list_len(keys::IN_PROGRESS_QUEUE).await.unwrap(), 0);
        assert_eq!(store.list_len(keys::COMPLETED_QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fresh_entries_left_alone() {
        let store = Arc::new(InMemoryJobStore::new());
        let fresh = entry(chrono::Duration::seconds(30));
        seed(&store, &fresh, "processing").await;

        let reaped = reaper(store.clone(), ActiveJobs::default()).sweep().await.unwrap();

        assert_eq!(reaped, 0);
        assert_eq!(store.list_len(keys::IN_PROGRESS_QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_jobs_owned_by_live_processor_skipped() {
        let store = Arc::new(InMemoryJobStore::new());
        let stale = entry(chrono::Duration::hours(2));
        seed(&store, &stale, "processing").await;
        let active = ActiveJobs::default();
        active.insert(stale.job_id);

        let reaped = reaper(store.clone(), active).sweep().await.unwrap();

        assert_eq!(reaped, 0);
        assert_eq!(
            store.get(&keys::status(stale.job_id)).await.unwrap().as_deref(),
            Some("processing")
        );
    }

    #[tokio::test]
    async fn test_terminal_status_not_overwritten() {
        let store = Arc::new(InMemoryJobStore::new());
        let stale = entry(chrono::Duration::hours(2));
        seed(&store, &stale, "completed").await;

        reaper(store.clone(), ActiveJobs::default()).sweep().await.unwrap();

        assert_eq!(
            store.get(&keys::status(stale.job_id)).await.unwrap().as_deref(),
            Some("completed")
        );
        assert_eq!(store.get(&keys::error(stale.job_id)).await.unwrap(), None);
        assert_eq!(store.list_len(keys::IN_PROGRESS_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_entries_removed() {
        let store = Arc::new(InMemoryJobStore::new());
        store.push_right(keys::IN_PROGRESS_QUEUE, "not-json").await.unwrap();
        let job = QueuedJob {
            job_id: Uuid::new_v4(),
            body: serde_json::json!({}),
            metadata: entry(chrono::Duration::zero()).metadata,
            enqueued_at: Utc::now(),
        };
        seed(&store, &InProgressEntry::claim(&job), "processing").await;

        let reaped = reaper(store.clone(), ActiveJobs::default()).sweep().await.unwrap();

        assert_eq!(reaped, 0);
        assert_eq!(store.list_len(keys::IN_PROGRESS_QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_claimed_but_never_started_goes_queued_to_failed() {
        let store = Arc::new(InMemoryJobStore::new());
        let stranded = entry(chrono::Duration::hours(1));
        seed(&store, &stranded, "queued").await;

        let reaped = reaper(store.clone(), ActiveJobs::default()).sweep().await.unwrap();

        assert_eq!(reaped, 1);
        assert_eq!(
            store.get(&keys::status(stranded.job_id)).await.unwrap().as_deref(),
            Some("failed")
        );
        let error: JobError = serde_json::from_str(
            &store.get(&keys::error(stranded.job_id)).await.unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(error.attempt, 0);
    }
}
