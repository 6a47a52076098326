//! Worker pool: the single consumer loop and its bounded set of processors.
//!
//! The loop pops from the incoming list, records the claim on the in-progress
//! list and hands the job to a dispatcher over a channel. The dispatcher takes
//! one limiter permit per job, in dequeue order, and spawns the processor on
//! the pool's task tracker. The loop itself never waits for processing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::config::QueueSettings;
use crate::models::job::{InProgressEntry, QueuedJob};

use super::processor::JobProcessor;
use super::store::{keys, JobStore, StoreError};

/// Ids of jobs claimed by this process that have not reached a terminal state.
#[derive(Debug, Clone, Default)]
pub struct ActiveJobs(Arc<Mutex<HashSet<Uuid>>>);

impl ActiveJobs {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn insert(&self, job_id: Uuid) {
        self.lock().insert(job_id);
        self.publish();
    }

    pub(crate) fn remove(&self, job_id: Uuid) {
        self.lock().remove(&job_id);
        self.publish();
    }

    fn publish(&self) {
        metrics::gauge!("analysis_jobs_in_flight").set(self.len() as f64);
    }

    pub fn contains(&self, job_id: Uuid) -> bool {
        self.lock().contains(&job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    processor: Arc<JobProcessor>,
    limiter: Arc<Semaphore>,
    tasks: TaskTracker,
    active: ActiveJobs,
    settings: QueueSettings,
}

impl WorkerPool {
    /// Build a pool that runs at most `max_concurrent` processors at once.
    pub fn new(
        store: Arc<dyn JobStore>,
        processor: Arc<JobProcessor>,
        max_concurrent: usize,
        settings: QueueSettings,
    ) -> Self {
        Self {
            store,
            processor,
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tasks: TaskTracker::new(),
            active: ActiveJobs::default(),
            settings,
        }
    }

    /// Registry of jobs currently owned by this pool.
    pub fn active_jobs(&self) -> ActiveJobs {
        self.active.clone()
    }

    /// Run the consumer loop on a background task.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Consume the incoming list until `cancel` fires, then wait for every
    /// claimed job to finish.
    ///
    /// Cancellation is only observed between pops, so a job popped from the
    /// store is never dropped on the floor.
    pub async fn run(&self, cancel: CancellationToken) {
        let (tx, rx) = mpsc::unbounded_channel::<QueuedJob>();
        self.tasks.spawn(dispatch(
            rx,
            self.limiter.clone(),
            self.tasks.clone(),
            self.processor.clone(),
            self.active.clone(),
        ));

        tracing::info!(
            max_concurrent = self.limiter.available_permits(),
            "Worker loop started"
        );

        while !cancel.is_cancelled() {
            match self.claim_next().await {
                Ok(Some(job)) => {
                    if tx.send(job).is_err() {
                        tracing::error!("Dispatcher stopped, leaving worker loop");
                        break;
                    }
                }
                Ok(None) => tracing::trace!("No jobs available"),
                Err(StoreError::Serialize(e)) => {
                    tracing::warn!(error = %e, "Dropping undecodable queue record");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error reading job queue, will retry");
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(self.settings.pop_timeout) => {}
                    }
                }
            }
        }

        drop(tx);
        tracing::info!(in_flight = self.active.len(), "Worker loop stopped, draining jobs");
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("Worker drained");
    }

    /// Pop one job and record it on the in-progress list.
    async fn claim_next(&self) -> Result<Option<QueuedJob>, StoreError> {
        let Some(raw) = self
            .store
            .blocking_pop_left(keys::INCOMING_QUEUE, self.settings.pop_timeout)
            .await?
        else {
            return Ok(None);
        };
        let job: QueuedJob = serde_json::from_str(&raw)?;
        self.active.insert(job.job_id);

        let entry = InProgressEntry::claim(&job);
        let recorded = match serde_json::to_string(&entry) {
            Ok(payload) => self.store.push_right(keys::IN_PROGRESS_QUEUE, &payload).await,
            Err(e) => Err(e.into()),
        };
        match recorded {
            Ok(()) => tracing::info!(job_id = %job.job_id, "Moved to in-progress list"),
            // The job is already off the incoming list; process it anyway.
            Err(e) => tracing::error!(
                job_id = %job.job_id,
                error = %e,
                "Failed to record in-progress entry"
            ),
        }
        Ok(Some(job))
    }
}

/// Admit jobs in arrival order, one limiter permit each.
async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    limiter: Arc<Semaphore>,
    tasks: TaskTracker,
    processor: Arc<JobProcessor>,
    active: ActiveJobs,
) {
    while let Some(job) = rx.recv().await {
        let Ok(permit) = limiter.clone().acquire_owned().await else {
            tracing::error!(job_id = %job.job_id, "Limiter closed, job not processed");
            break;
        };
        let processor = processor.clone();
        let active = active.clone();
        tasks.spawn(async move {
            let _permit = permit;
            processor.process(&job).await;
            active.remove(job.job_id);
        });
    }
}
