//! Shared harness for queue flow tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use nutrition_analysis::config::QueueSettings;
use nutrition_analysis::models::job::JobMetadata;
use nutrition_analysis::services::analysis::{AnalysisClient, AnalysisError};
use nutrition_analysis::services::memory_store::InMemoryJobStore;
use nutrition_analysis::services::processor::JobProcessor;
use nutrition_analysis::services::queue::JobQueue;
use nutrition_analysis::services::retry::RetryPolicy;
use nutrition_analysis::services::status::StatusService;
use nutrition_analysis::services::store::{EntryPredicate, JobStore, StoreError};
use nutrition_analysis::services::worker::WorkerPool;

/// One status write observed by [`RecordingStore`].
#[derive(Debug, Clone)]
pub struct StatusWrite {
    pub job_id: String,
    pub status: String,
}

/// In-memory store that logs every status write in order.
#[derive(Default)]
pub struct RecordingStore {
    inner: InMemoryJobStore,
    writes: Mutex<Vec<StatusWrite>>,
}

impl RecordingStore {
    pub fn status_writes(&self) -> Vec<StatusWrite> {
        self.writes.lock().unwrap().clone()
    }

    /// Statuses written for one job, in order.
    pub fn history(&self, job_id: Uuid) -> Vec<String> {
        let id = job_id.to_string();
        self.status_writes()
            .into_iter()
            .filter(|w| w.job_id == id)
            .map(|w| w.status)
            .collect()
    }

    /// Position of the first write of `status` for `job_id` in the global log.
    pub fn position(&self, job_id: Uuid, status: &str) -> Option<usize> {
        let id = job_id.to_string();
        self.status_writes()
            .iter()
            .position(|w| w.job_id == id && w.status == status)
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.inner.set_with_ttl(key, value, ttl).await?;
        if let Some(job_id) = key
            .strip_prefix("task:")
            .and_then(|rest| rest.strip_suffix(":status"))
        {
            self.writes.lock().unwrap().push(StatusWrite {
                job_id: job_id.to_string(),
                status: value.to_string(),
            });
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn push_right(&self, list: &str, value: &str) -> Result<(), StoreError> {
        self.inner.push_right(list, value).await
    }

    async fn blocking_pop_left(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        self.inner.blocking_pop_left(list, timeout).await
    }

    async fn remove_first_match(
        &self,
        list: &str,
        predicate: EntryPredicate<'_>,
    ) -> Result<bool, StoreError> {
        self.inner.remove_first_match(list, predicate).await
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.inner.refresh_ttl(key, ttl).await
    }

    async fn list_range(&self, list: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list_range(list).await
    }

    async fn list_len(&self, list: &str) -> Result<u64, StoreError> {
        self.inner.list_len(list).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

/// Scripted stand-in for the vision model.
///
/// Each call sleeps `delay`, then fails while `failures_left` is non-zero,
/// otherwise returns a small nutrition document.
pub struct FakeAnalysis {
    delay: Duration,
    failures_left: Mutex<u32>,
    calls: Mutex<Vec<Instant>>,
}

impl FakeAnalysis {
    pub fn new(delay: Duration, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            delay,
            failures_left: Mutex::new(failures),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisClient for FakeAnalysis {
    async fn analyze(&self, _request: &serde_json::Value) -> Result<serde_json::Value, AnalysisError> {
        self.calls.lock().unwrap().push(Instant::now());
        tokio::time::sleep(self.delay).await;
        let fail = {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                true
            } else {
                false
            }
        };
        if fail {
            Err(AnalysisError::Status {
                status: 503,
                body: "model overloaded".to_string(),
            })
        } else {
            Ok(serde_json::json!({"meal_name": "Test Meal", "calories": 500}))
        }
    }
}

/// A running worker over a recording in-memory store.
pub struct Harness {
    pub store: Arc<RecordingStore>,
    pub queue: JobQueue,
    pub status: StatusService,
    pub pool: Arc<WorkerPool>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Harness {
    /// Build the queue without starting the worker.
    pub fn new(analysis: Arc<FakeAnalysis>, max_concurrent: usize, settings: QueueSettings) -> Self {
        let store = Arc::new(RecordingStore::default());
        let processor = Arc::new(JobProcessor::new(
            store.clone(),
            analysis,
            RetryPolicy::default(),
            settings.ttl,
            "gpt-4-vision-preview",
        ));
        Self {
            queue: JobQueue::new(store.clone(), settings),
            status: StatusService::new(store.clone(), settings),
            pool: Arc::new(WorkerPool::new(store.clone(), processor, max_concurrent, settings)),
            store,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn start(&mut self) {
        self.handle = Some(self.pool.clone().spawn(self.cancel.clone()));
    }

    /// Cancel the loop and wait for in-flight jobs to drain.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await.expect("worker loop panicked");
        }
    }

    pub async fn enqueue(&self, n: u32) -> Uuid {
        self.queue
            .enqueue(
                serde_json::json!({
                    "messages": [{"role": "user", "content": format!("meal {n}")}],
                    "email": "user@example.com",
                }),
                metadata(n),
            )
            .await
            .expect("enqueue failed")
    }
}

pub fn metadata(n: u32) -> JobMetadata {
    JobMetadata {
        image_name: format!("meal-{n}.jpg"),
        version: "2.3.1".to_string(),
        environment: "test".to_string(),
    }
}
