//! Job store abstraction.
//!
//! The queue needs a small set of primitives: TTL'd string keys and FIFO
//! lists with a blocking left pop. Redis provides them natively; the
//! in-memory store mirrors the same semantics for tests and local runs.

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Key and list naming shared by the producer, worker and status service.
pub mod keys {
    use uuid::Uuid;

    pub const INCOMING_QUEUE: &str = "image_processing_queue";
    pub const IN_PROGRESS_QUEUE: &str = "image_processing_in_progress";
    pub const COMPLETED_QUEUE: &str = "image_processing_completed";

    pub fn status(job_id: Uuid) -> String {
        format!("task:{job_id}:status")
    }

    pub fn result(job_id: Uuid) -> String {
        format!("task:{job_id}:result")
    }

    pub fn error(job_id: Uuid) -> String {
        format!("task:{job_id}:error")
    }
}

/// Predicate over raw list entries, used by [`JobStore::remove_first_match`].
pub type EntryPredicate<'a> = &'a (dyn Fn(&str) -> bool + Send + Sync);

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Set `key` to `value`, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Read a key. Expired keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Append to the tail of a list.
    async fn push_right(&self, list: &str, value: &str) -> Result<(), StoreError>;

    /// Pop from the head of a list, waiting up to `timeout` for an element.
    async fn blocking_pop_left(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError>;

    /// Remove the first element matching `predicate`. Returns whether one was removed.
    async fn remove_first_match(
        &self,
        list: &str,
        predicate: EntryPredicate<'_>,
    ) -> Result<bool, StoreError>;

    /// Reset the expiry of an existing key. Returns false when the key is absent.
    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Snapshot of a whole list, head first.
    async fn list_range(&self, list: &str) -> Result<Vec<String>, StoreError>;

    async fn list_len(&self, list: &str) -> Result<u64, StoreError>;

    /// Connectivity check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Set a TTL'd key and then push onto a list.
    ///
    /// The key is written first so a failure between the two leaves, at worst,
    /// a status with no queued work. Backends with transactions override this
    /// to apply both writes atomically.
    async fn set_then_push(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        list: &str,
        item: &str,
    ) -> Result<(), StoreError> {
        self.set_with_ttl(key, value, ttl).await?;
        self.push_right(list, item).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Job store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt value stored for job {job_id}: {detail}")]
    Corrupt { job_id: Uuid, detail: String },
}
