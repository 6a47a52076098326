use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;

use super::store::{EntryPredicate, JobStore, StoreError};

/// Redis-backed job store.
///
/// A fresh multiplexed connection is opened per call so a blocking pop never
/// stalls other commands, and a dropped server is retried on the next call.
pub struct RedisJobStore {
    client: redis::Client,
}

impl RedisJobStore {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(StoreError::Redis)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(classify)
    }
}

/// Connection-level failures surface as `Unavailable`; everything else stays a Redis error.
fn classify(err: redis::RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Redis(err)
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl))
            .await
            .map_err(classify)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        conn.get(key).await.map_err(classify)
    }

    async fn push_right(&self, list: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.rpush::<_, _, ()>(list, value).await.map_err(classify)
    }

    async fn blocking_pop_left(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        let popped: Option<(String, String)> = conn
            .blpop(list, timeout.as_secs_f64())
            .await
            .map_err(classify)?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn remove_first_match(
        &self,
        list: &str,
        predicate: EntryPredicate<'_>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let items: Vec<String> = conn.lrange(list, 0, -1).await.map_err(classify)?;

        // LREM by the exact bytes we just read, so the match never depends on
        // re-serializing a record.
        let Some(found) = items.into_iter().find(|item| predicate(item)) else {
            return Ok(false);
        };
        let removed: i64 = conn.lrem(list, 1, &found).await.map_err(classify)?;
        Ok(removed > 0)
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        conn.expire(key, ttl_secs(ttl) as i64)
            .await
            .map_err(classify)
    }

    async fn list_range(&self, list: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        conn.lrange(list, 0, -1).await.map_err(classify)
    }

    async fn list_len(&self, list: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        conn.llen(list).await.map_err(classify)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn set_then_push(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        list: &str,
        item: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        redis::pipe()
            .atomic()
            .set_ex(key, value, ttl_secs(ttl))
            .ignore()
            .rpush(list, item)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(classify)
    }
}
