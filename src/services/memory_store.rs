use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::store::{EntryPredicate, JobStore, StoreError};

/// In-process job store with Redis-like TTL and list semantics.
///
/// Expiry is lazy and measured on the tokio clock, so tests running with a
/// paused clock can advance past a TTL deterministically.
pub struct InMemoryJobStore {
    state: Mutex<State>,
    pushed: Notify,
    available: AtomicBool,
}

#[derive(Default)]
struct State {
    keys: HashMap<String, (String, Instant)>,
    lists: HashMap<String, VecDeque<String>>,
}

impl State {
    fn live_value(&mut self, key: &str) -> Option<&mut (String, Instant)> {
        let expired = matches!(self.keys.get(key), Some((_, deadline)) if *deadline <= Instant::now());
        if expired {
            self.keys.remove(key);
        }
        self.keys.get_mut(key)
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            pushed: Notify::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every call fails with `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store offline".to_string()))
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_pop(&self, list: &str) -> Option<String> {
        self.lock().lists.get_mut(list).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.lock()
            .keys
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.lock().live_value(key).map(|(value, _)| value.clone()))
    }

    async fn push_right(&self, list: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.lock()
            .lists
            .entry(list.to_string())
            .or_default()
            .push_back(value.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn blocking_pop_left(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        self.check()?;
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push in between is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_pop(list) {
                return Ok(Some(value));
            }

            tokio::select! {
                _ = &mut notified => continue,
                _ = tokio::time::sleep_until(deadline) => return Ok(self.try_pop(list)),
            }
        }
    }

    async fn remove_first_match(
        &self,
        list: &str,
        predicate: EntryPredicate<'_>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.lock();
        let Some(items) = state.lists.get_mut(list) else {
            return Ok(false);
        };
        match items.iter().position(|item| predicate(item)) {
            Some(index) => {
                items.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.lock();
        match state.live_value(key) {
            Some(entry) => {
                entry.1 = Instant::now() + ttl;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_range(&self, list: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(self
            .lock()
            .lists
            .get(list)
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_len(&self, list: &str) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self.lock().lists.get(list).map_or(0, |items| items.len() as u64))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}
