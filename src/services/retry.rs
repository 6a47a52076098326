use std::future::Future;
use std::time::Duration;

/// Exponential backoff retry policy.
///
/// With the defaults (3 attempts, 1s base, x2) a call is tried up to three
/// times, sleeping 1s after the first failure and 2s after the second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Final error of a retried operation, with the attempt number that produced it.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempt: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: 2,
        }
    }

    /// Delay slept after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(
        &self,
        mut op: F,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.max_attempts && is_retryable(&error) => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Attempt failed, backing off"
                    );
                    metrics::counter!("analysis_attempts_retried_total").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(RetryFailure { error, attempt }),
            }
        }
    }
}
