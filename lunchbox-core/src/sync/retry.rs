//! Reusable retry policy for remote-store calls.
//!
//! One policy object parameterized by attempt bound and base delay; only
//! failures classified as connection errors are retried. Delays grow
//! exponentially (base x 2^attempt) with a small random jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use crate::store::StoreError;

/// Upper bound on the random jitter added to each backoff delay.
const JITTER_MS: u64 = 50;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff delay after the given 1-based failed attempt, without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Runs `op`, retrying connection-class failures up to the attempt
    /// bound. Non-connection failures propagate immediately.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_connection() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt) + jitter();
                    tracing::warn!(
                        %label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after connection error"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::rng().random_range(0..JITTER_MS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_success_needs_one_attempt() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result = policy
            .run("ok", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, StoreError>(7)
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_errors_retried_with_increasing_delays() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        let attempts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let log = attempts.clone();
        let result = policy
            .run("flaky", move || {
                let log = log.clone();
                async move {
                    let mut log = log.lock().unwrap();
                    log.push(Instant::now());
                    if log.len() < 3 {
                        Err(StoreError::Connection("unavailable".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 3);

        // Delays must be strictly increasing: ~500ms then ~1000ms.
        let gap1 = attempts[1] - attempts[0];
        let gap2 = attempts[2] - attempts[1];
        assert!(gap1 >= Duration::from_millis(500));
        assert!(gap2 >= Duration::from_millis(1000));
        assert!(gap2 > gap1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_bound() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .run("down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Connection("still down".into()))
            })
            .await;
        assert!(result.unwrap_err().is_connection());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_connection_errors_not_retried() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .run("denied", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Permission("rules".into()))
            })
            .await;
        assert!(matches!(result.unwrap_err(), StoreError::Permission(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_millis(200));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }
}
