//! Retry policy with capped exponential backoff for index writes.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Attempts, backoff bounds, and growth factor for one retried call site.
///
/// The wait before retry `n` (1-based) is `multiplier * 2^(n-1)` clamped to `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Lower bound on any wait.
    pub min_delay: Duration,
    /// Upper bound on any wait.
    pub max_delay: Duration,
    /// Base of the exponential term.
    pub multiplier: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
            multiplier: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy that fails immediately on the first error.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait applied after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let raw = self.multiplier.saturating_mul(1_u32 << exponent);
        raw.clamp(self.min_delay, self.max_delay.max(self.min_delay))
    }

    /// Run `operation` until it succeeds or attempts are exhausted, returning the last error.
    pub async fn run<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) if attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Attempt failed; retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(max_attempts, error = %error, "All attempts failed");
                    return Err(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            min_delay: Duration::from_millis(4),
            max_delay: Duration::from_millis(10),
            multiplier: Duration::from_millis(1),
        }
    }

    #[test]
    fn default_delays_start_at_floor_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn delays_never_decrease() {
        let policy = RetryPolicy {
            multiplier: Duration::from_secs(3),
            ..RetryPolicy::default()
        };
        let delays: Vec<_> = (1..8).map(|attempt| policy.delay_for(attempt)).collect();
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(delays.iter().all(|delay| *delay <= policy.max_delay));
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let result = fast_policy().run(|| async { Ok::<_, String>(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = fast_policy()
            .run(move || {
                let counter = counter.clone();
                async move {
                    let seen = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if seen < 3 {
                        Err(format!("failure {seen}"))
                    } else {
                        Ok(seen)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_after_exactly_three_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), String> = fast_policy()
            .run(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("always".to_string())
                }
            })
            .await;
        assert_eq!(result, Err("always".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn no_retry_policy_calls_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let _: Result<(), String> = RetryPolicy::no_retry()
            .run(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("nope".to_string())
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
