//! Fixed-delay retry helper
//!
//! The portal flows retry with a constant delay and a hard attempt budget
//! (5×2 s for request creation, 3×10 s for downloads). The delay is applied
//! only before a retry, never after the final attempt, and every attempt
//! starts from scratch (a fresh challenge, no shared state).

use std::future::Future;
use std::time::Duration;

/// A bounded fixed-delay retry policy
#[derive(Clone, Copy, Debug)]
pub struct FixedRetry {
    /// Total number of attempts, including the first
    pub attempts: u32,
    /// Fixed wait applied before each retry
    pub delay: Duration,
}

/// Run `operation` up to `policy.attempts` times, sleeping `policy.delay`
/// before each retry.
///
/// Returns the first success, or the last error once the budget is spent.
/// A zero-attempt policy is treated as a single attempt so there is always
/// an outcome to return.
pub async fn with_fixed_retry<F, Fut, T, E>(policy: FixedRetry, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        if attempt > 1 {
            tokio::time::sleep(policy.delay).await;
        }
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    error = %e,
                    attempt,
                    attempts,
                    delay_ms = policy.delay.as_millis(),
                    "attempt failed, retrying"
                );
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, attempts, "all attempts exhausted");
                return Err(e);
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn success_on_first_attempt_runs_once() {
        let policy = FixedRetry {
            attempts: 5,
            delay: Duration::from_millis(1),
        };
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_fixed_retry(policy, |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let policy = FixedRetry {
            attempts: 5,
            delay: Duration::from_millis(1),
        };
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_fixed_retry(policy, |_| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_budget_and_returns_last_error() {
        let policy = FixedRetry {
            attempts: 3,
            delay: Duration::from_millis(1),
        };
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_fixed_retry(policy, |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("still failing")
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), "still failing");
        assert_eq!(counter.load(Ordering::SeqCst), 3, "exactly the budget, no more");
    }

    #[tokio::test]
    async fn delay_applied_between_attempts_not_after_last() {
        let policy = FixedRetry {
            attempts: 3,
            delay: Duration::from_millis(50),
        };

        let start = std::time::Instant::now();
        let _ = with_fixed_retry(policy, |_| async { Err::<(), _>("fail") }).await;
        let elapsed = start.elapsed();

        // Two inter-attempt delays of 50 ms; nothing after the final attempt
        assert!(elapsed >= Duration::from_millis(100), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "waited {elapsed:?}");
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let policy = FixedRetry {
            attempts: 0,
            delay: Duration::from_millis(1),
        };
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_fixed_retry(policy, |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("no")
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_numbers_are_one_based() {
        let policy = FixedRetry {
            attempts: 3,
            delay: Duration::from_millis(1),
        };
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let s = seen.clone();

        let _ = with_fixed_retry(policy, |attempt| {
            let s = s.clone();
            async move {
                s.lock().await.push(attempt);
                Err::<(), _>("fail")
            }
        })
        .await;

        assert_eq!(*seen.lock().await, vec![1, 2, 3]);
    }
}
