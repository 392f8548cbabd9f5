//! Bounded, fixed-delay retry used for dialing the broker and opening channels.
//!
//! The delay is constant between attempts. Exhausting the budget yields
//! [`RabbitMQError::RetryExhausted`] carrying the last underlying error.

use std::{future::Future, time::Duration};

use tracing::warn;

use crate::RabbitMQError;

/// How many times an operation is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub attempts: u32,
    /// Pause between two consecutive attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Budget for dialing the broker: 10 attempts, 3s apart.
    pub const fn connection() -> Self {
        Self::new(10, Duration::from_secs(3))
    }

    /// Budget for opening (or reopening) a channel: 5 attempts, 2s apart.
    pub const fn channel() -> Self {
        Self::new(5, Duration::from_secs(2))
    }

    fn budget(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Runs `op` until it succeeds or the budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, RabbitMQError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RabbitMQError>>,
    {
        let budget = self.budget();
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= budget => {
                    return Err(RabbitMQError::RetryExhausted {
                        operation,
                        attempts: budget,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    warn!(
                        "{} attempt {}/{} failed: {}; retrying in {:?}",
                        operation, attempt, budget, err, self.delay
                    );
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FAST: RetryPolicy = RetryPolicy::new(3, Duration::from_millis(1));

    #[tokio::test]
    async fn succeeds_once_failures_stay_below_budget() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = FAST
            .run("dial", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(RabbitMQError::ConnectionError("refused".into()))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausting_the_budget_is_reported() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = FAST
            .run("dial", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RabbitMQError::ConnectionError("refused".into()))
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_retry_exhausted());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(0, Duration::from_millis(1));

        let _ = policy
            .run("dial", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RabbitMQError::ConnectionError("refused".into()))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_budgets() {
        assert_eq!(RetryPolicy::connection().attempts, 10);
        assert_eq!(RetryPolicy::connection().delay, Duration::from_secs(3));
        assert_eq!(RetryPolicy::channel().attempts, 5);
        assert_eq!(RetryPolicy::channel().delay, Duration::from_secs(2));
    }
}
