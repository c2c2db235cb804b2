//! Bounded retry for optimistic-concurrency conflicts.
//!
//! Every attempt gets a fresh [`Deadline`]. The read-validate phase of an
//! attempt runs under it; the commit does not, so an outcome is never reported
//! for a write that may still land. Commits are bounded by the store itself
//! (Postgres `lock_timeout`). Only `TransactionConflict` is retried, and never
//! once the attempt's deadline has passed.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use tracing::{debug, warn};

use crate::config::StockConfig;
use crate::error::{StockError, StockResult};

/// Retry settings for store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first conflict (0 = no retries).
    pub max_retries: u32,
    /// Linear backoff step: retry `n` waits `n * backoff`.
    pub backoff: Duration,
    /// Upper bound for one attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StockConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &StockConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.retry_backoff,
            attempt_timeout: config.transaction_timeout,
        }
    }

    /// Delay before retry `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

/// Time budget of one attempt.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    started: Instant,
    timeout: Duration,
}

impl Deadline {
    fn start(timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
        }
    }

    pub(crate) fn has_passed(&self) -> bool {
        self.started.elapsed() >= self.timeout
    }

    /// Run the pre-commit part of an attempt within what is left of the
    /// budget. Running out is reported as a `TransactionConflict`.
    pub(crate) async fn run<T, Fut>(self, operation: &'static str, work: Fut) -> StockResult<T>
    where
        Fut: Future<Output = StockResult<T>>,
    {
        let remaining = self.timeout.saturating_sub(self.started.elapsed());
        match tokio::time::timeout(remaining, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "attempt timed out before commit"
                );
                Err(StockError::TransactionConflict(format!(
                    "{operation} timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, runs
/// past its deadline, or the retry budget is spent.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    mut attempt: F,
) -> StockResult<T>
where
    F: FnMut(Deadline) -> Fut,
    Fut: Future<Output = StockResult<T>>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;

        let deadline = Deadline::start(policy.attempt_timeout);
        match attempt(deadline).await {
            Err(err) if err.is_retryable() && deadline.has_passed() => {
                debug!(operation, attempts, error = %err, "deadline passed, not retrying");
                return Err(err);
            }
            Err(err) if err.is_retryable() && attempts <= policy.max_retries => {
                debug!(operation, attempts, error = %err, "conflict, retrying");
                tokio::time::sleep(policy.delay_for_attempt(attempts)).await;
            }
            Err(err) if err.is_retryable() => {
                warn!(operation, attempts, error = %err, "retries exhausted");
                return Err(err);
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(1),
            attempt_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn backoff_is_linear() {
        let p = RetryPolicy {
            backoff: Duration::from_millis(10),
            ..policy(3)
        };
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(30));
    }

    #[tokio::test]
    async fn retries_conflicts_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(policy(3), "test", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StockError::TransactionConflict("busy".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: StockResult<()> = with_retry(policy(2), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StockError::TransactionConflict("busy".into())) }
        })
        .await;

        assert!(matches!(result, Err(StockError::TransactionConflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: StockResult<()> = with_retry(policy(5), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StockError::InsufficientStock {
                    requested: 5,
                    available: 1,
                })
            }
        })
        .await;

        assert!(matches!(result, Err(StockError::InsufficientStock { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timed_out_attempt_is_a_conflict_and_not_retried() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy {
            attempt_timeout: Duration::from_millis(20),
            ..policy(5)
        };
        let result: StockResult<()> = with_retry(p, "test", |deadline| {
            calls.fetch_add(1, Ordering::SeqCst);
            deadline.run("test", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
        })
        .await;

        assert!(matches!(result, Err(StockError::TransactionConflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn work_after_the_guarded_phase_is_not_cut_off() {
        let p = RetryPolicy {
            attempt_timeout: Duration::from_millis(20),
            ..policy(5)
        };
        let result = with_retry(p, "test", |deadline| async move {
            let read = deadline.run("test", async { Ok(7) }).await?;
            tokio::time::sleep(Duration::from_millis(60)).await;
            Ok::<_, StockError>(read)
        })
        .await;

        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn conflicts_past_the_deadline_are_not_retried() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy {
            attempt_timeout: Duration::from_millis(20),
            ..policy(5)
        };
        let result: StockResult<()> = with_retry(p, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Err(StockError::TransactionConflict("busy".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(StockError::TransactionConflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
