//! Bounded retries for collaborator calls.
//!
//! Every collaborator boundary retries transient failures through
//! [`retry_with_backoff`]; the orchestrator only ever sees the final
//! outcome of an apply or destroy.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::config::RetrySettings;
use crate::error::{CollaboratorError, Result};
use crate::orchestrator::CancelSignal;

/// Retry and backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Overall budget for the call, retries included.
    pub deadline: Duration,
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    #[must_use]
    pub const fn once(deadline: Duration) -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            deadline,
        }
    }

    /// Returns the delay to wait after `attempt` failed (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            deadline: Duration::from_secs(settings.deadline_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetrySettings::default().into()
    }
}

/// Runs `op` until it succeeds, fails permanently, runs out of attempts,
/// exceeds the deadline, or `cancel` fires.
///
/// `op` receives the 1-based attempt number. Only errors for which
/// [`crate::error::ForgeError::is_retryable`] holds are retried.
///
/// # Errors
///
/// Returns the last error from `op`, [`CollaboratorError::DeadlineExceeded`]
/// or [`CollaboratorError::Cancelled`].
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelSignal,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + policy.deadline;
    let exceeded = |attempts| CollaboratorError::DeadlineExceeded {
        secs: policy.deadline.as_secs(),
        attempts,
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(CollaboratorError::Cancelled.into());
        }

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CollaboratorError::Cancelled.into()),
            () = tokio::time::sleep_until(deadline) => return Err(exceeded(attempt).into()),
            outcome = op(attempt) => outcome,
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => e,
            Err(e) => return Err(e),
        };

        let delay = policy.backoff(attempt);
        if Instant::now() + delay >= deadline {
            return Err(exceeded(attempt).into());
        }

        warn!(
            "Attempt {attempt}/{} failed, retrying in {}ms: {err}",
            policy.max_attempts,
            delay.as_millis()
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CollaboratorError::Cancelled.into()),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForgeError;
    use crate::orchestrator::CancelHandle;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            deadline: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(3000),
            deadline: Duration::from_secs(60),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(4), Duration::from_millis(3000));
        assert_eq!(policy.backoff(40), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry_with_backoff(&fast_policy(3), &CancelSignal::never(), |attempt| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(CollaboratorError::transient("unreachable").into())
                } else {
                    Ok("i-0abc")
                }
            }
        })
        .await;

        assert_eq!(result.expect("third attempt succeeds"), "i-0abc");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<()> = retry_with_backoff(&fast_policy(5), &CancelSignal::never(), |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CollaboratorError::permanent("bad credentials").into())
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(ForgeError::Collaborator(CollaboratorError::Permanent { .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<()> = retry_with_backoff(&fast_policy(2), &CancelSignal::never(), |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CollaboratorError::transient("busy").into())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_deadline_interrupts_slow_call() {
        let policy = RetryPolicy::once(Duration::from_millis(20));
        let result: Result<()> = retry_with_backoff(&policy, &CancelSignal::never(), |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(ForgeError::Collaborator(CollaboratorError::DeadlineExceeded { attempts: 1, .. }))
        ));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_call() {
        let (handle, signal) = CancelHandle::new();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });

        let result: Result<()> = retry_with_backoff(&fast_policy(1), &signal, |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        canceller.await.expect("canceller completes");
        assert!(result.is_err_and(|e| e.is_cancelled()));
    }
}
