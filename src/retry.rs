//! Retry policies for calls to remote collaborators.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `base * factor^n` before retry `n` (0-indexed).
    Exponential { base: Duration, factor: f64 },
    /// `step * (n + 1)` before retry `n` (0-indexed).
    Linear { step: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt, so the total number of attempts is `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// NLU calls: 3 attempts, waiting 1s then 2s.
    pub fn nlu_default() -> Self {
        Self {
            max_retries: 2,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
                factor: 2.0,
            },
        }
    }

    /// Store writes: 4 attempts, waiting 0.5s, 1s, then 1.5s.
    pub fn store_default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Linear {
                step: Duration::from_millis(500),
            },
        }
    }

    /// A policy that retries without waiting, for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Linear {
                step: Duration::ZERO,
            },
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// The delay to wait before retry number `retry` (0-indexed).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Exponential { base, factor } => {
                base.mul_f64(factor.powi(retry.min(i32::MAX as u32) as i32))
            }
            Backoff::Linear { step } => step.saturating_mul(retry.saturating_add(1)),
        }
    }
}

/// The ways a retried operation can end without success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a retriable error. Holds the last one.
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with an error that must not be retried.
    Permanent(E),
}

/// Runs `op` until it succeeds, fails with an error for which `retriable` is false, or the
/// policy runs out of retries.
pub async fn run<T, E, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    retriable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !retriable(&e) => return Err(RetryError::Permanent(e)),
            Err(e) if retry >= policy.max_retries => {
                warn!(
                    operation = what,
                    attempts = retry + 1,
                    "Giving up after error: {e}"
                );
                return Err(RetryError::Exhausted {
                    attempts: retry + 1,
                    last: e,
                });
            }
            Err(e) => {
                let delay = policy.delay_for_attempt(retry);
                warn!(
                    operation = what,
                    attempt = retry + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after error: {e}"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_nlu_schedule() {
        let policy = RetryPolicy::nlu_default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
    }

    #[test]
    fn test_store_schedule() {
        let policy = RetryPolicy::store_default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let result: Result<u32, RetryError<String>> =
            run(&RetryPolicy::immediate(3), "flaky", |_| true, move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("failure {n}"))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_reports_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), RetryError<&str>> =
            run(&RetryPolicy::immediate(2), "down", |_| true, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down")
            })
            .await;
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: "down"
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), RetryError<&str>> = run(
            &RetryPolicy::immediate(5),
            "broken",
            |e: &&str| *e != "fatal",
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("fatal")
            },
        )
        .await;
        assert_eq!(result, Err(RetryError::Permanent("fatal")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
