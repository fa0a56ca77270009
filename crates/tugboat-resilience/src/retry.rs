//! Bounded exponential backoff.
//!
//! `RetryExecutor::run` calls an operation up to `max_attempts` times.
//! The operation decides what is worth retrying by returning
//! [`Failure::Retryable`]; a [`Failure::Permanent`] error ends the loop on
//! the spot. Between attempts the executor sleeps
//! `min(initial_delay * multiplier^attempt, max_delay)`, optionally jittered,
//! and aborts the sleep as soon as the context is cancelled.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::RetryError;

/// Backoff parameters for one retry loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Draw each delay uniformly from `[delay / 2, delay]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay after the failed attempt with 0-based index `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let full = delay.as_nanos().min(u64::MAX as u128) as u64;
        let nanos = rand::thread_rng().gen_range(full / 2..=full);
        Duration::from_nanos(nanos)
    }
}

/// An operation failure, tagged by the caller.
#[derive(Debug)]
pub enum Failure<E> {
    /// Transient; eligible for another attempt.
    Retryable(E),
    /// Not worth repeating; returned to the caller unchanged.
    Permanent(E),
}

impl<E> Failure<E> {
    pub fn retryable(err: E) -> Self {
        Failure::Retryable(err)
    }

    pub fn permanent(err: E) -> Self {
        Failure::Permanent(err)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Failure::Retryable(_))
    }

    pub fn into_inner(self) -> E {
        match self {
            Failure::Retryable(e) | Failure::Permanent(e) => e,
        }
    }
}

/// Runs operations under a fixed [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts,
    /// or `ctx` is cancelled.
    pub async fn run<T, E, F, Fut>(&self, ctx: &Context, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Failure<E>>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 0..max_attempts {
            if ctx.is_cancelled() {
                debug!(attempt = attempt + 1, "retry loop cancelled before attempt");
                return Err(RetryError::Cancelled);
            }

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(Failure::Permanent(err)) => return Err(RetryError::Permanent(err)),
                Err(Failure::Retryable(err)) => err,
            };

            if attempt + 1 >= max_attempts {
                warn!(attempts = max_attempts, error = %err, "retry attempts exhausted");
                return Err(RetryError::Exhausted {
                    attempts: max_attempts,
                    last: err,
                });
            }

            let delay = self.policy.backoff(attempt);
            warn!(
                attempt = attempt + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retryable failure, backing off"
            );

            if ctx.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            tokio::select! {
                _ = ctx.cancelled() => {
                    debug!(attempt = attempt + 1, "backoff interrupted by cancellation");
                    return Err(RetryError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        // max_attempts >= 1, so the loop always returns.
        Err(RetryError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn fixed_policy(max_attempts: u32, initial_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(30), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_half_to_full() {
        let policy = RetryPolicy {
            jitter: true,
            ..fixed_policy(5, 200)
        };
        for _ in 0..100 {
            let d = policy.backoff(1);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(400));
        }
    }

    #[tokio::test]
    async fn permanent_error_runs_once_and_is_returned_unchanged() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fixed_policy(5, 10));
        let counter = calls.clone();

        let result: Result<(), _> = executor
            .run(&Context::background(), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Failure::permanent("validation failed".to_string()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(RetryError::Permanent(msg)) => assert_eq!(msg, "validation failed"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        // Fails twice then succeeds: 3 invocations, 10ms + 20ms of backoff.
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fixed_policy(3, 10));
        let counter = calls.clone();
        let started = Instant::now();

        let result = executor
            .run(&Context::background(), move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(Failure::retryable("connection reset"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempts_and_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fixed_policy(4, 1));
        let counter = calls.clone();

        let result: Result<(), _> = executor
            .run(&Context::background(), move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Err(Failure::retryable(format!("failure {n}")))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last, "failure 3");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_pending_backoff() {
        let executor = RetryExecutor::new(fixed_policy(5, 1_000));
        let (ctx, handle) = Context::with_cancel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });
        let started = Instant::now();

        let result: Result<(), _> = executor
            .run(&ctx, || async { Err(Failure::retryable("busy")) })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn cancelled_context_prevents_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let (ctx, handle) = Context::with_cancel();
        handle.cancel();
        let counter = calls.clone();

        let result: Result<(), RetryError<&str>> = RetryExecutor::default()
            .run(&ctx, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
