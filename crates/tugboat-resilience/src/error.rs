//! Error types for the resilience layer.

use thiserror::Error;

/// Outcome of a retry loop that did not succeed.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    #[error("operation failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// The operation returned an error that was not tagged retryable.
    #[error("{0}")]
    Permanent(E),

    /// The context was cancelled before or between attempts.
    #[error("operation cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// The underlying error, if there is one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Permanent(e) => Some(e),
            RetryError::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }
}

/// Outcome of a call rejected or failed under a circuit breaker.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker is open; the wrapped function was not invoked.
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    /// The wrapped function ran and failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}
