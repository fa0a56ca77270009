//! tugboat-resilience — the guard every outbound provisioning call goes through.
//!
//! Two independent primitives that compose:
//!
//! ```text
//! CircuitBreaker::call
//!   └── RetryExecutor::run
//!         └── op() → Ok | Failure::Retryable | Failure::Permanent
//! ```
//!
//! - **`retry`**: bounded exponential backoff with optional jitter. Only
//!   errors the caller explicitly tagged `Failure::Retryable` are retried;
//!   everything else surfaces immediately and unchanged.
//! - **`breaker`**: failure-threshold tripping, timed recovery through a
//!   half-open probe phase, and idle decay of stale failure counts.
//! - **`context`**: a cloneable cancellation signal. Backoff sleeps race
//!   against it so cancelling never waits out a pending delay.
//!
//! Timing uses `tokio::time`, so tests can run on a paused clock.

pub mod breaker;
pub mod context;
pub mod error;
pub mod retry;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use context::{CancelHandle, Context};
pub use error::{BreakerError, RetryError};
pub use retry::{Failure, RetryExecutor, RetryPolicy};
