//! Circuit breaker.
//!
//! # State transitions
//!
//! ```text
//! Closed   → Open:     failure_count >= failure_threshold
//! Open     → HalfOpen: first call after `timeout` since the last failure
//! HalfOpen → Closed:   success_count >= success_threshold
//! HalfOpen → Open:     any failure
//! ```
//!
//! Independently of state, a failure count older than `reset_timeout` is
//! dropped, so sporadic failures spread over a long healthy period never
//! add up to a trip.
//!
//! All transitions happen under one lock per breaker. The lock is never
//! held across the wrapped call.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::BreakerError;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected without invoking the wrapped function.
    Open,
    /// Calls pass through as recovery probes.
    HalfOpen,
}

/// Thresholds and timeouts for a [`CircuitBreaker`].
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Failures in Closed before tripping to Open.
    pub failure_threshold: u32,
    /// Successes in HalfOpen before closing.
    pub success_threshold: u32,
    /// Time in Open before the next call is let through as a probe.
    pub timeout: Duration,
    /// Idle window after which the failure count is zeroed.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    last_reset_at: Instant,
}

/// Failure-threshold circuit breaker with timed half-open recovery.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
                last_reset_at: Instant::now(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state. Does not apply pending timeouts.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.inner.lock().success_count
    }

    /// Force the breaker back to Closed with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure_at = None;
        inner.last_reset_at = Instant::now();
        info!(breaker = %self.name, "circuit breaker reset");
    }

    /// Invoke `f` unless the breaker is open, recording the outcome.
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit()?;
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Decide whether a call may proceed, moving Open → HalfOpen when due.
    fn admit<E>(&self) -> Result<(), BreakerError<E>> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if now.duration_since(inner.last_reset_at) > self.config.reset_timeout {
            if inner.failure_count > 0 {
                debug!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    "stale failure count decayed"
                );
            }
            inner.failure_count = 0;
            inner.last_reset_at = now;
        }

        if inner.state == CircuitState::Open {
            let since_failure = inner
                .last_failure_at
                .map(|at| now.duration_since(at))
                .unwrap_or(Duration::MAX);
            if since_failure <= self.config.timeout {
                debug!(breaker = %self.name, "circuit open, rejecting call");
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                });
            }
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            info!(breaker = %self.name, "circuit half-open, probing");
        }

        Ok(())
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.last_reset_at = Instant::now();
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.last_reset_at = Instant::now();
                    info!(breaker = %self.name, "circuit closed");
                }
            }
            // A call admitted before another one tripped the breaker.
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.last_failure_at = Some(now);
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        threshold = self.config.failure_threshold,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                warn!(breaker = %self.name, "probe failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }
}
