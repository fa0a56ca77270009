//! Error types for infrastructure clients.

use thiserror::Error;

pub type InfraResult<T> = Result<T, InfraError>;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("timed out waiting for {kind} {id} to reach '{target}' after {attempts} polls (last status '{last_status}')")]
    Timeout {
        kind: &'static str,
        id: String,
        target: String,
        attempts: u32,
        last_status: String,
    },

    #[error("{kind} {id} entered failure status '{status}'")]
    ProvisioningFailed {
        kind: &'static str,
        id: String,
        status: String,
    },

    #[error("not implemented by this backend: {0}")]
    NotImplemented(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("infrastructure API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend error: {0}")]
    Backend(String),

    /// The circuit breaker rejected the call; treat as backpressure.
    #[error("circuit open: {breaker}")]
    CircuitOpen { breaker: String },

    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<InfraError>,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl InfraError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// A polling `Timeout` is not: the poll already spent its whole budget.
    pub fn is_transient(&self) -> bool {
        match self {
            InfraError::Api { status, .. } => *status >= 500 || *status == 429,
            InfraError::Http(_) | InfraError::Backend(_) => true,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, InfraError::NotFound { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, InfraError::CircuitOpen { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, InfraError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(InfraError::Backend("reset".into()).is_transient());
        assert!(InfraError::Api { status: 503, message: String::new() }.is_transient());
        assert!(InfraError::Api { status: 429, message: String::new() }.is_transient());
        assert!(!InfraError::Api { status: 400, message: String::new() }.is_transient());
        assert!(!InfraError::NotFound { kind: "instance", id: "i-1".into() }.is_transient());
        assert!(!InfraError::NotImplemented("containers".into()).is_transient());
        assert!(!InfraError::CircuitOpen { breaker: "infra".into() }.is_transient());
        let timeout = InfraError::Timeout {
            kind: "instance",
            id: "i-1".into(),
            target: "active".into(),
            attempts: 3,
            last_status: "building".into(),
        };
        assert!(!timeout.is_transient());
        assert!(timeout.is_timeout());
    }
}
