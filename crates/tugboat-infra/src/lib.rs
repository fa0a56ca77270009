//! tugboat-infra — capability client for the legacy virtualized-infrastructure API.
//!
//! One trait, three interchangeable implementations:
//!
//! ```text
//! InfrastructureClient
//!   ├── MockInfraClient      in-memory, simulated async provisioning
//!   ├── HttpInfraClient      JSON REST against the real backend
//!   └── ResilientClient      decorator: breaker ∘ retry ∘ inner
//! ```
//!
//! Resource families: instances, floating IPs, security groups, DNS
//! records, containers, volumes. Every family supports create / get /
//! delete; instances and containers add a bounded `wait_for_*_status`.
//!
//! Deleting something that is already gone is success. Polling that
//! never observes the target status ends in [`InfraError::Timeout`], which
//! is distinct from a resource reaching an error status.
//!
//! [`ServerProvisioner`] sequences a full legacy server (security group,
//! instance, floating IP, DNS) on top of any client.

pub mod client;
pub mod error;
pub mod http;
pub mod mock;
pub mod provision;
pub mod resilient;
pub mod scheduler;
pub mod types;

pub use client::{InfrastructureClient, PollSettings};
pub use error::{InfraError, InfraResult};
pub use http::HttpInfraClient;
pub use mock::MockInfraClient;
pub use provision::{ProvisionedServer, ServerProvisioner, ServerRequest};
pub use resilient::ResilientClient;
pub use scheduler::{CompletionScheduler, ManualScheduler, TokioScheduler};
pub use types::*;
