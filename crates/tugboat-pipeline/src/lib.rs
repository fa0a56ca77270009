//! tugboat-pipeline — the deployment run lifecycle.
//!
//! A [`DeploymentRun`] moves `queued → building → pushing → deploying` and
//! ends in `success`, `failed` or `cancelled`. [`PipelineDriver`] performs
//! the stages: it asks a [`BuildClient`] for an image, pushes it, applies the
//! workload through the cluster orchestrator and waits for readiness. Every
//! status change and log line goes to an [`EventPublisher`].

pub mod build;
pub mod driver;
pub mod error;
pub mod events;
pub mod run;
pub mod status;

pub use build::{BuildClient, BuildRequest, MockBuildClient};
pub use driver::PipelineDriver;
pub use error::{PipelineError, PipelineResult};
pub use events::{BroadcastPublisher, EventPublisher, PipelineEvent};
pub use run::{DeploymentRun, Trigger};
pub use status::DeploymentStatus;
