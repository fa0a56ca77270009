//! Error types for the deployment pipeline.

use thiserror::Error;
use tugboat_cluster::ClusterError;

use crate::status::DeploymentStatus;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid transition {from} → {to}")]
    InvalidTransition {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("build failed: {0}")]
    Build(String),

    #[error("push failed: {0}")]
    Push(String),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("workload not ready after {attempts} checks")]
    ReadinessTimeout { attempts: u32 },
}
