//! tugboat-cluster — provisions project resources on a container cluster.
//!
//! ```text
//! ClusterOrchestrator<C: ClusterApi>
//!   ├── namespace   one namespace per project
//!   ├── workload    Deployment + Service (+ restart / scale / status)
//!   ├── ingress     default host + custom domains, one shared TLS secret
//!   ├── database    Secret → PVC → StatefulSet → Service
//!   ├── secret      per-service environment variables
//!   ├── volume      standalone PVCs
//!   └── metrics     live pod / node usage
//! ```
//!
//! Creates succeed when the object already exists and deletes succeed when
//! it is already gone; every other not-found or conflict is an error.
//!
//! `ClusterApi` has two implementations: [`KubeCluster`] for real clusters
//! and [`InMemoryCluster`] for tests and dry runs.

pub mod api;
pub mod database;
pub mod error;
pub mod ingress;
pub mod kubernetes;
pub mod memory;
pub mod metrics;
pub mod names;
pub mod namespace;
pub mod orchestrator;
pub mod secret;
pub mod volume;
pub mod workload;

pub use api::{ClusterApi, ContainerMetrics, NamespacedResource, NodeMetrics, PodMetrics, Usage};
pub use database::{
    DatabaseCredentials, DatabaseEngine, DatabaseSpec, DatabaseStatus, EngineDescriptor,
};
pub use error::{ClusterError, ClusterResult};
pub use ingress::ingress_hosts;
pub use kubernetes::KubeCluster;
pub use memory::InMemoryCluster;
pub use metrics::{NodeUsage, PodUsage, ServiceMetrics, parse_cpu_cores, parse_memory_bytes};
pub use names::ResourceNames;
pub use orchestrator::ClusterOrchestrator;
pub use volume::{AccessMode, PvcStatus, VolumeSpec};
pub use workload::{
    DeploymentUpdate, HealthCheck, ResourceSpec, VolumeMount, WorkloadSpec, WorkloadStatus,
};
