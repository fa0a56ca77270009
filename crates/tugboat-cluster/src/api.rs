//! The `ClusterApi` seam between the orchestrator and a cluster.
//!
//! Methods are typed over `k8s-openapi` namespaced objects. Not-found and
//! already-exists outcomes are reported as [`ClusterError::NotFound`] and
//! [`ClusterError::AlreadyExists`]; deciding when they count as success is
//! the orchestrator's job.

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::Namespace;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClusterResult;

/// Any namespaced built-in cluster object.
pub trait NamespacedResource:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> NamespacedResource for K where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Kind name of `K`, e.g. `"Deployment"`.
pub fn kind_of<K: NamespacedResource>() -> String {
    K::kind(&()).into_owned()
}

/// Raw usage quantities as reported by the metrics API (`"250m"`, `"128Mi"`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub cpu: String,
    pub memory: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetrics {
    pub name: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodMetrics {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<ContainerMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub name: String,
    pub usage: Usage,
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn create_namespace(&self, namespace: &Namespace) -> ClusterResult<Namespace>;

    /// Deleting a namespace removes everything in it.
    async fn delete_namespace(&self, name: &str) -> ClusterResult<()>;

    async fn create<K: NamespacedResource>(&self, namespace: &str, obj: &K) -> ClusterResult<K>;

    async fn get<K: NamespacedResource>(&self, namespace: &str, name: &str) -> ClusterResult<K>;

    /// Full-object update.
    async fn replace<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
        obj: &K,
    ) -> ClusterResult<K>;

    /// JSON merge patch (RFC 7396).
    async fn patch<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> ClusterResult<K>;

    async fn delete<K: NamespacedResource>(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    /// List objects, optionally filtered by an equality label selector
    /// such as `"app=web,tier!=cache"`.
    async fn list<K: NamespacedResource>(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> ClusterResult<Vec<K>>;

    async fn pod_metrics(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> ClusterResult<Vec<PodMetrics>>;

    async fn node_metrics(&self) -> ClusterResult<Vec<NodeMetrics>>;

    async fn metrics_available(&self) -> bool;
}
