//! [`ClusterApi`] over a real cluster via kube-rs.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Client, Resource, ResourceExt};
use serde_json::Value;
use tracing::{debug, info};

use crate::api::{
    ClusterApi, ContainerMetrics, NamespacedResource, NodeMetrics, PodMetrics, Usage, kind_of,
};
use crate::error::{ClusterError, ClusterResult};

const METRICS_GROUP: &str = "metrics.k8s.io";
const METRICS_VERSION: &str = "v1beta1";
const FIELD_MANAGER: &str = "tugboat";

/// Kube-backed cluster client.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

/// Map a kube error onto the orchestrator's error classes.
fn classify(err: kube::Error, kind: &str, name: &str) -> ClusterError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::not_found(kind, name),
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            ClusterError::already_exists(kind, name)
        }
        kube::Error::Api(resp) if resp.code == 409 => ClusterError::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
            message: resp.message,
        },
        kube::Error::Api(resp) => ClusterError::Api {
            code: resp.code,
            message: resp.message,
        },
        other => ClusterError::Kube(other),
    }
}

fn metrics_resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(METRICS_GROUP, METRICS_VERSION, kind),
        plural,
    )
}

fn usage_of(value: &Value) -> ClusterResult<Usage> {
    Ok(serde_json::from_value(value
        .get("usage")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default())))?)
}

fn metrics_error(err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 || resp.code == 503 => {
            ClusterError::MetricsUnavailable(resp.message)
        }
        other => classify(other, "metrics", METRICS_GROUP),
    }
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account.
    pub async fn try_default() -> ClusterResult<Self> {
        let client = Client::try_default().await.map_err(ClusterError::Kube)?;
        info!(namespace = %client.default_namespace(), "connected to cluster");
        Ok(Self::new(client))
    }

    fn api<K: NamespacedResource>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_namespace(&self, namespace: &Namespace) -> ClusterResult<Namespace> {
        let name = namespace.name_any();
        Api::<Namespace>::all(self.client.clone())
            .create(&PostParams::default(), namespace)
            .await
            .map_err(|e| classify(e, "Namespace", &name))
    }

    async fn delete_namespace(&self, name: &str) -> ClusterResult<()> {
        Api::<Namespace>::all(self.client.clone())
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| classify(e, "Namespace", name))
    }

    async fn create<K: NamespacedResource>(&self, namespace: &str, obj: &K) -> ClusterResult<K> {
        let name = obj.meta().name.clone().unwrap_or_default();
        self.api::<K>(namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| classify(e, &kind_of::<K>(), &name))
    }

    async fn get<K: NamespacedResource>(&self, namespace: &str, name: &str) -> ClusterResult<K> {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| classify(e, &kind_of::<K>(), name))
    }

    async fn replace<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
        obj: &K,
    ) -> ClusterResult<K> {
        self.api::<K>(namespace)
            .replace(name, &PostParams::default(), obj)
            .await
            .map_err(|e| classify(e, &kind_of::<K>(), name))
    }

    async fn patch<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> ClusterResult<K> {
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api::<K>(namespace)
            .patch(name, &params, &Patch::Merge(patch))
            .await
            .map_err(|e| classify(e, &kind_of::<K>(), name))
    }

    async fn delete<K: NamespacedResource>(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| classify(e, &kind_of::<K>(), name))
    }

    async fn list<K: NamespacedResource>(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> ClusterResult<Vec<K>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self
            .api::<K>(namespace)
            .list(&params)
            .await
            .map_err(|e| classify(e, &kind_of::<K>(), namespace))?;
        Ok(list.items)
    }

    async fn pod_metrics(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> ClusterResult<Vec<PodMetrics>> {
        let resource = metrics_resource("PodMetrics", "pods");
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = api.list(&params).await.map_err(metrics_error)?;
        debug!(%namespace, pods = list.items.len(), "pod metrics fetched");

        list.items
            .into_iter()
            .map(|obj| {
                let containers = obj
                    .data
                    .get("containers")
                    .and_then(Value::as_array)
                    .map(|cs| {
                        cs.iter()
                            .map(|c| {
                                Ok(ContainerMetrics {
                                    name: c
                                        .get("name")
                                        .and_then(Value::as_str)
                                        .unwrap_or_default()
                                        .to_string(),
                                    usage: usage_of(c)?,
                                })
                            })
                            .collect::<ClusterResult<Vec<_>>>()
                    })
                    .transpose()?
                    .unwrap_or_default();
                Ok(PodMetrics {
                    name: obj.name_any(),
                    namespace: namespace.to_string(),
                    labels: obj.labels().clone(),
                    containers,
                })
            })
            .collect()
    }

    async fn node_metrics(&self) -> ClusterResult<Vec<NodeMetrics>> {
        let resource = metrics_resource("NodeMetrics", "nodes");
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(metrics_error)?;
        list.items
            .into_iter()
            .map(|obj| {
                Ok(NodeMetrics {
                    name: obj.name_any(),
                    usage: usage_of(&obj.data)?,
                })
            })
            .collect()
    }

    async fn metrics_available(&self) -> bool {
        let api_version = format!("{METRICS_GROUP}/{METRICS_VERSION}");
        match self.client.list_api_group_resources(&api_version).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "metrics API not served");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} happened"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn classifies_api_errors() {
        assert!(classify(api_error(404, "NotFound"), "Deployment", "svc-1").is_not_found());
        assert!(
            classify(api_error(409, "AlreadyExists"), "Deployment", "svc-1").is_already_exists()
        );
        assert!(matches!(
            classify(api_error(409, "Conflict"), "Deployment", "svc-1"),
            ClusterError::Conflict { .. }
        ));
        assert!(matches!(
            classify(api_error(500, "InternalError"), "Deployment", "svc-1"),
            ClusterError::Api { code: 500, .. }
        ));
    }

    #[test]
    fn metrics_404_means_unavailable() {
        assert!(matches!(
            metrics_error(api_error(404, "NotFound")),
            ClusterError::MetricsUnavailable(_)
        ));
    }

    #[test]
    fn metrics_resource_targets_v1beta1() {
        let pods = metrics_resource("PodMetrics", "pods");
        assert_eq!(pods.api_version, "metrics.k8s.io/v1beta1");
        assert_eq!(pods.plural, "pods");
    }
}
