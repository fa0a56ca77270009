//! In-memory [`ClusterApi`] used by tests and the `memory` cluster backend.
//!
//! Objects are stored as JSON keyed by `(kind, namespace, name)`, so any
//! `k8s-openapi` type round-trips through it. Nothing reconciles: status
//! fields only change through the test hooks ([`InMemoryCluster::set_status`],
//! [`InMemoryCluster::set_pod_metrics`], ...).

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::Resource;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::api::{ClusterApi, NamespacedResource, NodeMetrics, PodMetrics, kind_of};
use crate::error::{ClusterError, ClusterResult};

type Key = (String, String, String);

struct Store {
    namespaces: BTreeMap<String, Namespace>,
    objects: BTreeMap<Key, Value>,
    pod_metrics: BTreeMap<String, Vec<PodMetrics>>,
    node_metrics: Vec<NodeMetrics>,
    metrics_available: bool,
    resource_version: u64,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            namespaces: BTreeMap::new(),
            objects: BTreeMap::new(),
            pod_metrics: BTreeMap::new(),
            node_metrics: Vec::new(),
            metrics_available: true,
            resource_version: 0,
        }
    }
}

impl Store {
    fn require_namespace(&self, namespace: &str) -> ClusterResult<()> {
        if self.namespaces.contains_key(namespace) {
            Ok(())
        } else {
            Err(ClusterError::not_found("Namespace", namespace))
        }
    }

    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

/// Thread-safe in-memory cluster.
#[derive(Default)]
pub struct InMemoryCluster {
    store: Mutex<Store>,
}

fn key<K: NamespacedResource>(namespace: &str, name: &str) -> Key {
    (kind_of::<K>(), namespace.to_string(), name.to_string())
}

fn stamp(value: &mut Value, namespace: &str, version: String) {
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.insert("namespace".into(), Value::String(namespace.to_string()));
        meta.insert("resourceVersion".into(), Value::String(version));
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.store.lock().namespaces.contains_key(name)
    }

    /// Number of `K` objects stored in `namespace`.
    pub fn count<K: NamespacedResource>(&self, namespace: &str) -> usize {
        let kind = kind_of::<K>();
        self.store
            .lock()
            .objects
            .keys()
            .filter(|(k, ns, _)| *k == kind && ns == namespace)
            .count()
    }

    /// Overwrite the `status` field of a stored object.
    pub fn set_status<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
        status: Value,
    ) -> ClusterResult<()> {
        let mut store = self.store.lock();
        let value = store
            .objects
            .get_mut(&key::<K>(namespace, name))
            .ok_or_else(|| ClusterError::not_found(kind_of::<K>(), name))?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("status".into(), status);
        }
        Ok(())
    }

    pub fn set_pod_metrics(&self, namespace: &str, metrics: Vec<PodMetrics>) {
        self.store
            .lock()
            .pod_metrics
            .insert(namespace.to_string(), metrics);
    }

    pub fn set_node_metrics(&self, metrics: Vec<NodeMetrics>) {
        self.store.lock().node_metrics = metrics;
    }

    pub fn set_metrics_available(&self, available: bool) {
        self.store.lock().metrics_available = available;
    }
}

/// Apply an RFC 7396 JSON merge patch in place.
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (k, v) in patch_map {
            if v.is_null() {
                target_map.remove(k);
            } else {
                merge_patch(target_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}

/// Evaluate an equality-based label selector (`a=b`, `a==b`, `a!=b`, `a`, `!a`).
pub(crate) fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                labels.get(k.trim()).map(String::as_str) != Some(v.trim())
            } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
                labels.get(k.trim()).map(String::as_str) == Some(v.trim())
            } else if let Some(k) = term.strip_prefix('!') {
                !labels.contains_key(k.trim())
            } else {
                labels.contains_key(term)
            }
        })
}

fn labels_of(value: &Value) -> BTreeMap<String, String> {
    value
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn name_of<K: NamespacedResource>(obj: &K) -> ClusterResult<String> {
    obj.meta()
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ClusterError::Invalid(format!("{} without metadata.name", kind_of::<K>())))
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn create_namespace(&self, namespace: &Namespace) -> ClusterResult<Namespace> {
        let name = namespace
            .metadata
            .name
            .clone()
            .ok_or_else(|| ClusterError::Invalid("Namespace without metadata.name".into()))?;
        let mut store = self.store.lock();
        if store.namespaces.contains_key(&name) {
            return Err(ClusterError::already_exists("Namespace", name));
        }
        store.namespaces.insert(name.clone(), namespace.clone());
        debug!(namespace = %name, "namespace stored");
        Ok(namespace.clone())
    }

    async fn delete_namespace(&self, name: &str) -> ClusterResult<()> {
        let mut store = self.store.lock();
        if store.namespaces.remove(name).is_none() {
            return Err(ClusterError::not_found("Namespace", name));
        }
        store.objects.retain(|(_, ns, _), _| ns != name);
        store.pod_metrics.remove(name);
        Ok(())
    }

    async fn create<K: NamespacedResource>(&self, namespace: &str, obj: &K) -> ClusterResult<K> {
        let name = name_of(obj)?;
        let mut value = serde_json::to_value(obj)?;
        let mut store = self.store.lock();
        store.require_namespace(namespace)?;
        let key = key::<K>(namespace, &name);
        if store.objects.contains_key(&key) {
            return Err(ClusterError::already_exists(kind_of::<K>(), name));
        }
        let version = store.next_version();
        stamp(&mut value, namespace, version);
        let created = serde_json::from_value(value.clone())?;
        store.objects.insert(key, value);
        Ok(created)
    }

    async fn get<K: NamespacedResource>(&self, namespace: &str, name: &str) -> ClusterResult<K> {
        let store = self.store.lock();
        let value = store
            .objects
            .get(&key::<K>(namespace, name))
            .ok_or_else(|| ClusterError::not_found(kind_of::<K>(), name))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    async fn replace<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
        obj: &K,
    ) -> ClusterResult<K> {
        let mut value = serde_json::to_value(obj)?;
        let mut store = self.store.lock();
        let key = key::<K>(namespace, name);
        if !store.objects.contains_key(&key) {
            return Err(ClusterError::not_found(kind_of::<K>(), name));
        }
        let version = store.next_version();
        stamp(&mut value, namespace, version);
        let replaced = serde_json::from_value(value.clone())?;
        store.objects.insert(key, value);
        Ok(replaced)
    }

    async fn patch<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> ClusterResult<K> {
        let mut store = self.store.lock();
        let key = key::<K>(namespace, name);
        let mut value = store
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| ClusterError::not_found(kind_of::<K>(), name))?;
        merge_patch(&mut value, patch);
        let version = store.next_version();
        stamp(&mut value, namespace, version);
        let patched = serde_json::from_value(value.clone())?;
        store.objects.insert(key, value);
        Ok(patched)
    }

    async fn delete<K: NamespacedResource>(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.store
            .lock()
            .objects
            .remove(&key::<K>(namespace, name))
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found(kind_of::<K>(), name))
    }

    async fn list<K: NamespacedResource>(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> ClusterResult<Vec<K>> {
        let kind = kind_of::<K>();
        let store = self.store.lock();
        store
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .filter(|(_, v)| label_selector.is_none_or(|sel| selector_matches(sel, &labels_of(v))))
            .map(|(_, v)| serde_json::from_value(v.clone()).map_err(ClusterError::from))
            .collect()
    }

    async fn pod_metrics(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> ClusterResult<Vec<PodMetrics>> {
        let store = self.store.lock();
        if !store.metrics_available {
            return Err(ClusterError::MetricsUnavailable("metrics server not installed".into()));
        }
        Ok(store
            .pod_metrics
            .get(namespace)
            .map(|pods| {
                pods.iter()
                    .filter(|p| label_selector.is_none_or(|sel| selector_matches(sel, &p.labels)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn node_metrics(&self) -> ClusterResult<Vec<NodeMetrics>> {
        let store = self.store.lock();
        if !store.metrics_available {
            return Err(ClusterError::MetricsUnavailable("metrics server not installed".into()));
        }
        Ok(store.node_metrics.clone())
    }

    async fn metrics_available(&self) -> bool {
        self.store.lock().metrics_available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::json;

    fn namespace(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn config_map(name: &str, labels: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("a".to_string(), "1".to_string())])),
            ..Default::default()
        }
    }

    #[test]
    fn merge_patch_follows_rfc7396() {
        let mut target = json!({"a": "b", "c": {"d": "e", "f": "g"}});
        merge_patch(&mut target, &json!({"a": "z", "c": {"f": null}}));
        assert_eq!(target, json!({"a": "z", "c": {"d": "e"}}));

        let mut target = json!({"list": [1, 2]});
        merge_patch(&mut target, &json!({"list": [3]}));
        assert_eq!(target, json!({"list": [3]}));
    }

    #[test]
    fn selector_terms() {
        let labels = BTreeMap::from([
            ("app".to_string(), "web".to_string()),
            ("tier".to_string(), "front".to_string()),
        ]);
        assert!(selector_matches("app=web", &labels));
        assert!(selector_matches("app==web,tier", &labels));
        assert!(selector_matches("app=web,tier!=back", &labels));
        assert!(selector_matches("!cache", &labels));
        assert!(!selector_matches("app=api", &labels));
        assert!(!selector_matches("app=web,missing", &labels));
        assert!(selector_matches("", &labels));
    }

    #[tokio::test]
    async fn create_requires_namespace_and_rejects_duplicates() {
        let cluster = InMemoryCluster::new();
        let err = cluster.create("ns", &config_map("cm", &[])).await.unwrap_err();
        assert!(err.is_not_found());

        cluster.create_namespace(&namespace("ns")).await.unwrap();
        let created = cluster.create("ns", &config_map("cm", &[])).await.unwrap();
        assert_eq!(created.metadata.namespace.as_deref(), Some("ns"));
        let err = cluster.create("ns", &config_map("cm", &[])).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(cluster.count::<ConfigMap>("ns"), 1);
    }

    #[tokio::test]
    async fn patch_and_list_by_label() {
        let cluster = InMemoryCluster::new();
        cluster.create_namespace(&namespace("ns")).await.unwrap();
        cluster.create("ns", &config_map("one", &[("app", "web")])).await.unwrap();
        cluster.create("ns", &config_map("two", &[("app", "db")])).await.unwrap();

        let patched: ConfigMap = cluster
            .patch("ns", "one", &json!({"data": {"b": "2"}}))
            .await
            .unwrap();
        let data = patched.data.unwrap();
        assert_eq!(data.get("a").map(String::as_str), Some("1"));
        assert_eq!(data.get("b").map(String::as_str), Some("2"));

        let web: Vec<ConfigMap> = cluster.list("ns", Some("app=web")).await.unwrap();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].metadata.name.as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn deleting_namespace_cascades() {
        let cluster = InMemoryCluster::new();
        cluster.create_namespace(&namespace("ns")).await.unwrap();
        cluster.create("ns", &config_map("cm", &[])).await.unwrap();

        cluster.delete_namespace("ns").await.unwrap();
        assert!(!cluster.has_namespace("ns"));
        assert_eq!(cluster.count::<ConfigMap>("ns"), 0);
        assert!(cluster.delete_namespace("ns").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn metrics_can_be_disabled() {
        let cluster = InMemoryCluster::new();
        assert!(cluster.metrics_available().await);
        cluster.set_metrics_available(false);
        let err = cluster.node_metrics().await.unwrap_err();
        assert!(matches!(err, ClusterError::MetricsUnavailable(_)));
    }
}
