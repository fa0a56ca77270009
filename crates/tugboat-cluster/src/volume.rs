//! Standalone persistent volumes.

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::api::ClusterApi;
use crate::error::{ClusterError, ClusterResult};
use crate::metrics::parse_memory_bytes;
use crate::orchestrator::{ClusterOrchestrator, LABEL_VOLUME, labels, require};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AccessMode {
    #[default]
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
    ReadWriteOncePod,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadWriteOnce => "ReadWriteOnce",
            AccessMode::ReadOnlyMany => "ReadOnlyMany",
            AccessMode::ReadWriteMany => "ReadWriteMany",
            AccessMode::ReadWriteOncePod => "ReadWriteOncePod",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub project_id: String,
    pub volume_id: String,
    pub size_gb: u32,
    #[serde(default)]
    pub access_mode: AccessMode,
    /// Falls back to the configured storage class.
    pub storage_class: Option<String>,
}

impl VolumeSpec {
    pub fn new(project_id: impl Into<String>, volume_id: impl Into<String>, size_gb: u32) -> Self {
        Self {
            project_id: project_id.into(),
            volume_id: volume_id.into(),
            size_gb,
            access_mode: AccessMode::default(),
            storage_class: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PvcStatus {
    pub exists: bool,
    pub bound: bool,
    pub phase: Option<String>,
    /// Requested size, e.g. `"10Gi"`.
    pub requested: Option<String>,
    /// Capacity reported by the bound volume.
    pub capacity: Option<String>,
}

fn storage_request(pvc: &PersistentVolumeClaim) -> Option<String> {
    pvc.spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get("storage"))
        .map(|q| q.0.clone())
}

impl<C: ClusterApi> ClusterOrchestrator<C> {
    /// Create the volume's PVC. An existing claim is left as is.
    pub async fn create_pvc(&self, spec: &VolumeSpec) -> ClusterResult<String> {
        require("project_id", &spec.project_id)?;
        require("volume_id", &spec.volume_id)?;
        if spec.size_gb == 0 {
            return Err(ClusterError::Invalid("size_gb must be non-zero".into()));
        }
        let namespace = self.namespace_name(&spec.project_id);
        let name = self.names.volume(&spec.volume_id);
        let storage_class = spec
            .storage_class
            .clone()
            .unwrap_or_else(|| self.settings.storage_class.clone());

        let pvc: PersistentVolumeClaim = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "labels": labels(&spec.project_id, LABEL_VOLUME, &spec.volume_id),
            },
            "spec": {
                "accessModes": [spec.access_mode.as_str()],
                "storageClassName": storage_class,
                "resources": { "requests": { "storage": format!("{}Gi", spec.size_gb) } },
            },
        }))?;
        if self.create_if_absent(&namespace, &pvc).await? {
            info!(%namespace, pvc = %name, size_gb = spec.size_gb, %storage_class, "volume created");
        }
        Ok(name)
    }

    /// Grow the claim's requested capacity. Shrinking is rejected.
    pub async fn resize_pvc(&self, project_id: &str, volume_id: &str, size_gb: u32) -> ClusterResult<()> {
        let namespace = self.namespace_name(project_id);
        let name = self.names.volume(volume_id);
        let pvc: PersistentVolumeClaim = self.api.get(&namespace, &name).await?;

        let requested = format!("{size_gb}Gi");
        if let Some(current) = storage_request(&pvc) {
            let current_bytes = parse_memory_bytes(&current)?;
            let new_bytes = parse_memory_bytes(&requested)?;
            if new_bytes < current_bytes {
                return Err(ClusterError::Invalid(format!(
                    "cannot shrink {name} from {current} to {requested}"
                )));
            }
        }

        let patch = json!({ "spec": { "resources": { "requests": { "storage": requested } } } });
        self.api
            .patch::<PersistentVolumeClaim>(&namespace, &name, &patch)
            .await?;
        info!(%namespace, pvc = %name, size = %requested, "volume resized");
        Ok(())
    }

    pub async fn get_pvc_status(&self, project_id: &str, volume_id: &str) -> ClusterResult<PvcStatus> {
        let namespace = self.namespace_name(project_id);
        let name = self.names.volume(volume_id);
        let Some(pvc) = self.get_opt::<PersistentVolumeClaim>(&namespace, &name).await? else {
            return Ok(PvcStatus::default());
        };
        let requested = storage_request(&pvc);
        let status = pvc.status.unwrap_or_default();
        Ok(PvcStatus {
            exists: true,
            bound: status.phase.as_deref() == Some("Bound"),
            capacity: status
                .capacity
                .as_ref()
                .and_then(|c| c.get("storage"))
                .map(|q| q.0.clone()),
            phase: status.phase,
            requested,
        })
    }

    pub async fn delete_pvc(&self, project_id: &str, volume_id: &str) -> ClusterResult<()> {
        let namespace = self.namespace_name(project_id);
        let name = self.names.volume(volume_id);
        if self
            .delete_if_present::<PersistentVolumeClaim>(&namespace, &name)
            .await?
        {
            info!(%namespace, pvc = %name, "volume deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::orchestrator;

    const VOLUME: &str = "feedbeef-1234-5678-9abc-def012345678";

    #[tokio::test]
    async fn create_with_defaults() {
        let (orch, cluster) = orchestrator();
        orch.ensure_namespace("p1").await.unwrap();

        let name = orch.create_pvc(&VolumeSpec::new("p1", VOLUME, 10)).await.unwrap();
        assert_eq!(name, "vol-feedbeef");
        orch.create_pvc(&VolumeSpec::new("p1", VOLUME, 10)).await.unwrap();
        assert_eq!(cluster.count::<PersistentVolumeClaim>("proj-p1"), 1);

        let pvc: PersistentVolumeClaim = cluster.get("proj-p1", &name).await.unwrap();
        let spec = pvc.spec.unwrap();
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
        assert_eq!(spec.storage_class_name.as_deref(), Some("standard"));
    }

    #[tokio::test]
    async fn resize_grows_and_refuses_to_shrink() {
        let (orch, _) = orchestrator();
        orch.ensure_namespace("p1").await.unwrap();
        orch.create_pvc(&VolumeSpec::new("p1", VOLUME, 10)).await.unwrap();

        orch.resize_pvc("p1", VOLUME, 20).await.unwrap();
        let status = orch.get_pvc_status("p1", VOLUME).await.unwrap();
        assert_eq!(status.requested.as_deref(), Some("20Gi"));

        let err = orch.resize_pvc("p1", VOLUME, 5).await.unwrap_err();
        assert!(matches!(err, ClusterError::Invalid(_)));
    }

    #[tokio::test]
    async fn status_reflects_binding() {
        let (orch, cluster) = orchestrator();
        orch.ensure_namespace("p1").await.unwrap();

        assert!(!orch.get_pvc_status("p1", VOLUME).await.unwrap().exists);

        let mut spec = VolumeSpec::new("p1", VOLUME, 1);
        spec.access_mode = AccessMode::ReadWriteMany;
        spec.storage_class = Some("fast-ssd".into());
        let name = orch.create_pvc(&spec).await.unwrap();
        let pending = orch.get_pvc_status("p1", VOLUME).await.unwrap();
        assert!(pending.exists);
        assert!(!pending.bound);

        cluster
            .set_status::<PersistentVolumeClaim>(
                "proj-p1",
                &name,
                json!({"phase": "Bound", "capacity": {"storage": "1Gi"}}),
            )
            .unwrap();
        let bound = orch.get_pvc_status("p1", VOLUME).await.unwrap();
        assert!(bound.bound);
        assert_eq!(bound.capacity.as_deref(), Some("1Gi"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (orch, cluster) = orchestrator();
        orch.ensure_namespace("p1").await.unwrap();
        orch.create_pvc(&VolumeSpec::new("p1", VOLUME, 1)).await.unwrap();
        orch.delete_pvc("p1", VOLUME).await.unwrap();
        orch.delete_pvc("p1", VOLUME).await.unwrap();
        assert_eq!(cluster.count::<PersistentVolumeClaim>("proj-p1"), 0);
    }
}
