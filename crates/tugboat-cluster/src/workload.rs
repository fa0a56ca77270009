//! Application workloads: Deployment + ClusterIP Service.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ResourceRequirements, Service};
use k8s_openapi::api::networking::v1::Ingress;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::api::ClusterApi;
use crate::error::{ClusterError, ClusterResult};
use crate::orchestrator::{ClusterOrchestrator, LABEL_SERVICE, labels, require};

pub const DEFAULT_CPU_REQUEST: &str = "100m";
pub const DEFAULT_CPU_LIMIT: &str = "500m";
pub const DEFAULT_MEMORY_REQUEST: &str = "128Mi";
pub const DEFAULT_MEMORY_LIMIT: &str = "512Mi";

/// Pod-template annotation bumped to force a rolling restart.
pub const RESTARTED_AT_ANNOTATION: &str = "tugboat.dev/restartedAt";

/// CPU/memory requests and limits; unset values take the defaults above.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
}

impl ResourceSpec {
    pub(crate) fn requirements(&self) -> ClusterResult<ResourceRequirements> {
        let pick = |v: &Option<String>, default: &str| v.clone().unwrap_or_else(|| default.to_string());
        Ok(serde_json::from_value(json!({
            "requests": {
                "cpu": pick(&self.cpu_request, DEFAULT_CPU_REQUEST),
                "memory": pick(&self.memory_request, DEFAULT_MEMORY_REQUEST),
            },
            "limits": {
                "cpu": pick(&self.cpu_limit, DEFAULT_CPU_LIMIT),
                "memory": pick(&self.memory_limit, DEFAULT_MEMORY_LIMIT),
            },
        }))?)
    }
}

/// A project volume mounted into the workload container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub volume_id: String,
    pub mount_path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// HTTP liveness/readiness probe settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    #[serde(default = "default_probe_delay")]
    pub initial_delay_seconds: i32,
    #[serde(default = "default_probe_period")]
    pub period_seconds: i32,
}

fn default_probe_delay() -> i32 {
    10
}

fn default_probe_period() -> i32 {
    10
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_replicas() -> i32 {
    1
}

/// Declared intent for one application service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub project_id: String,
    pub service_id: String,
    /// Human-readable service name, used for the default ingress host.
    pub name: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    pub image: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub resources: ResourceSpec,
    /// Load environment variables from the service's env secret.
    #[serde(default)]
    pub env_from_secret: bool,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    pub health_check: Option<HealthCheck>,
    /// Expose through an ingress.
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub custom_domains: Vec<String>,
}

impl WorkloadSpec {
    pub fn new(
        project_id: impl Into<String>,
        service_id: impl Into<String>,
        name: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            service_id: service_id.into(),
            name: name.into(),
            environment: default_environment(),
            image: image.into(),
            port: default_port(),
            replicas: default_replicas(),
            resources: ResourceSpec::default(),
            env_from_secret: false,
            volumes: Vec::new(),
            health_check: None,
            public: false,
            custom_domains: Vec::new(),
        }
    }

    pub fn validate(&self) -> ClusterResult<()> {
        require("project_id", &self.project_id)?;
        require("service_id", &self.service_id)?;
        require("name", &self.name)?;
        require("image", &self.image)?;
        if self.port == 0 {
            return Err(ClusterError::Invalid("port must be non-zero".into()));
        }
        if self.replicas < 0 {
            return Err(ClusterError::Invalid("replicas must not be negative".into()));
        }
        Ok(())
    }
}

/// Fields `update_deployment` may change; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentUpdate {
    pub image: Option<String>,
    pub resources: Option<ResourceSpec>,
    pub replicas: Option<i32>,
}

/// Observed state of a workload's Deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub exists: bool,
    pub replicas: i32,
    pub ready_replicas: i32,
    pub available_replicas: i32,
    pub updated_replicas: i32,
    /// At least one replica is ready.
    pub available: bool,
}

impl<C: ClusterApi> ClusterOrchestrator<C> {
    fn build_deployment(&self, namespace: &str, spec: &WorkloadSpec) -> ClusterResult<Deployment> {
        let name = self.names.workload(&spec.service_id);
        let labels = labels(&spec.project_id, LABEL_SERVICE, &spec.service_id);

        let mut container = json!({
            "name": name,
            "image": spec.image,
            "ports": [{ "name": "http", "containerPort": spec.port, "protocol": "TCP" }],
            "resources": spec.resources.requirements()?,
        });
        if spec.env_from_secret {
            container["envFrom"] = json!([{
                "secretRef": { "name": self.names.env_secret(&spec.service_id), "optional": true }
            }]);
        }
        if let Some(check) = &spec.health_check {
            let probe = json!({
                "httpGet": { "path": check.path, "port": spec.port },
                "initialDelaySeconds": check.initial_delay_seconds,
                "periodSeconds": check.period_seconds,
            });
            container["livenessProbe"] = probe.clone();
            container["readinessProbe"] = probe;
        }

        let mut pod_spec = json!({ "containers": [] });
        if !spec.volumes.is_empty() {
            container["volumeMounts"] = spec
                .volumes
                .iter()
                .map(|v| {
                    json!({
                        "name": self.names.volume(&v.volume_id),
                        "mountPath": v.mount_path,
                        "readOnly": v.read_only,
                    })
                })
                .collect();
            pod_spec["volumes"] = spec
                .volumes
                .iter()
                .map(|v| {
                    let claim = self.names.volume(&v.volume_id);
                    json!({ "name": claim, "persistentVolumeClaim": { "claimName": claim } })
                })
                .collect();
        }
        pod_spec["containers"] = json!([container]);

        Ok(serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": name, "namespace": namespace, "labels": labels },
            "spec": {
                "replicas": spec.replicas,
                "selector": { "matchLabels": { LABEL_SERVICE: spec.service_id } },
                "strategy": {
                    "type": "RollingUpdate",
                    "rollingUpdate": { "maxUnavailable": 0, "maxSurge": 1 },
                },
                "template": {
                    "metadata": { "labels": labels },
                    "spec": pod_spec,
                },
            },
        }))?)
    }

    /// Create the workload's Deployment. An existing one is left untouched.
    pub async fn create_deployment(&self, spec: &WorkloadSpec) -> ClusterResult<String> {
        spec.validate()?;
        let namespace = self.namespace_name(&spec.project_id);
        let deployment = self.build_deployment(&namespace, spec)?;
        let name = self.names.workload(&spec.service_id);
        if self.create_if_absent(&namespace, &deployment).await? {
            info!(%namespace, deployment = %name, image = %spec.image, "deployment created");
        }
        Ok(name)
    }

    /// Create the workload's ClusterIP Service on `spec.port`.
    pub async fn create_service(&self, spec: &WorkloadSpec) -> ClusterResult<String> {
        spec.validate()?;
        let namespace = self.namespace_name(&spec.project_id);
        let name = self.names.workload(&spec.service_id);
        let service: Service = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "labels": labels(&spec.project_id, LABEL_SERVICE, &spec.service_id),
            },
            "spec": {
                "type": "ClusterIP",
                "selector": { LABEL_SERVICE: spec.service_id },
                "ports": [{ "name": "http", "port": spec.port, "targetPort": spec.port, "protocol": "TCP" }],
            },
        }))?;
        if self.create_if_absent(&namespace, &service).await? {
            info!(%namespace, service = %name, port = spec.port, "service created");
        }
        Ok(name)
    }

    /// Change image, resources or replica count of an existing Deployment.
    pub async fn update_deployment(
        &self,
        project_id: &str,
        service_id: &str,
        update: &DeploymentUpdate,
    ) -> ClusterResult<()> {
        if update.replicas.is_some_and(|r| r < 0) {
            return Err(ClusterError::Invalid("replicas must not be negative".into()));
        }
        let namespace = self.namespace_name(project_id);
        let name = self.names.workload(service_id);
        let mut deployment: Deployment = self.api.get(&namespace, &name).await?;

        let spec = deployment
            .spec
            .as_mut()
            .ok_or_else(|| ClusterError::Invalid(format!("deployment {name} has no spec")))?;
        if let Some(replicas) = update.replicas {
            spec.replicas = Some(replicas);
        }
        let container = spec
            .template
            .spec
            .as_mut()
            .and_then(|pod| pod.containers.first_mut())
            .ok_or_else(|| ClusterError::Invalid(format!("deployment {name} has no container")))?;
        if let Some(image) = &update.image {
            container.image = Some(image.clone());
        }
        if let Some(resources) = &update.resources {
            container.resources = Some(resources.requirements()?);
        }

        self.api.replace(&namespace, &name, &deployment).await?;
        info!(%namespace, deployment = %name, image = ?update.image, replicas = ?update.replicas, "deployment updated");
        Ok(())
    }

    /// Force a rolling recreation of every pod without changing the spec.
    pub async fn restart_deployment(&self, project_id: &str, service_id: &str) -> ClusterResult<()> {
        let namespace = self.namespace_name(project_id);
        let name = self.names.workload(service_id);
        let now = chrono::Utc::now().to_rfc3339();
        let patch = json!({
            "spec": { "template": { "metadata": { "annotations": { RESTARTED_AT_ANNOTATION: now } } } }
        });
        self.api.patch::<Deployment>(&namespace, &name, &patch).await?;
        info!(%namespace, deployment = %name, "deployment restarted");
        Ok(())
    }

    pub async fn scale_deployment(
        &self,
        project_id: &str,
        service_id: &str,
        replicas: i32,
    ) -> ClusterResult<()> {
        if replicas < 0 {
            return Err(ClusterError::Invalid("replicas must not be negative".into()));
        }
        let namespace = self.namespace_name(project_id);
        let name = self.names.workload(service_id);
        self.api
            .patch::<Deployment>(&namespace, &name, &json!({ "spec": { "replicas": replicas } }))
            .await?;
        info!(%namespace, deployment = %name, replicas, "deployment scaled");
        Ok(())
    }

    /// Replica counts; a missing Deployment reports `exists: false`.
    pub async fn get_deployment_status(
        &self,
        project_id: &str,
        service_id: &str,
    ) -> ClusterResult<WorkloadStatus> {
        let namespace = self.namespace_name(project_id);
        let name = self.names.workload(service_id);
        let Some(deployment) = self.get_opt::<Deployment>(&namespace, &name).await? else {
            return Ok(WorkloadStatus::default());
        };

        let status = deployment.status.unwrap_or_default();
        let ready_replicas = status.ready_replicas.unwrap_or(0);
        Ok(WorkloadStatus {
            exists: true,
            replicas: status.replicas.unwrap_or(0),
            ready_replicas,
            available_replicas: status.available_replicas.unwrap_or(0),
            updated_replicas: status.updated_replicas.unwrap_or(0),
            available: ready_replicas > 0,
        })
    }

    /// Remove the workload's Ingress, Service and Deployment.
    pub async fn delete_deployment(&self, project_id: &str, service_id: &str) -> ClusterResult<()> {
        let namespace = self.namespace_name(project_id);
        let workload = self.names.workload(service_id);
        self.delete_if_present::<Ingress>(&namespace, &self.names.ingress(service_id))
            .await?;
        self.delete_if_present::<Service>(&namespace, &workload).await?;
        if self.delete_if_present::<Deployment>(&namespace, &workload).await? {
            info!(%namespace, deployment = %workload, "workload deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::orchestrator;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    const SERVICE: &str = "9c1e4f2a-7b3d-4e5f-8a6b-1c2d3e4f5a6b";

    fn spec() -> WorkloadSpec {
        WorkloadSpec::new("p1", SERVICE, "Web API", "registry.local/web:1")
    }

    #[tokio::test]
    async fn deployment_uses_defaults_and_no_downtime_strategy() {
        let (orch, cluster) = orchestrator();
        orch.ensure_namespace("p1").await.unwrap();

        let name = orch.create_deployment(&spec()).await.unwrap();
        assert_eq!(name, "svc-9c1e4f2a");

        let d: Deployment = cluster.get("proj-p1", &name).await.unwrap();
        let dspec = d.spec.unwrap();
        let strategy = dspec.strategy.unwrap();
        assert_eq!(strategy.type_.as_deref(), Some("RollingUpdate"));
        let rolling = strategy.rolling_update.unwrap();
        assert_eq!(rolling.max_unavailable, Some(IntOrString::Int(0)));
        assert_eq!(rolling.max_surge, Some(IntOrString::Int(1)));

        let container = &dspec.template.spec.unwrap().containers[0];
        let resources = container.resources.clone().unwrap();
        let requests = resources.requests.unwrap();
        let limits = resources.limits.unwrap();
        assert_eq!(requests["cpu"], Quantity("100m".into()));
        assert_eq!(requests["memory"], Quantity("128Mi".into()));
        assert_eq!(limits["cpu"], Quantity("500m".into()));
        assert_eq!(limits["memory"], Quantity("512Mi".into()));
        assert!(container.env_from.is_none());
        assert!(container.liveness_probe.is_none());
    }

    #[tokio::test]
    async fn deployment_wires_secret_volumes_and_probes() {
        let (orch, cluster) = orchestrator();
        orch.ensure_namespace("p1").await.unwrap();

        let mut spec = spec();
        spec.env_from_secret = true;
        spec.volumes.push(VolumeMount {
            volume_id: "77aa88bb-0000".into(),
            mount_path: "/data".into(),
            read_only: false,
        });
        spec.health_check = Some(HealthCheck {
            path: "/healthz".into(),
            initial_delay_seconds: 5,
            period_seconds: 15,
        });
        let name = orch.create_deployment(&spec).await.unwrap();

        let d: Deployment = cluster.get("proj-p1", &name).await.unwrap();
        let pod = d.spec.unwrap().template.spec.unwrap();
        let container = &pod.containers[0];
        assert_eq!(container.env_from.as_ref().map(Vec::len), Some(1));
        let mounts = container.volume_mounts.clone().unwrap();
        assert_eq!(mounts[0].name, "vol-77aa88bb");
        assert_eq!(mounts[0].mount_path, "/data");
        assert_eq!(pod.volumes.unwrap()[0].name, "vol-77aa88bb");
        let readiness = container.readiness_probe.clone().unwrap();
        assert_eq!(readiness.period_seconds, Some(15));
        assert_eq!(
            readiness.http_get.unwrap().path.as_deref(),
            Some("/healthz")
        );
    }

    #[tokio::test]
    async fn create_twice_leaves_one_deployment() {
        let (orch, cluster) = orchestrator();
        orch.ensure_namespace("p1").await.unwrap();

        orch.create_deployment(&spec()).await.unwrap();
        orch.create_deployment(&spec()).await.unwrap();
        orch.create_service(&spec()).await.unwrap();
        orch.create_service(&spec()).await.unwrap();
        assert_eq!(cluster.count::<Deployment>("proj-p1"), 1);
        assert_eq!(cluster.count::<Service>("proj-p1"), 1);
    }

    #[tokio::test]
    async fn update_restart_and_scale() {
        let (orch, cluster) = orchestrator();
        orch.ensure_namespace("p1").await.unwrap();
        let name = orch.create_deployment(&spec()).await.unwrap();

        orch.update_deployment(
            "p1",
            SERVICE,
            &DeploymentUpdate {
                image: Some("registry.local/web:2".into()),
                resources: Some(ResourceSpec {
                    memory_limit: Some("1Gi".into()),
                    ..Default::default()
                }),
                replicas: Some(3),
            },
        )
        .await
        .unwrap();

        orch.restart_deployment("p1", SERVICE).await.unwrap();
        orch.scale_deployment("p1", SERVICE, 2).await.unwrap();

        let d: Deployment = cluster.get("proj-p1", &name).await.unwrap();
        let dspec = d.spec.unwrap();
        assert_eq!(dspec.replicas, Some(2));
        let annotations = dspec.template.metadata.unwrap().annotations.unwrap();
        assert!(annotations.contains_key(RESTARTED_AT_ANNOTATION));
        let container = &dspec.template.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("registry.local/web:2"));
        let limits = container.resources.clone().unwrap().limits.unwrap();
        assert_eq!(limits["memory"], Quantity("1Gi".into()));
        assert_eq!(container.ports.as_ref().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn update_of_missing_deployment_is_not_found() {
        let (orch, _) = orchestrator();
        orch.ensure_namespace("p1").await.unwrap();
        let err = orch
            .update_deployment("p1", SERVICE, &DeploymentUpdate::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn status_reports_availability() {
        let (orch, cluster) = orchestrator();
        orch.ensure_namespace("p1").await.unwrap();

        let missing = orch.get_deployment_status("p1", SERVICE).await.unwrap();
        assert!(!missing.exists);
        assert!(!missing.available);

        let name = orch.create_deployment(&spec()).await.unwrap();
        let pending = orch.get_deployment_status("p1", SERVICE).await.unwrap();
        assert!(pending.exists);
        assert!(!pending.available);

        cluster
            .set_status::<Deployment>(
                "proj-p1",
                &name,
                json!({"replicas": 1, "readyReplicas": 1, "availableReplicas": 1, "updatedReplicas": 1}),
            )
            .unwrap();
        let ready = orch.get_deployment_status("p1", SERVICE).await.unwrap();
        assert!(ready.available);
        assert_eq!(ready.ready_replicas, 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (orch, cluster) = orchestrator();
        orch.ensure_namespace("p1").await.unwrap();
        orch.create_deployment(&spec()).await.unwrap();
        orch.create_service(&spec()).await.unwrap();

        orch.delete_deployment("p1", SERVICE).await.unwrap();
        orch.delete_deployment("p1", SERVICE).await.unwrap();
        assert_eq!(cluster.count::<Deployment>("proj-p1"), 0);
        assert_eq!(cluster.count::<Service>("proj-p1"), 0);
    }

    #[tokio::test]
    async fn invalid_specs_are_rejected() {
        let (orch, _) = orchestrator();
        let mut bad = spec();
        bad.image.clear();
        assert!(matches!(
            orch.create_deployment(&bad).await,
            Err(ClusterError::Invalid(_))
        ));
        assert!(orch.scale_deployment("p1", SERVICE, -1).await.is_err());
    }
}
