//! Per-project namespaces.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info};

use crate::api::ClusterApi;
use crate::error::ClusterResult;
use crate::orchestrator::{ClusterOrchestrator, LABEL_MANAGED_BY, LABEL_PROJECT, MANAGER, require};

impl<C: ClusterApi> ClusterOrchestrator<C> {
    /// `<namespace_prefix><project_id>`.
    pub fn namespace_name(&self, project_id: &str) -> String {
        format!("{}{}", self.settings.namespace_prefix, project_id.to_ascii_lowercase())
    }

    /// Create the project namespace unless it already exists. Returns its name.
    pub async fn ensure_namespace(&self, project_id: &str) -> ClusterResult<String> {
        require("project_id", project_id)?;
        let name = self.namespace_name(project_id);
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(BTreeMap::from([
                    (LABEL_MANAGED_BY.to_string(), MANAGER.to_string()),
                    (LABEL_PROJECT.to_string(), project_id.to_string()),
                ])),
                ..Default::default()
            },
            ..Default::default()
        };

        match self.api.create_namespace(&namespace).await {
            Ok(_) => info!(namespace = %name, "namespace created"),
            Err(e) if e.is_already_exists() => debug!(namespace = %name, "namespace exists"),
            Err(e) => return Err(e),
        }
        Ok(name)
    }

    /// Delete the project namespace and everything in it.
    pub async fn delete_namespace(&self, project_id: &str) -> ClusterResult<()> {
        let name = self.namespace_name(project_id);
        match self.api.delete_namespace(&name).await {
            Ok(()) => {
                info!(namespace = %name, "namespace deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(namespace = %name, "namespace already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
