//! `ClusterOrchestrator` and the idempotency helpers every operation uses.
//!
//! Operations are grouped by resource family in sibling modules
//! (`namespace`, `workload`, `ingress`, `database`, `secret`, `volume`,
//! `metrics`), each adding an `impl` block here.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::Resource;
use tracing::debug;
use tugboat_core::ClusterSettings;

use crate::api::{ClusterApi, NamespacedResource, kind_of};
use crate::error::{ClusterError, ClusterResult};
use crate::names::ResourceNames;

pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_PROJECT: &str = "tugboat.dev/project";
pub const LABEL_SERVICE: &str = "tugboat.dev/service";
pub const LABEL_DATABASE: &str = "tugboat.dev/database";
pub const LABEL_VOLUME: &str = "tugboat.dev/volume";
pub const MANAGER: &str = "tugboat";

/// Standard labels plus one identity label.
pub(crate) fn labels(project_id: &str, key: &str, value: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), MANAGER.to_string()),
        (LABEL_PROJECT.to_string(), project_id.to_string()),
        (key.to_string(), value.to_string()),
    ])
}

pub(crate) fn require(field: &str, value: &str) -> ClusterResult<()> {
    if value.trim().is_empty() {
        return Err(ClusterError::Invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Provisions project resources through a [`ClusterApi`].
pub struct ClusterOrchestrator<C> {
    pub(crate) api: Arc<C>,
    pub(crate) settings: ClusterSettings,
    pub(crate) names: ResourceNames,
}

impl<C> Clone for ClusterOrchestrator<C> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            settings: self.settings.clone(),
            names: self.names,
        }
    }
}

impl<C: ClusterApi> ClusterOrchestrator<C> {
    pub fn new(api: Arc<C>, settings: ClusterSettings) -> Self {
        let names = ResourceNames::new(settings.naming);
        Self {
            api,
            settings,
            names,
        }
    }

    pub fn api(&self) -> &Arc<C> {
        &self.api
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    pub fn names(&self) -> &ResourceNames {
        &self.names
    }

    /// Create `obj`, treating an existing object of the same name as success.
    /// Returns whether it was newly created.
    pub(crate) async fn create_if_absent<K: NamespacedResource>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> ClusterResult<bool> {
        match self.api.create(namespace, obj).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_already_exists() => {
                debug!(
                    kind = %kind_of::<K>(),
                    name = obj.meta().name.as_deref().unwrap_or_default(),
                    %namespace,
                    "already exists"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete `name`, treating an absent object as success.
    /// Returns whether something was deleted.
    pub(crate) async fn delete_if_present<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<bool> {
        match self.api.delete::<K>(namespace, name).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => {
                debug!(kind = %kind_of::<K>(), %name, %namespace, "already absent");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch `name`, mapping not-found to `None`.
    pub(crate) async fn get_opt<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<Option<K>> {
        match self.api.get::<K>(namespace, name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
