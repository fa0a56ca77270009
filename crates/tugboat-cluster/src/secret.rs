//! Per-service environment variables, stored in one Opaque secret.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use serde_json::json;
use tracing::{debug, info};

use crate::api::ClusterApi;
use crate::error::{ClusterError, ClusterResult};
use crate::orchestrator::{ClusterOrchestrator, LABEL_SERVICE, labels};

fn encode(vars: &BTreeMap<String, String>) -> BTreeMap<String, ByteString> {
    vars.iter()
        .map(|(k, v)| (k.clone(), ByteString(v.clone().into_bytes())))
        .collect()
}

fn decode(secret: &Secret) -> BTreeMap<String, String> {
    secret
        .data
        .iter()
        .flatten()
        .filter_map(|(k, v)| String::from_utf8(v.0.clone()).ok().map(|v| (k.clone(), v)))
        .collect()
}

/// Environment variable names: letters, digits, `_`, `-`, `.`; not starting with a digit.
fn validate_key(key: &str) -> ClusterResult<()> {
    let valid = !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ClusterError::Invalid(format!("'{key}' is not a valid variable name")))
    }
}

impl<C: ClusterApi> ClusterOrchestrator<C> {
    fn build_env_secret(
        &self,
        project_id: &str,
        service_id: &str,
        vars: &BTreeMap<String, String>,
    ) -> ClusterResult<Secret> {
        Ok(serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": self.names.env_secret(service_id),
                "namespace": self.namespace_name(project_id),
                "labels": labels(project_id, LABEL_SERVICE, service_id),
            },
            "type": "Opaque",
            "data": encode(vars),
        }))?)
    }

    /// Create the env secret. An existing secret is left as is.
    pub async fn create_secret(
        &self,
        project_id: &str,
        service_id: &str,
        vars: &BTreeMap<String, String>,
    ) -> ClusterResult<()> {
        vars.keys().try_for_each(|k| validate_key(k))?;
        let namespace = self.namespace_name(project_id);
        let secret = self.build_env_secret(project_id, service_id, vars)?;
        if self.create_if_absent(&namespace, &secret).await? {
            info!(%namespace, service = %service_id, keys = vars.len(), "env secret created");
        }
        Ok(())
    }

    /// Replace the full variable set, creating the secret if missing.
    pub async fn update_secret(
        &self,
        project_id: &str,
        service_id: &str,
        vars: &BTreeMap<String, String>,
    ) -> ClusterResult<()> {
        vars.keys().try_for_each(|k| validate_key(k))?;
        let namespace = self.namespace_name(project_id);
        let name = self.names.env_secret(service_id);
        let secret = self.build_env_secret(project_id, service_id, vars)?;

        match self.api.replace(&namespace, &name, &secret).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                self.create_if_absent(&namespace, &secret).await?;
            }
            Err(e) => return Err(e),
        }
        info!(%namespace, secret = %name, keys = vars.len(), "env secret updated");
        Ok(())
    }

    /// Set one variable, leaving the others untouched.
    pub async fn set_env_var(
        &self,
        project_id: &str,
        service_id: &str,
        key: &str,
        value: &str,
    ) -> ClusterResult<()> {
        validate_key(key)?;
        let namespace = self.namespace_name(project_id);
        let name = self.names.env_secret(service_id);
        let patch = json!({ "data": { key: ByteString(value.as_bytes().to_vec()) } });

        match self.api.patch::<Secret>(&namespace, &name, &patch).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                let vars = BTreeMap::from([(key.to_string(), value.to_string())]);
                self.create_secret(project_id, service_id, &vars).await?;
            }
            Err(e) => return Err(e),
        }
        debug!(%namespace, secret = %name, %key, "env var set");
        Ok(())
    }

    /// Remove one variable. Missing secret or key is a no-op.
    pub async fn delete_env_var(&self, project_id: &str, service_id: &str, key: &str) -> ClusterResult<()> {
        let namespace = self.namespace_name(project_id);
        let name = self.names.env_secret(service_id);
        let patch = json!({ "data": { key: null } });
        match self.api.patch::<Secret>(&namespace, &name, &patch).await {
            Ok(_) => {
                debug!(%namespace, secret = %name, %key, "env var deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// All variables; empty when the secret does not exist.
    pub async fn get_env_vars(
        &self,
        project_id: &str,
        service_id: &str,
    ) -> ClusterResult<BTreeMap<String, String>> {
        let namespace = self.namespace_name(project_id);
        let name = self.names.env_secret(service_id);
        Ok(self
            .get_opt::<Secret>(&namespace, &name)
            .await?
            .map(|s| decode(&s))
            .unwrap_or_default())
    }

    pub async fn delete_secret(&self, project_id: &str, service_id: &str) -> ClusterResult<()> {
        let namespace = self.namespace_name(project_id);
        let name = self.names.env_secret(service_id);
        if self.delete_if_present::<Secret>(&namespace, &name).await? {
            info!(%namespace, secret = %name, "env secret deleted");
        }
        Ok(())
    }
}
