//! Ingress routes: one default host plus custom domains, sharing one TLS secret.

use k8s_openapi::api::networking::v1::Ingress;
use serde_json::json;
use tracing::{debug, info};
use tugboat_core::slugify;

use crate::api::ClusterApi;
use crate::error::{ClusterError, ClusterResult};
use crate::orchestrator::{ClusterOrchestrator, LABEL_SERVICE, labels, require};
use crate::workload::WorkloadSpec;

const ISSUER_ANNOTATION: &str = "cert-manager.io/cluster-issuer";

fn normalize_domain(domain: &str) -> ClusterResult<String> {
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() || domain.contains(char::is_whitespace) || !domain.contains('.') {
        return Err(ClusterError::Invalid(format!("'{domain}' is not a domain name")));
    }
    Ok(domain)
}

/// Every host routed by `ingress`, in rule order.
pub fn ingress_hosts(ingress: &Ingress) -> Vec<String> {
    ingress
        .spec
        .as_ref()
        .and_then(|s| s.rules.as_ref())
        .map(|rules| rules.iter().filter_map(|r| r.host.clone()).collect())
        .unwrap_or_default()
}

impl<C: ClusterApi> ClusterOrchestrator<C> {
    /// `<slug(name)>-<slug(environment)>.<base_domain>`.
    pub fn default_host(&self, name: &str, environment: &str) -> String {
        format!(
            "{}-{}.{}",
            slugify(name),
            slugify(environment),
            self.settings.base_domain
        )
    }

    /// Create the workload's ingress for the default host and any custom
    /// domains. Returns the routed hosts; an existing ingress is returned as is.
    pub async fn create_ingress(&self, spec: &WorkloadSpec) -> ClusterResult<Vec<String>> {
        spec.validate()?;
        let namespace = self.namespace_name(&spec.project_id);
        let name = self.names.ingress(&spec.service_id);

        let mut hosts = vec![self.default_host(&spec.name, &spec.environment)];
        for domain in &spec.custom_domains {
            let domain = normalize_domain(domain)?;
            if !hosts.contains(&domain) {
                hosts.push(domain);
            }
        }

        let backend = json!({
            "service": {
                "name": self.names.workload(&spec.service_id),
                "port": { "number": spec.port },
            }
        });
        let rules: Vec<_> = hosts
            .iter()
            .map(|host| {
                json!({
                    "host": host,
                    "http": { "paths": [{ "path": "/", "pathType": "Prefix", "backend": backend }] },
                })
            })
            .collect();

        let ingress: Ingress = serde_json::from_value(json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "labels": labels(&spec.project_id, LABEL_SERVICE, &spec.service_id),
                "annotations": { ISSUER_ANNOTATION: self.settings.cluster_issuer },
            },
            "spec": {
                "ingressClassName": self.settings.ingress_class,
                "tls": [{ "hosts": hosts, "secretName": self.names.tls_secret(&spec.service_id) }],
                "rules": rules,
            },
        }))?;

        if self.create_if_absent(&namespace, &ingress).await? {
            info!(%namespace, ingress = %name, hosts = ?hosts, "ingress created");
            return Ok(hosts);
        }
        let existing: Ingress = self.api.get(&namespace, &name).await?;
        Ok(ingress_hosts(&existing))
    }

    /// Route `domain` to the workload. No-op when the host is already present.
    pub async fn add_custom_domain(
        &self,
        project_id: &str,
        service_id: &str,
        domain: &str,
    ) -> ClusterResult<()> {
        let domain = normalize_domain(domain)?;
        let namespace = self.namespace_name(project_id);
        let name = self.names.ingress(service_id);
        let mut ingress: Ingress = self.api.get(&namespace, &name).await?;

        let spec = ingress
            .spec
            .as_mut()
            .ok_or_else(|| ClusterError::Invalid(format!("ingress {name} has no spec")))?;
        let rules = spec.rules.get_or_insert_with(Vec::new);
        if rules.iter().any(|r| r.host.as_deref() == Some(domain.as_str())) {
            debug!(%namespace, ingress = %name, %domain, "domain already routed");
            return Ok(());
        }
        let template = rules
            .first()
            .cloned()
            .ok_or_else(|| ClusterError::Invalid(format!("ingress {name} has no rules")))?;
        let mut rule = template;
        rule.host = Some(domain.clone());
        rules.push(rule);

        let tls = spec.tls.get_or_insert_with(Vec::new);
        if tls.is_empty() {
            tls.push(serde_json::from_value(json!({
                "hosts": [],
                "secretName": self.names.tls_secret(service_id),
            }))?);
        }
        let tls_hosts = tls[0].hosts.get_or_insert_with(Vec::new);
        if !tls_hosts.contains(&domain) {
            tls_hosts.push(domain.clone());
        }

        self.api.replace(&namespace, &name, &ingress).await?;
        info!(%namespace, ingress = %name, %domain, "custom domain added");
        Ok(())
    }

    /// Stop routing `domain`. No-op when it is not routed.
    pub async fn remove_custom_domain(
        &self,
        project_id: &str,
        service_id: &str,
        domain: &str,
    ) -> ClusterResult<()> {
        require("domain", domain)?;
        let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
        let namespace = self.namespace_name(project_id);
        let name = self.names.ingress(service_id);
        let mut ingress: Ingress = self.api.get(&namespace, &name).await?;

        let Some(spec) = ingress.spec.as_mut() else {
            return Ok(());
        };
        let mut changed = false;
        if let Some(rules) = spec.rules.as_mut() {
            let before = rules.len();
            rules.retain(|r| r.host.as_deref() != Some(domain.as_str()));
            changed |= rules.len() != before;
        }
        for tls in spec.tls.iter_mut().flatten() {
            if let Some(hosts) = tls.hosts.as_mut() {
                let before = hosts.len();
                hosts.retain(|h| *h != domain);
                changed |= hosts.len() != before;
            }
        }
        if !changed {
            debug!(%namespace, ingress = %name, %domain, "domain not routed");
            return Ok(());
        }

        self.api.replace(&namespace, &name, &ingress).await?;
        info!(%namespace, ingress = %name, %domain, "custom domain removed");
        Ok(())
    }

    pub async fn delete_ingress(&self, project_id: &str, service_id: &str) -> ClusterResult<()> {
        let namespace = self.namespace_name(project_id);
        let name = self.names.ingress(service_id);
        if self.delete_if_present::<Ingress>(&namespace, &name).await? {
            info!(%namespace, ingress = %name, "ingress deleted");
        }
        Ok(())
    }
}
