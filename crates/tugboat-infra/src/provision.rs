//! End-to-end provisioning of a legacy server.
//!
//! ```text
//! security group → instance → wait active → floating IP → attach → DNS A record
//! ```
//!
//! If any step after the security group fails, everything created so far
//! is deleted in reverse order. Rollback is best effort: failures are
//! logged and the original error is returned.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::InfrastructureClient;
use crate::error::{InfraError, InfraResult};
use crate::types::*;

const DEFAULT_DNS_TTL: u32 = 300;

/// What to provision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRequest {
    pub name: String,
    pub flavor: String,
    pub image: String,
    /// TCP ports opened in the server's security group.
    #[serde(default)]
    pub open_ports: Vec<u16>,
    pub floating_ip_pool: String,
    /// DNS zone for the A record; no record is created when unset.
    pub dns_zone: Option<String>,
    pub user_data: Option<String>,
}

impl ServerRequest {
    /// A request with common defaults: SSH/HTTP/HTTPS open, public pool, no DNS.
    pub fn new(name: impl Into<String>, flavor: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flavor: flavor.into(),
            image: image.into(),
            open_ports: vec![22, 80, 443],
            floating_ip_pool: "public".to_string(),
            dns_zone: None,
            user_data: None,
        }
    }

    fn validate(&self) -> InfraResult<()> {
        if self.name.trim().is_empty() {
            return Err(InfraError::Invalid("server name must not be empty".into()));
        }
        if self.flavor.trim().is_empty() || self.image.trim().is_empty() {
            return Err(InfraError::Invalid("flavor and image are required".into()));
        }
        Ok(())
    }
}

/// Ids and addresses of a provisioned server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedServer {
    pub name: String,
    pub security_group_id: String,
    pub instance_id: String,
    pub private_ip: Option<String>,
    pub floating_ip_id: String,
    pub public_ip: String,
    pub dns_record_id: Option<String>,
    pub fqdn: Option<String>,
}

/// Resources created so far, for rollback.
#[derive(Default)]
struct Created {
    security_group: Option<String>,
    instance: Option<String>,
    floating_ip: Option<String>,
}

/// Sequences server provisioning over any [`InfrastructureClient`].
#[derive(Clone)]
pub struct ServerProvisioner {
    client: Arc<dyn InfrastructureClient>,
}

impl ServerProvisioner {
    pub fn new(client: Arc<dyn InfrastructureClient>) -> Self {
        Self { client }
    }

    pub async fn provision(&self, req: &ServerRequest) -> InfraResult<ProvisionedServer> {
        req.validate()?;
        let mut created = Created::default();
        match self.run_steps(req, &mut created).await {
            Ok(server) => {
                info!(
                    server = %server.name,
                    instance = %server.instance_id,
                    public_ip = %server.public_ip,
                    "server provisioned"
                );
                Ok(server)
            }
            Err(err) => {
                warn!(server = %req.name, error = %err, "provisioning failed, rolling back");
                self.rollback(created).await;
                Err(err)
            }
        }
    }

    async fn run_steps(
        &self,
        req: &ServerRequest,
        created: &mut Created,
    ) -> InfraResult<ProvisionedServer> {
        let group = self
            .client
            .create_security_group(&CreateSecurityGroupRequest {
                name: format!("{}-sg", req.name),
                rules: req.open_ports.iter().copied().map(SecurityRule::tcp).collect(),
            })
            .await?;
        created.security_group = Some(group.id.clone());

        let instance = self
            .client
            .create_instance(&CreateInstanceRequest {
                name: req.name.clone(),
                flavor: req.flavor.clone(),
                image: req.image.clone(),
                security_group_ids: vec![group.id.clone()],
                user_data: req.user_data.clone(),
            })
            .await?;
        created.instance = Some(instance.id.clone());

        let instance = self
            .client
            .wait_for_instance_status(&instance.id, status::ACTIVE)
            .await?;

        let fip = self
            .client
            .create_floating_ip(&CreateFloatingIpRequest {
                pool: req.floating_ip_pool.clone(),
            })
            .await?;
        created.floating_ip = Some(fip.id.clone());

        let fip = self.client.attach_floating_ip(&fip.id, &instance.id).await?;

        let (dns_record_id, fqdn) = match &req.dns_zone {
            Some(zone) => {
                let record = self
                    .client
                    .create_dns_record(&CreateDnsRecordRequest {
                        zone: zone.clone(),
                        name: req.name.clone(),
                        record_type: "A".to_string(),
                        value: fip.address.clone(),
                        ttl: DEFAULT_DNS_TTL,
                    })
                    .await?;
                (Some(record.id.clone()), Some(record.fqdn()))
            }
            None => (None, None),
        };

        Ok(ProvisionedServer {
            name: req.name.clone(),
            security_group_id: group.id,
            instance_id: instance.id,
            private_ip: instance.ip_address,
            floating_ip_id: fip.id,
            public_ip: fip.address,
            dns_record_id,
            fqdn,
        })
    }

    async fn rollback(&self, created: Created) {
        if let Some(id) = created.floating_ip {
            if let Err(e) = self.client.delete_floating_ip(&id).await {
                warn!(floating_ip = %id, error = %e, "rollback: floating ip not deleted");
            }
        }
        if let Some(id) = created.instance {
            if let Err(e) = self.client.delete_instance(&id).await {
                warn!(instance = %id, error = %e, "rollback: instance not deleted");
            }
        }
        if let Some(id) = created.security_group {
            if let Err(e) = self.client.delete_security_group(&id).await {
                warn!(security_group = %id, error = %e, "rollback: security group not deleted");
            }
        }
    }

    /// Tear down a provisioned server. Missing pieces are skipped.
    pub async fn decommission(&self, server: &ProvisionedServer) -> InfraResult<()> {
        if let Some(id) = &server.dns_record_id {
            self.client.delete_dns_record(id).await?;
        }
        self.client.delete_floating_ip(&server.floating_ip_id).await?;
        self.client.delete_instance(&server.instance_id).await?;
        self.client.delete_security_group(&server.security_group_id).await?;
        info!(server = %server.name, "server decommissioned");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PollSettings;
    use crate::mock::MockInfraClient;
    use crate::scheduler::TokioScheduler;
    use std::time::Duration;

    fn mock(completion: Duration, poll_attempts: u32) -> Arc<MockInfraClient> {
        Arc::new(MockInfraClient::new(
            Arc::new(TokioScheduler),
            completion,
            PollSettings {
                interval: Duration::from_millis(100),
                attempts: poll_attempts,
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn provisions_full_server_with_dns() {
        let client = mock(Duration::from_millis(250), 10);
        let provisioner = ServerProvisioner::new(client.clone());

        let mut req = ServerRequest::new("web-1", "m1.small", "ubuntu-24.04");
        req.dns_zone = Some("example.net".to_string());
        let server = provisioner.provision(&req).await.unwrap();

        assert!(server.private_ip.is_some());
        assert!(server.public_ip.starts_with("203.0."));
        assert_eq!(server.fqdn.as_deref(), Some("web-1.example.net"));

        let fip = client.get_floating_ip(&server.floating_ip_id).await.unwrap();
        assert_eq!(fip.instance_id.as_deref(), Some(server.instance_id.as_str()));
        let group = client.get_security_group(&server.security_group_id).await.unwrap();
        assert_eq!(group.rules.len(), 3);
        assert_eq!(client.resource_count(), 4);

        provisioner.decommission(&server).await.unwrap();
        assert_eq!(client.resource_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rolls_back_when_instance_never_becomes_active() {
        let client = mock(Duration::from_secs(60), 3);
        let provisioner = ServerProvisioner::new(client.clone());

        let err = provisioner
            .provision(&ServerRequest::new("slow", "m1.small", "ubuntu"))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(client.resource_count(), 0);
    }

    #[tokio::test]
    async fn rejects_empty_name_before_touching_backend() {
        let client = mock(Duration::from_millis(1), 1);
        let provisioner = ServerProvisioner::new(client.clone());

        let err = provisioner
            .provision(&ServerRequest::new(" ", "m1.small", "ubuntu"))
            .await
            .unwrap_err();
        assert!(matches!(err, InfraError::Invalid(_)));
        assert_eq!(client.resource_count(), 0);
    }
}
