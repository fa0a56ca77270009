//! The `InfrastructureClient` capability trait and shared polling.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{InfraError, InfraResult};
use crate::types::*;

/// Fixed-interval, fixed-attempt status polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            attempts: 30,
        }
    }
}

/// Capability interface over the infrastructure backend.
///
/// Implementations must treat deletion of an absent resource as success.
#[async_trait]
pub trait InfrastructureClient: Send + Sync {
    // ── Instances ──
    async fn create_instance(&self, req: &CreateInstanceRequest) -> InfraResult<Instance>;
    async fn get_instance(&self, id: &str) -> InfraResult<Instance>;
    async fn delete_instance(&self, id: &str) -> InfraResult<()>;
    async fn wait_for_instance_status(&self, id: &str, target: &str) -> InfraResult<Instance>;

    // ── Floating IPs ──
    async fn create_floating_ip(&self, req: &CreateFloatingIpRequest) -> InfraResult<FloatingIp>;
    async fn get_floating_ip(&self, id: &str) -> InfraResult<FloatingIp>;
    async fn attach_floating_ip(&self, id: &str, instance_id: &str) -> InfraResult<FloatingIp>;
    async fn delete_floating_ip(&self, id: &str) -> InfraResult<()>;

    // ── Security groups ──
    async fn create_security_group(
        &self,
        req: &CreateSecurityGroupRequest,
    ) -> InfraResult<SecurityGroup>;
    async fn get_security_group(&self, id: &str) -> InfraResult<SecurityGroup>;
    async fn delete_security_group(&self, id: &str) -> InfraResult<()>;

    // ── DNS ──
    async fn create_dns_record(&self, req: &CreateDnsRecordRequest) -> InfraResult<DnsRecord>;
    async fn get_dns_record(&self, id: &str) -> InfraResult<DnsRecord>;
    async fn delete_dns_record(&self, id: &str) -> InfraResult<()>;

    // ── Containers ──
    async fn create_container(&self, req: &CreateContainerRequest) -> InfraResult<Container>;
    async fn get_container(&self, id: &str) -> InfraResult<Container>;
    async fn stop_container(&self, id: &str) -> InfraResult<Container>;
    async fn delete_container(&self, id: &str) -> InfraResult<()>;
    async fn wait_for_container_status(&self, id: &str, target: &str) -> InfraResult<Container>;

    // ── Volumes ──
    async fn create_volume(&self, req: &CreateVolumeRequest) -> InfraResult<Volume>;
    async fn get_volume(&self, id: &str) -> InfraResult<Volume>;
    async fn attach_volume(&self, id: &str, instance_id: &str) -> InfraResult<Volume>;
    async fn delete_volume(&self, id: &str) -> InfraResult<()>;
}

/// Poll `fetch` until the resource reports `target`.
///
/// Returns `ProvisioningFailed` as soon as a failure status shows up and
/// `Timeout` once `settings.attempts` polls pass without a match.
pub async fn poll_status<T, F, Fut>(
    id: &str,
    target: &str,
    settings: PollSettings,
    mut fetch: F,
) -> InfraResult<T>
where
    T: Resource,
    F: FnMut() -> Fut,
    Fut: Future<Output = InfraResult<T>>,
{
    let mut last_status = String::new();
    for attempt in 1..=settings.attempts {
        let resource = fetch().await?;
        if resource.status() == target {
            debug!(kind = T::KIND, %id, %target, attempt, "target status reached");
            return Ok(resource);
        }
        if status::is_failure(resource.status()) {
            return Err(InfraError::ProvisioningFailed {
                kind: T::KIND,
                id: id.to_string(),
                status: resource.status().to_string(),
            });
        }
        last_status = resource.status().to_string();
        debug!(kind = T::KIND, %id, status = %last_status, %target, attempt, "waiting for status");
        if attempt < settings.attempts {
            tokio::time::sleep(settings.interval).await;
        }
    }
    Err(InfraError::Timeout {
        kind: T::KIND,
        id: id.to_string(),
        target: target.to_string(),
        attempts: settings.attempts,
        last_status,
    })
}
