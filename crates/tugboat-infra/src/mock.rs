//! In-memory infrastructure backend.
//!
//! `create_*` stores the resource in a transitional status and schedules a
//! completion that flips it to its terminal status after
//! `completion_delay`. Callers that need the terminal status must use the
//! `wait_for_*_status` polling methods.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::{InfrastructureClient, PollSettings, poll_status};
use crate::error::{InfraError, InfraResult};
use crate::scheduler::{CompletionScheduler, TokioScheduler};
use crate::types::*;

#[derive(Default)]
struct MockState {
    instances: HashMap<String, Instance>,
    floating_ips: HashMap<String, FloatingIp>,
    security_groups: HashMap<String, SecurityGroup>,
    dns_records: HashMap<String, DnsRecord>,
    containers: HashMap<String, Container>,
    volumes: HashMap<String, Volume>,
    next_address: u32,
}

impl MockState {
    fn allocate_address(&mut self, prefix: &str) -> String {
        self.next_address += 1;
        let n = self.next_address;
        format!("{prefix}.{}.{}", (n >> 8) & 0xff, n & 0xff)
    }
}

/// In-memory [`InfrastructureClient`] with simulated async provisioning.
pub struct MockInfraClient {
    state: Arc<Mutex<MockState>>,
    scheduler: Arc<dyn CompletionScheduler>,
    completion_delay: Duration,
    poll: PollSettings,
    injected_failures: AtomicU32,
}

impl Default for MockInfraClient {
    fn default() -> Self {
        Self::new(Arc::new(TokioScheduler), Duration::from_secs(2), PollSettings::default())
    }
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

fn not_found(kind: &'static str, id: &str) -> InfraError {
    InfraError::NotFound {
        kind,
        id: id.to_string(),
    }
}

impl MockInfraClient {
    pub fn new(
        scheduler: Arc<dyn CompletionScheduler>,
        completion_delay: Duration,
        poll: PollSettings,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            scheduler,
            completion_delay,
            poll,
            injected_failures: AtomicU32::new(0),
        }
    }

    /// Make the next `n` calls fail with a transient backend error.
    pub fn fail_next(&self, n: u32) {
        self.injected_failures.store(n, Ordering::SeqCst);
    }

    /// Total resources currently held, across all families.
    pub fn resource_count(&self) -> usize {
        let state = self.state.lock();
        state.instances.len()
            + state.floating_ips.len()
            + state.security_groups.len()
            + state.dns_records.len()
            + state.containers.len()
            + state.volumes.len()
    }

    fn check_injected(&self, op: &str) -> InfraResult<()> {
        let took = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            debug!(%op, "injected mock failure");
            return Err(InfraError::Backend(format!("injected failure in {op}")));
        }
        Ok(())
    }

    /// Schedule `complete` against the shared state after the completion delay.
    fn complete_later<F>(&self, complete: F)
    where
        F: FnOnce(&mut MockState) + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        self.scheduler.schedule(
            self.completion_delay,
            Box::new(move || complete(&mut state.lock())),
        );
    }
}

#[async_trait]
impl InfrastructureClient for MockInfraClient {
    // ── Instances ──────────────────────────────────────────────────

    async fn create_instance(&self, req: &CreateInstanceRequest) -> InfraResult<Instance> {
        self.check_injected("create_instance")?;
        if req.name.trim().is_empty() {
            return Err(InfraError::Invalid("instance name is required".to_string()));
        }
        let instance = Instance {
            id: new_id("inst"),
            name: req.name.clone(),
            status: status::BUILDING.to_string(),
            flavor: req.flavor.clone(),
            image: req.image.clone(),
            ip_address: None,
            security_group_ids: req.security_group_ids.clone(),
            created_at: Utc::now(),
        };
        self.state
            .lock()
            .instances
            .insert(instance.id.clone(), instance.clone());

        let id = instance.id.clone();
        self.complete_later(move |state| {
            let address = state.allocate_address("10.0");
            if let Some(inst) = state.instances.get_mut(&id) {
                if inst.status == status::BUILDING {
                    inst.status = status::ACTIVE.to_string();
                    inst.ip_address = Some(address);
                    debug!(instance = %id, "mock instance active");
                }
            }
        });

        info!(instance = %instance.id, name = %instance.name, "mock instance created");
        Ok(instance)
    }

    async fn get_instance(&self, id: &str) -> InfraResult<Instance> {
        self.check_injected("get_instance")?;
        self.state
            .lock()
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(Instance::KIND, id))
    }

    async fn delete_instance(&self, id: &str) -> InfraResult<()> {
        self.check_injected("delete_instance")?;
        if self.state.lock().instances.remove(id).is_some() {
            info!(instance = %id, "mock instance deleted");
        }
        Ok(())
    }

    async fn wait_for_instance_status(&self, id: &str, target: &str) -> InfraResult<Instance> {
        poll_status(id, target, self.poll, || self.get_instance(id)).await
    }

    // ── Floating IPs ───────────────────────────────────────────────

    async fn create_floating_ip(&self, req: &CreateFloatingIpRequest) -> InfraResult<FloatingIp> {
        self.check_injected("create_floating_ip")?;
        let mut state = self.state.lock();
        let fip = FloatingIp {
            id: new_id("fip"),
            address: state.allocate_address("203.0"),
            status: status::ACTIVE.to_string(),
            pool: req.pool.clone(),
            instance_id: None,
        };
        state.floating_ips.insert(fip.id.clone(), fip.clone());
        Ok(fip)
    }

    async fn get_floating_ip(&self, id: &str) -> InfraResult<FloatingIp> {
        self.check_injected("get_floating_ip")?;
        self.state
            .lock()
            .floating_ips
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(FloatingIp::KIND, id))
    }

    async fn attach_floating_ip(&self, id: &str, instance_id: &str) -> InfraResult<FloatingIp> {
        self.check_injected("attach_floating_ip")?;
        let mut state = self.state.lock();
        if !state.instances.contains_key(instance_id) {
            return Err(not_found(Instance::KIND, instance_id));
        }
        let fip = state
            .floating_ips
            .get_mut(id)
            .ok_or_else(|| not_found(FloatingIp::KIND, id))?;
        fip.instance_id = Some(instance_id.to_string());
        Ok(fip.clone())
    }

    async fn delete_floating_ip(&self, id: &str) -> InfraResult<()> {
        self.check_injected("delete_floating_ip")?;
        self.state.lock().floating_ips.remove(id);
        Ok(())
    }

    // ── Security groups ────────────────────────────────────────────

    async fn create_security_group(
        &self,
        req: &CreateSecurityGroupRequest,
    ) -> InfraResult<SecurityGroup> {
        self.check_injected("create_security_group")?;
        let group = SecurityGroup {
            id: new_id("sg"),
            name: req.name.clone(),
            status: status::ACTIVE.to_string(),
            rules: req.rules.clone(),
        };
        self.state
            .lock()
            .security_groups
            .insert(group.id.clone(), group.clone());
        Ok(group)
    }

    async fn get_security_group(&self, id: &str) -> InfraResult<SecurityGroup> {
        self.check_injected("get_security_group")?;
        self.state
            .lock()
            .security_groups
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(SecurityGroup::KIND, id))
    }

    async fn delete_security_group(&self, id: &str) -> InfraResult<()> {
        self.check_injected("delete_security_group")?;
        self.state.lock().security_groups.remove(id);
        Ok(())
    }

    // ── DNS ────────────────────────────────────────────────────────

    async fn create_dns_record(&self, req: &CreateDnsRecordRequest) -> InfraResult<DnsRecord> {
        self.check_injected("create_dns_record")?;
        let record = DnsRecord {
            id: new_id("dns"),
            zone: req.zone.clone(),
            name: req.name.clone(),
            record_type: req.record_type.clone(),
            value: req.value.clone(),
            ttl: req.ttl,
            status: status::ACTIVE.to_string(),
        };
        self.state
            .lock()
            .dns_records
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_dns_record(&self, id: &str) -> InfraResult<DnsRecord> {
        self.check_injected("get_dns_record")?;
        self.state
            .lock()
            .dns_records
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(DnsRecord::KIND, id))
    }

    async fn delete_dns_record(&self, id: &str) -> InfraResult<()> {
        self.check_injected("delete_dns_record")?;
        self.state.lock().dns_records.remove(id);
        Ok(())
    }

    // ── Containers ─────────────────────────────────────────────────

    async fn create_container(&self, req: &CreateContainerRequest) -> InfraResult<Container> {
        self.check_injected("create_container")?;
        let container = Container {
            id: new_id("ctr"),
            name: req.name.clone(),
            image: req.image.clone(),
            status: status::CREATING.to_string(),
            ports: req.ports.clone(),
            env: req.env.clone(),
        };
        self.state
            .lock()
            .containers
            .insert(container.id.clone(), container.clone());

        let id = container.id.clone();
        self.complete_later(move |state| {
            if let Some(ctr) = state.containers.get_mut(&id) {
                if ctr.status == status::CREATING {
                    ctr.status = status::RUNNING.to_string();
                    debug!(container = %id, "mock container running");
                }
            }
        });

        info!(container = %container.id, image = %container.image, "mock container created");
        Ok(container)
    }

    async fn get_container(&self, id: &str) -> InfraResult<Container> {
        self.check_injected("get_container")?;
        self.state
            .lock()
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(Container::KIND, id))
    }

    async fn stop_container(&self, id: &str) -> InfraResult<Container> {
        self.check_injected("stop_container")?;
        let mut state = self.state.lock();
        let ctr = state
            .containers
            .get_mut(id)
            .ok_or_else(|| not_found(Container::KIND, id))?;
        ctr.status = status::STOPPED.to_string();
        Ok(ctr.clone())
    }

    async fn delete_container(&self, id: &str) -> InfraResult<()> {
        self.check_injected("delete_container")?;
        self.state.lock().containers.remove(id);
        Ok(())
    }

    async fn wait_for_container_status(&self, id: &str, target: &str) -> InfraResult<Container> {
        poll_status(id, target, self.poll, || self.get_container(id)).await
    }

    // ── Volumes ────────────────────────────────────────────────────

    async fn create_volume(&self, req: &CreateVolumeRequest) -> InfraResult<Volume> {
        self.check_injected("create_volume")?;
        if req.size_gb == 0 {
            return Err(InfraError::Invalid("volume size must be at least 1 GB".to_string()));
        }
        let volume = Volume {
            id: new_id("vol"),
            name: req.name.clone(),
            size_gb: req.size_gb,
            status: status::CREATING.to_string(),
            attached_to: None,
        };
        self.state
            .lock()
            .volumes
            .insert(volume.id.clone(), volume.clone());

        let id = volume.id.clone();
        self.complete_later(move |state| {
            if let Some(vol) = state.volumes.get_mut(&id) {
                if vol.status == status::CREATING {
                    vol.status = status::AVAILABLE.to_string();
                }
            }
        });
        Ok(volume)
    }

    async fn get_volume(&self, id: &str) -> InfraResult<Volume> {
        self.check_injected("get_volume")?;
        self.state
            .lock()
            .volumes
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(Volume::KIND, id))
    }

    async fn attach_volume(&self, id: &str, instance_id: &str) -> InfraResult<Volume> {
        self.check_injected("attach_volume")?;
        let mut state = self.state.lock();
        if !state.instances.contains_key(instance_id) {
            return Err(not_found(Instance::KIND, instance_id));
        }
        let vol = state
            .volumes
            .get_mut(id)
            .ok_or_else(|| not_found(Volume::KIND, id))?;
        vol.status = status::IN_USE.to_string();
        vol.attached_to = Some(instance_id.to_string());
        Ok(vol.clone())
    }

    async fn delete_volume(&self, id: &str) -> InfraResult<()> {
        self.check_injected("delete_volume")?;
        self.state.lock().volumes.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;

    fn manual_client() -> (MockInfraClient, Arc<ManualScheduler>) {
        let scheduler = Arc::new(ManualScheduler::new());
        let client = MockInfraClient::new(
            scheduler.clone(),
            Duration::from_secs(2),
            PollSettings {
                interval: Duration::from_millis(10),
                attempts: 3,
            },
        );
        (client, scheduler)
    }

    fn instance_request(name: &str) -> CreateInstanceRequest {
        CreateInstanceRequest {
            name: name.to_string(),
            flavor: "m1.small".to_string(),
            image: "ubuntu-24.04".to_string(),
            security_group_ids: vec![],
            user_data: None,
        }
    }

    #[tokio::test]
    async fn instance_starts_building_and_completes_when_clock_advances() {
        let (client, scheduler) = manual_client();
        let inst = client.create_instance(&instance_request("web")).await.unwrap();
        assert_eq!(inst.status, status::BUILDING);
        assert!(inst.ip_address.is_none());

        scheduler.advance(Duration::from_secs(1));
        assert_eq!(client.get_instance(&inst.id).await.unwrap().status, status::BUILDING);

        scheduler.advance(Duration::from_secs(1));
        let active = client
            .wait_for_instance_status(&inst.id, status::ACTIVE)
            .await
            .unwrap();
        assert!(active.ip_address.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_when_status_never_reached() {
        let (client, _scheduler) = manual_client();
        let inst = client.create_instance(&instance_request("web")).await.unwrap();

        let err = client
            .wait_for_instance_status(&inst.id, status::ACTIVE)
            .await
            .unwrap_err();
        match err {
            InfraError::Timeout { attempts, last_status, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_status, status::BUILDING);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_completes_container() {
        let client = MockInfraClient::new(
            Arc::new(TokioScheduler),
            Duration::from_millis(50),
            PollSettings {
                interval: Duration::from_millis(20),
                attempts: 10,
            },
        );
        let ctr = client
            .create_container(&CreateContainerRequest {
                name: "worker".to_string(),
                image: "busybox".to_string(),
                ports: vec![8080],
                env: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(ctr.status, status::CREATING);

        let running = client
            .wait_for_container_status(&ctr.id, status::RUNNING)
            .await
            .unwrap();
        assert_eq!(running.status, status::RUNNING);

        let stopped = client.stop_container(&ctr.id).await.unwrap();
        assert_eq!(stopped.status, status::STOPPED);
    }

    #[tokio::test]
    async fn delete_of_missing_resources_is_ok() {
        let (client, _) = manual_client();
        client.delete_instance("inst-missing").await.unwrap();
        client.delete_floating_ip("fip-missing").await.unwrap();
        client.delete_security_group("sg-missing").await.unwrap();
        client.delete_dns_record("dns-missing").await.unwrap();
        client.delete_container("ctr-missing").await.unwrap();
        client.delete_volume("vol-missing").await.unwrap();
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (client, _) = manual_client();
        assert!(client.get_instance("nope").await.unwrap_err().is_not_found());
        assert!(client.get_volume("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn floating_ip_attaches_to_existing_instance_only() {
        let (client, _) = manual_client();
        let inst = client.create_instance(&instance_request("db")).await.unwrap();
        let fip = client
            .create_floating_ip(&CreateFloatingIpRequest { pool: "public".into() })
            .await
            .unwrap();

        let attached = client.attach_floating_ip(&fip.id, &inst.id).await.unwrap();
        assert_eq!(attached.instance_id.as_deref(), Some(inst.id.as_str()));

        let err = client.attach_floating_ip(&fip.id, "inst-gone").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn volume_lifecycle() {
        let (client, scheduler) = manual_client();
        let inst = client.create_instance(&instance_request("app")).await.unwrap();
        let vol = client
            .create_volume(&CreateVolumeRequest { name: "data".into(), size_gb: 10 })
            .await
            .unwrap();
        assert_eq!(vol.status, status::CREATING);
        scheduler.run_all();
        assert_eq!(client.get_volume(&vol.id).await.unwrap().status, status::AVAILABLE);

        let attached = client.attach_volume(&vol.id, &inst.id).await.unwrap();
        assert_eq!(attached.status, status::IN_USE);

        client.delete_volume(&vol.id).await.unwrap();
        assert!(client.get_volume(&vol.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let (client, _) = manual_client();
        client.fail_next(2);
        assert!(client.create_instance(&instance_request("a")).await.is_err());
        assert!(client.create_instance(&instance_request("b")).await.is_err());
        assert!(client.create_instance(&instance_request("c")).await.is_ok());
        assert_eq!(client.resource_count(), 1);
    }

    #[tokio::test]
    async fn deleted_instance_is_not_resurrected_by_completion() {
        let (client, scheduler) = manual_client();
        let inst = client.create_instance(&instance_request("tmp")).await.unwrap();
        client.delete_instance(&inst.id).await.unwrap();
        scheduler.run_all();
        assert!(client.get_instance(&inst.id).await.unwrap_err().is_not_found());
    }
}
