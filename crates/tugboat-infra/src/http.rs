//! JSON REST client for the legacy infrastructure API.
//!
//! Endpoints live under `{base_url}/v1/`:
//!
//! ```text
//! POST   /v1/instances                 GET/DELETE /v1/instances/{id}
//! POST   /v1/floating-ips              GET/DELETE /v1/floating-ips/{id}
//! POST   /v1/floating-ips/{id}/attach
//! POST   /v1/security-groups           GET/DELETE /v1/security-groups/{id}
//! POST   /v1/dns-records               GET/DELETE /v1/dns-records/{id}
//! POST   /v1/volumes                   GET/DELETE /v1/volumes/{id}
//! POST   /v1/volumes/{id}/attach
//! ```
//!
//! The legacy API has no container endpoints; container methods return
//! [`InfraError::NotImplemented`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::client::{InfrastructureClient, PollSettings, poll_status};
use crate::error::{InfraError, InfraResult};
use crate::types::*;

const INSTANCES: &str = "instances";
const FLOATING_IPS: &str = "floating-ips";
const SECURITY_GROUPS: &str = "security-groups";
const DNS_RECORDS: &str = "dns-records";
const VOLUMES: &str = "volumes";

#[derive(Serialize)]
struct AttachBody<'a> {
    instance_id: &'a str,
}

/// [`InfrastructureClient`] backed by the legacy infrastructure HTTP API.
#[derive(Debug, Clone)]
pub struct HttpInfraClient {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    poll: PollSettings,
}

impl HttpInfraClient {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        request_timeout: Duration,
        poll: PollSettings,
    ) -> InfraResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("tugboat/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            poll,
        })
    }

    fn url(&self, collection: &str, id: Option<&str>, action: Option<&str>) -> String {
        let mut url = format!("{}/v1/{collection}", self.base_url);
        if let Some(id) = id {
            url.push('/');
            url.push_str(id);
        }
        if let Some(action) = action {
            url.push('/');
            url.push_str(action);
        }
        url
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(resp: Response, kind: &'static str, id: &str) -> InfraResult<Response> {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(InfraError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(InfraError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }

    async fn create<B, T>(&self, collection: &str, body: &B) -> InfraResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned + Resource,
    {
        let url = self.url(collection, None, None);
        let resp = self.request(Method::POST, &url).json(body).send().await?;
        let resource: T = Self::check(resp, T::KIND, "").await?.json().await?;
        info!(kind = T::KIND, id = %resource.id(), "created via infra API");
        Ok(resource)
    }

    async fn fetch<T>(&self, collection: &str, id: &str) -> InfraResult<T>
    where
        T: DeserializeOwned + Resource,
    {
        let url = self.url(collection, Some(id), None);
        let resp = self.request(Method::GET, &url).send().await?;
        Ok(Self::check(resp, T::KIND, id).await?.json().await?)
    }

    async fn action<T>(&self, collection: &str, id: &str, action: &str, instance_id: &str) -> InfraResult<T>
    where
        T: DeserializeOwned + Resource,
    {
        let url = self.url(collection, Some(id), Some(action));
        let resp = self
            .request(Method::POST, &url)
            .json(&AttachBody { instance_id })
            .send()
            .await?;
        Ok(Self::check(resp, T::KIND, id).await?.json().await?)
    }

    /// DELETE, treating 404 as already gone.
    async fn remove(&self, collection: &str, kind: &'static str, id: &str) -> InfraResult<()> {
        let url = self.url(collection, Some(id), None);
        let resp = self.request(Method::DELETE, &url).send().await?;
        match Self::check(resp, kind, id).await {
            Ok(_) => {
                info!(%kind, %id, "deleted via infra API");
                Ok(())
            }
            Err(InfraError::NotFound { .. }) => {
                debug!(%kind, %id, "already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn containers_unsupported(op: &str) -> InfraError {
        InfraError::NotImplemented(format!(
            "{op}: the legacy infrastructure API has no container endpoints"
        ))
    }
}

#[async_trait]
impl InfrastructureClient for HttpInfraClient {
    async fn create_instance(&self, req: &CreateInstanceRequest) -> InfraResult<Instance> {
        self.create(INSTANCES, req).await
    }

    async fn get_instance(&self, id: &str) -> InfraResult<Instance> {
        self.fetch(INSTANCES, id).await
    }

    async fn delete_instance(&self, id: &str) -> InfraResult<()> {
        self.remove(INSTANCES, Instance::KIND, id).await
    }

    async fn wait_for_instance_status(&self, id: &str, target: &str) -> InfraResult<Instance> {
        poll_status(id, target, self.poll, || self.get_instance(id)).await
    }

    async fn create_floating_ip(&self, req: &CreateFloatingIpRequest) -> InfraResult<FloatingIp> {
        self.create(FLOATING_IPS, req).await
    }

    async fn get_floating_ip(&self, id: &str) -> InfraResult<FloatingIp> {
        self.fetch(FLOATING_IPS, id).await
    }

    async fn attach_floating_ip(&self, id: &str, instance_id: &str) -> InfraResult<FloatingIp> {
        self.action(FLOATING_IPS, id, "attach", instance_id).await
    }

    async fn delete_floating_ip(&self, id: &str) -> InfraResult<()> {
        self.remove(FLOATING_IPS, FloatingIp::KIND, id).await
    }

    async fn create_security_group(
        &self,
        req: &CreateSecurityGroupRequest,
    ) -> InfraResult<SecurityGroup> {
        self.create(SECURITY_GROUPS, req).await
    }

    async fn get_security_group(&self, id: &str) -> InfraResult<SecurityGroup> {
        self.fetch(SECURITY_GROUPS, id).await
    }

    async fn delete_security_group(&self, id: &str) -> InfraResult<()> {
        self.remove(SECURITY_GROUPS, SecurityGroup::KIND, id).await
    }

    async fn create_dns_record(&self, req: &CreateDnsRecordRequest) -> InfraResult<DnsRecord> {
        self.create(DNS_RECORDS, req).await
    }

    async fn get_dns_record(&self, id: &str) -> InfraResult<DnsRecord> {
        self.fetch(DNS_RECORDS, id).await
    }

    async fn delete_dns_record(&self, id: &str) -> InfraResult<()> {
        self.remove(DNS_RECORDS, DnsRecord::KIND, id).await
    }

    async fn create_container(&self, _req: &CreateContainerRequest) -> InfraResult<Container> {
        Err(Self::containers_unsupported("create_container"))
    }

    async fn get_container(&self, _id: &str) -> InfraResult<Container> {
        Err(Self::containers_unsupported("get_container"))
    }

    async fn stop_container(&self, _id: &str) -> InfraResult<Container> {
        Err(Self::containers_unsupported("stop_container"))
    }

    async fn delete_container(&self, _id: &str) -> InfraResult<()> {
        Err(Self::containers_unsupported("delete_container"))
    }

    async fn wait_for_container_status(&self, _id: &str, _target: &str) -> InfraResult<Container> {
        Err(Self::containers_unsupported("wait_for_container_status"))
    }

    async fn create_volume(&self, req: &CreateVolumeRequest) -> InfraResult<Volume> {
        self.create(VOLUMES, req).await
    }

    async fn get_volume(&self, id: &str) -> InfraResult<Volume> {
        self.fetch(VOLUMES, id).await
    }

    async fn attach_volume(&self, id: &str, instance_id: &str) -> InfraResult<Volume> {
        self.action(VOLUMES, id, "attach", instance_id).await
    }

    async fn delete_volume(&self, id: &str) -> InfraResult<()> {
        self.remove(VOLUMES, Volume::KIND, id).await
    }
}
