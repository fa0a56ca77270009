//! Retry and circuit-breaker decorator over any [`InfrastructureClient`].
//!
//! Every call runs as `breaker.call(retry.run(inner.op()))`. Errors the
//! inner client reports as transient are retried; the breaker sees the
//! final outcome of each retry loop, not the individual attempts.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};
use tugboat_resilience::{
    BreakerConfig, BreakerError, CircuitBreaker, Context, Failure, RetryError, RetryExecutor,
    RetryPolicy,
};

use crate::client::InfrastructureClient;
use crate::error::{InfraError, InfraResult};
use crate::types::*;

const SHARED_BREAKER: &str = "infra";

enum Breakers {
    Shared(Arc<CircuitBreaker>),
    PerOperation {
        config: BreakerConfig,
        by_op: Mutex<HashMap<&'static str, Arc<CircuitBreaker>>>,
    },
}

impl Breakers {
    fn for_op(&self, op: &'static str) -> Arc<CircuitBreaker> {
        match self {
            Breakers::Shared(breaker) => Arc::clone(breaker),
            Breakers::PerOperation { config, by_op } => Arc::clone(
                by_op
                    .lock()
                    .entry(op)
                    .or_insert_with(|| Arc::new(CircuitBreaker::new(op, config.clone()))),
            ),
        }
    }
}

// Retry only what the inner client reports as transient rather than every
// failure, so not-found and validation errors surface on the first attempt.
fn classify(err: InfraError) -> Failure<InfraError> {
    if err.is_transient() {
        Failure::retryable(err)
    } else {
        Failure::permanent(err)
    }
}

fn flatten(op: &'static str, err: BreakerError<RetryError<InfraError>>) -> InfraError {
    match err {
        BreakerError::Open { name } => {
            warn!(%op, breaker = %name, "call rejected by open circuit");
            InfraError::CircuitOpen { breaker: name }
        }
        BreakerError::Inner(RetryError::Permanent(e)) => e,
        BreakerError::Inner(RetryError::Exhausted { attempts, last }) => {
            InfraError::RetriesExhausted {
                attempts,
                source: Box::new(last),
            }
        }
        BreakerError::Inner(RetryError::Cancelled) => InfraError::Cancelled,
    }
}

/// [`InfrastructureClient`] decorator adding retries and circuit breaking.
pub struct ResilientClient {
    inner: Arc<dyn InfrastructureClient>,
    retry: RetryExecutor,
    breakers: Breakers,
    ctx: Context,
}

impl ResilientClient {
    /// One breaker guards every operation.
    pub fn shared(
        inner: Arc<dyn InfrastructureClient>,
        policy: RetryPolicy,
        breaker: BreakerConfig,
    ) -> Self {
        Self {
            inner,
            retry: RetryExecutor::new(policy),
            breakers: Breakers::Shared(Arc::new(CircuitBreaker::new(SHARED_BREAKER, breaker))),
            ctx: Context::background(),
        }
    }

    /// Each operation name gets its own breaker, created on first use.
    pub fn per_operation(
        inner: Arc<dyn InfrastructureClient>,
        policy: RetryPolicy,
        breaker: BreakerConfig,
    ) -> Self {
        Self {
            inner,
            retry: RetryExecutor::new(policy),
            breakers: Breakers::PerOperation {
                config: breaker,
                by_op: Mutex::new(HashMap::new()),
            },
            ctx: Context::background(),
        }
    }

    /// Abort pending backoff sleeps when `ctx` is cancelled.
    pub fn with_context(mut self, ctx: Context) -> Self {
        self.ctx = ctx;
        self
    }

    /// The breaker guarding `op`.
    pub fn breaker(&self, op: &'static str) -> Arc<CircuitBreaker> {
        self.breakers.for_op(op)
    }

    async fn guarded<T, F, Fut>(&self, op: &'static str, call: F) -> InfraResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = InfraResult<T>>,
    {
        let breaker = self.breakers.for_op(op);
        let retry = &self.retry;
        let ctx = &self.ctx;
        let call = &call;

        let result = breaker
            .call(move || retry.run(ctx, move || async move { call().await.map_err(classify) }))
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                let err = flatten(op, err);
                debug!(%op, error = %err, "guarded infra call failed");
                Err(err)
            }
        }
    }
}

#[async_trait]
impl InfrastructureClient for ResilientClient {
    async fn create_instance(&self, req: &CreateInstanceRequest) -> InfraResult<Instance> {
        self.guarded("create_instance", || self.inner.create_instance(req)).await
    }

    async fn get_instance(&self, id: &str) -> InfraResult<Instance> {
        self.guarded("get_instance", || self.inner.get_instance(id)).await
    }

    async fn delete_instance(&self, id: &str) -> InfraResult<()> {
        self.guarded("delete_instance", || self.inner.delete_instance(id)).await
    }

    async fn wait_for_instance_status(&self, id: &str, target: &str) -> InfraResult<Instance> {
        self.guarded("wait_for_instance_status", || {
            self.inner.wait_for_instance_status(id, target)
        })
        .await
    }

    async fn create_floating_ip(&self, req: &CreateFloatingIpRequest) -> InfraResult<FloatingIp> {
        self.guarded("create_floating_ip", || self.inner.create_floating_ip(req)).await
    }

    async fn get_floating_ip(&self, id: &str) -> InfraResult<FloatingIp> {
        self.guarded("get_floating_ip", || self.inner.get_floating_ip(id)).await
    }

    async fn attach_floating_ip(&self, id: &str, instance_id: &str) -> InfraResult<FloatingIp> {
        self.guarded("attach_floating_ip", || {
            self.inner.attach_floating_ip(id, instance_id)
        })
        .await
    }

    async fn delete_floating_ip(&self, id: &str) -> InfraResult<()> {
        self.guarded("delete_floating_ip", || self.inner.delete_floating_ip(id)).await
    }

    async fn create_security_group(
        &self,
        req: &CreateSecurityGroupRequest,
    ) -> InfraResult<SecurityGroup> {
        self.guarded("create_security_group", || self.inner.create_security_group(req)).await
    }

    async fn get_security_group(&self, id: &str) -> InfraResult<SecurityGroup> {
        self.guarded("get_security_group", || self.inner.get_security_group(id)).await
    }

    async fn delete_security_group(&self, id: &str) -> InfraResult<()> {
        self.guarded("delete_security_group", || self.inner.delete_security_group(id)).await
    }

    async fn create_dns_record(&self, req: &CreateDnsRecordRequest) -> InfraResult<DnsRecord> {
        self.guarded("create_dns_record", || self.inner.create_dns_record(req)).await
    }

    async fn get_dns_record(&self, id: &str) -> InfraResult<DnsRecord> {
        self.guarded("get_dns_record", || self.inner.get_dns_record(id)).await
    }

    async fn delete_dns_record(&self, id: &str) -> InfraResult<()> {
        self.guarded("delete_dns_record", || self.inner.delete_dns_record(id)).await
    }

    async fn create_container(&self, req: &CreateContainerRequest) -> InfraResult<Container> {
        self.guarded("create_container", || self.inner.create_container(req)).await
    }

    async fn get_container(&self, id: &str) -> InfraResult<Container> {
        self.guarded("get_container", || self.inner.get_container(id)).await
    }

    async fn stop_container(&self, id: &str) -> InfraResult<Container> {
        self.guarded("stop_container", || self.inner.stop_container(id)).await
    }

    async fn delete_container(&self, id: &str) -> InfraResult<()> {
        self.guarded("delete_container", || self.inner.delete_container(id)).await
    }

    async fn wait_for_container_status(&self, id: &str, target: &str) -> InfraResult<Container> {
        self.guarded("wait_for_container_status", || {
            self.inner.wait_for_container_status(id, target)
        })
        .await
    }

    async fn create_volume(&self, req: &CreateVolumeRequest) -> InfraResult<Volume> {
        self.guarded("create_volume", || self.inner.create_volume(req)).await
    }

    async fn get_volume(&self, id: &str) -> InfraResult<Volume> {
        self.guarded("get_volume", || self.inner.get_volume(id)).await
    }

    async fn attach_volume(&self, id: &str, instance_id: &str) -> InfraResult<Volume> {
        self.guarded("attach_volume", || self.inner.attach_volume(id, instance_id)).await
    }

    async fn delete_volume(&self, id: &str) -> InfraResult<()> {
        self.guarded("delete_volume", || self.inner.delete_volume(id)).await
    }
}
