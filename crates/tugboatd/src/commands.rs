//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use k8s_openapi::api::apps::v1::Deployment;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tugboat_cluster::{
    ClusterApi, ClusterOrchestrator, InMemoryCluster, KubeCluster, WorkloadSpec,
};
use tugboat_core::{BreakerScope, InfraBackend, TugboatConfig};
use tugboat_infra::{
    HttpInfraClient, InfrastructureClient, MockInfraClient, PollSettings, ResilientClient,
    ServerProvisioner, ServerRequest, TokioScheduler,
};
use tugboat_pipeline::{
    BroadcastPublisher, DeploymentRun, MockBuildClient, PipelineDriver, PipelineEvent, Trigger,
};
use tugboat_resilience::{CancelHandle, Context};

use crate::ClusterTarget;

/// How often the in-memory cluster "kubelet" marks new rollouts ready.
const SIMULATED_ROLLOUT_TICK: Duration = Duration::from_millis(50);

pub fn load_config(path: &Path) -> anyhow::Result<TugboatConfig> {
    TugboatConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

pub fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    info!(
        path = %path.display(),
        backend = ?config.infra.backend,
        breaker_scope = ?config.resilience.breaker.scope,
        naming = ?config.cluster.naming,
        "configuration is valid"
    );
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Cancel `ctx` on Ctrl-C.
fn cancel_on_ctrl_c() -> (Context, JoinHandle<()>) {
    let (ctx, handle): (Context, CancelHandle) = Context::with_cancel();
    let task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            handle.cancel();
        }
    });
    (ctx, task)
}

pub async fn deploy(
    config_path: &Path,
    workload_path: &Path,
    target: ClusterTarget,
    commit: Option<String>,
    registry: String,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let raw = std::fs::read_to_string(workload_path)
        .with_context(|| format!("reading {}", workload_path.display()))?;
    let workload: WorkloadSpec = toml::from_str(&raw)
        .with_context(|| format!("parsing {}", workload_path.display()))?;
    workload.validate()?;

    let commit = commit.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    let run = DeploymentRun::new(workload.service_id.clone(), commit, Trigger::Manual);

    let finished = match target {
        ClusterTarget::Memory => {
            let cluster = Arc::new(InMemoryCluster::new());
            let orch = ClusterOrchestrator::new(Arc::clone(&cluster), config.cluster.clone());
            let kubelet = simulate_rollout(
                cluster,
                orch.namespace_name(&workload.project_id),
                orch.names().workload(&workload.service_id),
            );
            let result = run_pipeline(&config, orch, run, &workload, registry).await;
            kubelet.abort();
            result?
        }
        ClusterTarget::Kube => {
            let cluster = Arc::new(KubeCluster::try_default().await?);
            let orch = ClusterOrchestrator::new(cluster, config.cluster.clone());
            run_pipeline(&config, orch, run, &workload, registry).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&finished)?);
    Ok(())
}

async fn run_pipeline<C: ClusterApi>(
    config: &TugboatConfig,
    orch: ClusterOrchestrator<C>,
    run: DeploymentRun,
    workload: &WorkloadSpec,
    registry: String,
) -> anyhow::Result<DeploymentRun> {
    let publisher = Arc::new(BroadcastPublisher::default());
    let mut events = publisher.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::StatusChanged { from, to, .. }) => {
                    info!(%from, %to, "status changed")
                }
                Ok(PipelineEvent::Log { line, .. }) => info!(%line, "pipeline"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let driver = PipelineDriver::new(orch, Arc::new(MockBuildClient::new(registry)), publisher)
        .with_settings(&config.pipeline)?;
    let (ctx, interrupt) = cancel_on_ctrl_c();
    let result = driver.execute(run, workload, &ctx).await;
    interrupt.abort();
    // Dropping the driver closes the channel and ends the printer.
    drop(driver);
    let _ = printer.await;
    Ok(result?)
}

/// Stand in for a kubelet: mark the deployment ready once it shows up.
fn simulate_rollout(cluster: Arc<InMemoryCluster>, namespace: String, name: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SIMULATED_ROLLOUT_TICK).await;
            let status = serde_json::json!({
                "replicas": 1,
                "readyReplicas": 1,
                "availableReplicas": 1,
                "updatedReplicas": 1,
            });
            if cluster.set_status::<Deployment>(&namespace, &name, status).is_ok() {
                info!(%namespace, deployment = %name, "simulated rollout ready");
                break;
            }
        }
    })
}

/// The configured infrastructure backend behind the retry/breaker decorator.
pub fn infra_client(config: &TugboatConfig, ctx: Context) -> anyhow::Result<Arc<dyn InfrastructureClient>> {
    let infra = &config.infra;
    let poll = PollSettings {
        interval: infra.poll_interval()?,
        attempts: infra.poll_attempts,
    };
    let inner: Arc<dyn InfrastructureClient> = match infra.backend {
        InfraBackend::Mock => Arc::new(MockInfraClient::new(
            Arc::new(TokioScheduler),
            infra.mock_completion_delay()?,
            poll,
        )),
        InfraBackend::Http => {
            let base_url = infra
                .base_url
                .as_deref()
                .context("infra.base_url is required for the http backend")?;
            Arc::new(HttpInfraClient::new(
                base_url,
                infra.api_token.clone(),
                infra.request_timeout()?,
                poll,
            )?)
        }
    };

    let policy = config.retry_policy()?;
    let breaker = config.breaker_config()?;
    let client = match config.resilience.breaker.scope {
        BreakerScope::Shared => ResilientClient::shared(inner, policy, breaker),
        BreakerScope::PerOperation => ResilientClient::per_operation(inner, policy, breaker),
    };
    Ok(Arc::new(client.with_context(ctx)))
}

pub async fn provision_server(
    config_path: &Path,
    name: String,
    flavor: String,
    image: String,
    dns_zone: Option<String>,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let (ctx, interrupt) = cancel_on_ctrl_c();
    let client = infra_client(&config, ctx)?;

    let mut request = ServerRequest::new(name, flavor, image);
    request.dns_zone = dns_zone;
    info!(name = %request.name, backend = ?config.infra.backend, "provisioning server");

    let result = ServerProvisioner::new(client).provision(&request).await;
    interrupt.abort();
    let server = result?;
    println!("{}", serde_json::to_string_pretty(&server)?);
    Ok(())
}
