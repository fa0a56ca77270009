//! Drives one deployment run from `queued` to a terminal status.
//!
//! ```text
//! queued ─build─▶ building ─push─▶ pushing ─apply─▶ deploying ─ready─▶ success
//! ```
//!
//! Cancellation is observed only between stages. A stage that fails moves
//! the run to `failed` with the error recorded on the run; `execute` itself
//! only errors when handed a run that is not `queued`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use tugboat_cluster::{ClusterApi, ClusterOrchestrator, DeploymentUpdate, WorkloadSpec};
use tugboat_core::{ConfigError, PipelineSettings, slugify};
use tugboat_resilience::Context;

use crate::build::{BuildClient, BuildRequest};
use crate::error::{PipelineError, PipelineResult};
use crate::events::{EventPublisher, PipelineEvent};
use crate::run::DeploymentRun;
use crate::status::DeploymentStatus;

pub const DEFAULT_READINESS_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_READINESS_ATTEMPTS: u32 = 60;

/// Why the stage sequence stopped early.
enum Halt {
    Cancelled,
    Failed(PipelineError),
}

impl From<PipelineError> for Halt {
    fn from(e: PipelineError) -> Self {
        Halt::Failed(e)
    }
}

pub struct PipelineDriver<C> {
    orchestrator: ClusterOrchestrator<C>,
    builder: Arc<dyn BuildClient>,
    events: Arc<dyn EventPublisher>,
    readiness_interval: Duration,
    readiness_attempts: u32,
}

impl<C: ClusterApi> PipelineDriver<C> {
    pub fn new(
        orchestrator: ClusterOrchestrator<C>,
        builder: Arc<dyn BuildClient>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            orchestrator,
            builder,
            events,
            readiness_interval: DEFAULT_READINESS_INTERVAL,
            readiness_attempts: DEFAULT_READINESS_ATTEMPTS,
        }
    }

    pub fn with_readiness(mut self, interval: Duration, attempts: u32) -> Self {
        self.readiness_interval = interval;
        self.readiness_attempts = attempts.max(1);
        self
    }

    /// Apply the `[pipeline]` section of the configuration.
    pub fn with_settings(self, settings: &PipelineSettings) -> Result<Self, ConfigError> {
        let interval = settings.readiness_interval()?;
        Ok(self.with_readiness(interval, settings.readiness_attempts))
    }

    pub fn orchestrator(&self) -> &ClusterOrchestrator<C> {
        &self.orchestrator
    }

    /// Run every stage for `run` against `target` and return the run in its
    /// terminal status.
    pub async fn execute(
        &self,
        mut run: DeploymentRun,
        target: &WorkloadSpec,
        ctx: &Context,
    ) -> PipelineResult<DeploymentRun> {
        if run.status != DeploymentStatus::Queued {
            return Err(PipelineError::InvalidTransition {
                from: run.status,
                to: DeploymentStatus::Building,
            });
        }
        info!(
            run = %run.id,
            service = %run.service_id,
            commit = %run.commit_sha,
            trigger = ?run.triggered_by,
            "pipeline started"
        );

        match self.stages(&mut run, target, ctx).await {
            Ok(()) => {
                info!(run = %run.id, image = ?run.image_tag, "deployment succeeded");
            }
            Err(Halt::Cancelled) => {
                let from = run.status;
                if run.cancel() {
                    self.status_changed(&run, from);
                }
            }
            Err(Halt::Failed(e)) => {
                let message = e.to_string();
                let from = run.fail(message.clone())?;
                self.log(&run, format!("error: {message}"));
                self.status_changed(&run, from);
            }
        }
        Ok(run)
    }

    async fn stages(
        &self,
        run: &mut DeploymentRun,
        target: &WorkloadSpec,
        ctx: &Context,
    ) -> Result<(), Halt> {
        self.boundary(ctx, run)?;
        self.advance(run, DeploymentStatus::Building)?;
        let request = BuildRequest {
            service_id: run.service_id.clone(),
            image_name: slugify(&target.name),
            commit_sha: run.commit_sha.clone(),
        };
        let tag = self.builder.build(&request).await?;
        run.image_tag = Some(tag.clone());
        self.log(run, format!("built {tag}"));

        self.boundary(ctx, run)?;
        self.advance(run, DeploymentStatus::Pushing)?;
        self.builder.push(&tag).await?;
        self.log(run, format!("pushed {tag}"));

        self.boundary(ctx, run)?;
        self.advance(run, DeploymentStatus::Deploying)?;
        self.deploy(run, target, &tag).await?;

        self.advance(run, DeploymentStatus::Success)?;
        Ok(())
    }

    fn boundary(&self, ctx: &Context, run: &DeploymentRun) -> Result<(), Halt> {
        if ctx.is_cancelled() {
            debug!(run = %run.id, stage = %run.status, "cancellation observed");
            return Err(Halt::Cancelled);
        }
        Ok(())
    }

    fn advance(&self, run: &mut DeploymentRun, to: DeploymentStatus) -> PipelineResult<()> {
        let from = run.advance(to)?;
        self.status_changed(run, from);
        Ok(())
    }

    async fn deploy(
        &self,
        run: &DeploymentRun,
        target: &WorkloadSpec,
        tag: &str,
    ) -> PipelineResult<()> {
        let mut spec = target.clone();
        spec.image = tag.to_string();
        let orch = &self.orchestrator;

        let namespace = orch.ensure_namespace(&spec.project_id).await?;
        let current = orch
            .get_deployment_status(&spec.project_id, &spec.service_id)
            .await?;
        if current.exists {
            let update = DeploymentUpdate {
                image: Some(spec.image.clone()),
                resources: Some(spec.resources.clone()),
                replicas: Some(spec.replicas),
            };
            orch.update_deployment(&spec.project_id, &spec.service_id, &update)
                .await?;
            self.log(run, format!("updated deployment in {namespace}"));
        } else {
            let name = orch.create_deployment(&spec).await?;
            self.log(run, format!("created deployment {name} in {namespace}"));
        }
        orch.create_service(&spec).await?;
        if spec.public {
            let hosts = orch.create_ingress(&spec).await?;
            self.log(run, format!("routing {}", hosts.join(", ")));
        }

        self.await_ready(run, &spec).await
    }

    async fn await_ready(&self, run: &DeploymentRun, spec: &WorkloadSpec) -> PipelineResult<()> {
        let attempts = self.readiness_attempts;
        for attempt in 1..=attempts {
            let status = self
                .orchestrator
                .get_deployment_status(&spec.project_id, &spec.service_id)
                .await?;
            if status.available {
                debug!(run = %run.id, attempt, ready = status.ready_replicas, "workload ready");
                return Ok(());
            }
            debug!(run = %run.id, attempt, attempts, "workload not ready yet");
            if attempt < attempts {
                tokio::time::sleep(self.readiness_interval).await;
            }
        }
        warn!(run = %run.id, attempts, "workload never became ready");
        Err(PipelineError::ReadinessTimeout { attempts })
    }

    fn status_changed(&self, run: &DeploymentRun, from: DeploymentStatus) {
        self.events.publish(PipelineEvent::StatusChanged {
            run_id: run.id,
            from,
            to: run.status,
            at: Utc::now(),
        });
    }

    fn log(&self, run: &DeploymentRun, line: String) {
        debug!(run = %run.id, %line);
        self.events.publish(PipelineEvent::Log {
            run_id: run.id,
            line,
            at: Utc::now(),
        });
    }
}
