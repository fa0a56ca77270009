//! A single deployment run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::status::DeploymentStatus;

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Webhook,
    Manual,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRun {
    pub id: Uuid,
    pub service_id: String,
    pub commit_sha: String,
    pub status: DeploymentStatus,
    pub image_tag: Option<String>,
    pub triggered_by: Trigger,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl DeploymentRun {
    pub fn new(service_id: impl Into<String>, commit_sha: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_id: service_id.into(),
            commit_sha: commit_sha.into(),
            status: DeploymentStatus::Queued,
            image_tag: None,
            triggered_by: trigger,
            started_at: None,
            finished_at: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `to`, stamping start and finish times. Returns the previous status.
    pub fn advance(&mut self, to: DeploymentStatus) -> PipelineResult<DeploymentStatus> {
        let from = self.status;
        if !from.can_transition_to(to) {
            return Err(PipelineError::InvalidTransition { from, to });
        }
        let now = Utc::now();
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = to;
        debug!(run = %self.id, %from, %to, "run advanced");
        Ok(from)
    }

    /// Mark the run failed with `message`.
    pub fn fail(&mut self, message: impl Into<String>) -> PipelineResult<DeploymentStatus> {
        let message = message.into();
        let from = self.advance(DeploymentStatus::Failed)?;
        warn!(run = %self.id, stage = %from, error = %message, "run failed");
        self.error_message = Some(message);
        Ok(from)
    }

    /// Cancel the run. Returns `false` when it was already terminal.
    pub fn cancel(&mut self) -> bool {
        if self.is_terminal() {
            debug!(run = %self.id, status = %self.status, "cancel ignored on terminal run");
            return false;
        }
        let from = self.status;
        self.status = DeploymentStatus::Cancelled;
        self.finished_at = Some(Utc::now());
        info!(run = %self.id, stage = %from, "run cancelled");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_run_is_queued() {
        let run = DeploymentRun::new("svc-1", "abc123", Trigger::Webhook);
        assert_eq!(run.status, DeploymentStatus::Queued);
        assert!(run.started_at.is_none());
        assert!(!run.is_terminal());
    }

    #[test]
    fn advancing_stamps_times() {
        let mut run = DeploymentRun::new("svc-1", "abc123", Trigger::Manual);
        run.advance(DeploymentStatus::Building).unwrap();
        assert!(run.started_at.is_some());
        run.advance(DeploymentStatus::Pushing).unwrap();
        run.advance(DeploymentStatus::Deploying).unwrap();
        assert!(run.finished_at.is_none());
        run.advance(DeploymentStatus::Success).unwrap();
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let mut run = DeploymentRun::new("svc-1", "abc123", Trigger::Manual);
        let err = run.advance(DeploymentStatus::Deploying).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
        assert_eq!(run.status, DeploymentStatus::Queued);
    }

    #[test]
    fn fail_records_message_and_freezes_run() {
        let mut run = DeploymentRun::new("svc-1", "abc123", Trigger::Rollback);
        run.advance(DeploymentStatus::Building).unwrap();
        assert_eq!(run.fail("compiler exploded").unwrap(), DeploymentStatus::Building);
        assert_eq!(run.error_message.as_deref(), Some("compiler exploded"));
        assert!(run.advance(DeploymentStatus::Pushing).is_err());
        assert!(run.fail("again").is_err());
    }

    #[test]
    fn cancel_on_terminal_is_noop() {
        let mut run = DeploymentRun::new("svc-1", "abc123", Trigger::Manual);
        assert!(run.cancel());
        assert_eq!(run.status, DeploymentStatus::Cancelled);
        assert!(!run.cancel());

        let mut done = DeploymentRun::new("svc-1", "abc123", Trigger::Manual);
        done.fail("boom").unwrap();
        assert!(!done.cancel());
        assert_eq!(done.status, DeploymentStatus::Failed);
    }
}
