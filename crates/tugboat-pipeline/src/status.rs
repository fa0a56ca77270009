//! Deployment run status and its transition rules.
//!
//! ```text
//! queued → building → pushing → deploying → success
//!    └─────────┴──────────┴──────────┴──→ failed | cancelled
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Building,
    Pushing,
    Deploying,
    Success,
    Failed,
    Cancelled,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Success | DeploymentStatus::Failed | DeploymentStatus::Cancelled
        )
    }

    /// The status reached when the current stage succeeds.
    pub fn next(&self) -> Option<DeploymentStatus> {
        match self {
            DeploymentStatus::Queued => Some(DeploymentStatus::Building),
            DeploymentStatus::Building => Some(DeploymentStatus::Pushing),
            DeploymentStatus::Pushing => Some(DeploymentStatus::Deploying),
            DeploymentStatus::Deploying => Some(DeploymentStatus::Success),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, to: DeploymentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            DeploymentStatus::Failed | DeploymentStatus::Cancelled => true,
            _ => self.next() == Some(to),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Pushing => "pushing",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::DeploymentStatus::*;

    #[test]
    fn forward_path_is_linear() {
        assert!(Queued.can_transition_to(Building));
        assert!(Building.can_transition_to(Pushing));
        assert!(Pushing.can_transition_to(Deploying));
        assert!(Deploying.can_transition_to(Success));

        assert!(!Queued.can_transition_to(Pushing));
        assert!(!Building.can_transition_to(Success));
        assert!(!Deploying.can_transition_to(Building));
    }

    #[test]
    fn any_live_state_can_fail_or_cancel() {
        for status in [Queued, Building, Pushing, Deploying] {
            assert!(status.can_transition_to(Failed));
            assert!(status.can_transition_to(Cancelled));
            assert!(!status.is_terminal());
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for status in [Success, Failed, Cancelled] {
            assert!(status.is_terminal());
            assert!(!status.can_transition_to(Failed));
            assert!(!status.can_transition_to(Cancelled));
            assert_eq!(status.next(), None);
        }
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Deploying).unwrap(), "\"deploying\"");
        assert_eq!(Cancelled.to_string(), "cancelled");
    }
}
