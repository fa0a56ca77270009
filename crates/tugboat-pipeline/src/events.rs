//! Pipeline event publication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::status::DeploymentStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    StatusChanged {
        run_id: Uuid,
        from: DeploymentStatus,
        to: DeploymentStatus,
        at: DateTime<Utc>,
    },
    Log {
        run_id: Uuid,
        line: String,
        at: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            PipelineEvent::StatusChanged { run_id, .. } | PipelineEvent::Log { run_id, .. } => {
                *run_id
            }
        }
    }
}

/// Receives every status change and log line a driver produces.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: PipelineEvent);
}

/// Fans events out to any number of subscribers. Events published with no
/// subscriber are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<PipelineEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }
}
