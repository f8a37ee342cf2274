//! Change notification for the presentation layer.

use crate::gating::GateTransition;
use crate::types::TransactionStage;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    Hydrated { restored: bool, active_index: usize },
    SectionUpdated { section_id: String },
    Advanced { from: usize, to: usize },
    Completed { index: usize },
    SnappedBack { from: usize, to: usize },
    Selected { index: usize },
    Reset,
    TransactionStage {
        stage: TransactionStage,
        error: Option<String>,
    },
}

impl From<GateTransition> for WorkflowEvent {
    fn from(transition: GateTransition) -> Self {
        match transition {
            GateTransition::Advanced { from, to } => Self::Advanced { from, to },
            GateTransition::Completed { index } => Self::Completed { index },
            GateTransition::SnappedBack { from, to } => Self::SnappedBack { from, to },
        }
    }
}

/// Broadcast fan-out of workflow events. Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: WorkflowEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
