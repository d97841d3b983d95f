//! Workflow event stream.
//!
//! Emits [`WorkflowEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! observers (loggers, a UI, tests) can follow entities through the workflow
//! without coupling to the service internals.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkflowEvent {
    EntityCreated {
        entity_id: String,
        profile: String,
        stage: String,
    },
    StatusUpdated {
        entity_id: String,
        stage: String,
        keys: Vec<String>,
    },
    StageAdvanced {
        entity_id: String,
        from_stage: String,
        to_stage: String,
        sentiment: String,
    },
    FallbackApplied {
        entity_id: String,
        from_stage: String,
        to_stage: String,
        reason: String,
    },
    DecisionFailed {
        entity_id: String,
        stage: String,
        error: String,
    },
}

#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<WorkflowEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Dropped silently when nobody is subscribed.
    pub fn emit(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
