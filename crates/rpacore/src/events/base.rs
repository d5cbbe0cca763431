use crate::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events emitted during flow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    FlowStarted {
        execution_id: ExecutionId,
        flow_name: String,
        device_id: String,
        timestamp: DateTime<Utc>,
    },
    FlowCompleted {
        execution_id: ExecutionId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        execution_id: ExecutionId,
        step_index: usize,
        step_name: String,
        action: String,
        timestamp: DateTime<Utc>,
    },
    StepSkipped {
        execution_id: ExecutionId,
        step_index: usize,
        step_name: String,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        execution_id: ExecutionId,
        step_index: usize,
        step_name: String,
        result: Value,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StepFailed {
        execution_id: ExecutionId,
        step_index: usize,
        step_name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ActionEvent {
        execution_id: ExecutionId,
        step_name: String,
        event: ActionEvent,
        timestamp: DateTime<Utc>,
    },
}

/// Messages an action reports while it runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum ActionEvent {
    Info { message: String },
    Warning { message: String },
}

/// Event emitter bound to one step of one execution
#[derive(Clone)]
pub struct StepEmitter {
    execution_id: ExecutionId,
    step_name: String,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl StepEmitter {
    pub fn new(
        execution_id: ExecutionId,
        step_name: impl Into<String>,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            execution_id,
            step_name: step_name.into(),
            sender,
        }
    }

    pub fn emit(&self, event: ActionEvent) {
        let _ = self.sender.send(ExecutionEvent::ActionEvent {
            execution_id: self.execution_id,
            step_name: self.step_name.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(step = %self.step_name, "{}", message);
        self.emit(ActionEvent::Info { message });
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(step = %self.step_name, "{}", message);
        self.emit(ActionEvent::Warning { message });
    }
}

/// Broadcast bus shared by every engine of a runtime
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, execution_id: ExecutionId, step_name: &str) -> StepEmitter {
        StepEmitter::new(execution_id, step_name, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
