use crate::{RunId, RunStatus, StepType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted during workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    RunStarted {
        run_id: RunId,
        workflow: String,
        trigger: String,
        timestamp: DateTime<Utc>,
    },
    RunRetrying {
        run_id: RunId,
        attempt: u32,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },
    RunFinished {
        run_id: RunId,
        status: RunStatus,
        retries: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        run_id: RunId,
        step: String,
        kind: StepType,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        run_id: RunId,
        step: String,
        duration_ms: u64,
        branch: Option<String>,
        timestamp: DateTime<Utc>,
    },
    StepFailed {
        run_id: RunId,
        step: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    StepEvent {
        run_id: RunId,
        step: String,
        event: StepEvent,
        timestamp: DateTime<Utc>,
    },
    StuckRunDetected {
        run_id: RunId,
        workflow: String,
        running_for_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// Events specific to step execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum StepEvent {
    Info { message: String },
    Warning { message: String },
}

/// Event emitter for handlers to send real-time updates
#[derive(Clone)]
pub struct EventEmitter {
    run_id: RunId,
    step: String,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(run_id: RunId, step: impl Into<String>, sender: broadcast::Sender<ExecutionEvent>) -> Self {
        Self {
            run_id,
            step: step.into(),
            sender,
        }
    }

    /// Emit a step-specific event
    pub fn emit(&self, event: StepEvent) {
        let _ = self.sender.send(ExecutionEvent::StepEvent {
            run_id: self.run_id,
            step: self.step.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(StepEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(StepEvent::Warning {
            message: message.into(),
        });
    }
}

/// Event bus owned by a runner
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Sends to current subscribers; dropped silently when nobody listens.
    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, run_id: RunId, step: impl Into<String>) -> EventEmitter {
        EventEmitter::new(run_id, step, self.sender.clone())
    }
}
