use crate::{events::EventEmitter, Collaborators, RunContext, RunId, Step, StepError, StepType};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Core trait that every step kind implements
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// The step kind this handler serves
    fn step_type(&self) -> StepType;

    /// Execute the step against a snapshot of the run context
    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError>;
}

/// Execution context passed to each handler
#[derive(Clone)]
pub struct StepContext {
    pub run_id: RunId,

    pub workflow_name: String,

    /// Context as it stood when the step (or its parallel group) started
    pub context: RunContext,

    /// I/O collaborators
    pub services: Collaborators,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Fires when the run is cancelled
    pub cancellation: CancellationToken,
}

impl StepContext {
    pub fn interpolate(&self, template: &str) -> String {
        self.context.interpolate(template)
    }

    pub fn interpolate_value(&self, value: &Value) -> Value {
        self.context.interpolate_value(value)
    }

    /// Runs a collaborator call, giving up with `StepError::Cancelled` as
    /// soon as the run is cancelled.
    pub async fn cancellable<T, F>(&self, fut: F) -> Result<T, StepError>
    where
        F: Future<Output = Result<T, StepError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(StepError::Cancelled),
            result = fut => result,
        }
    }
}

/// Output from a successful step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    /// Written to the context when the step declares a `contextKey`
    pub data: Value,

    /// Selected branch label, set by condition steps only
    pub branch: Option<String>,
}

impl StepOutput {
    pub fn new(data: Value) -> Self {
        Self { data, branch: None }
    }

    pub fn with_branch(mut self, label: impl Into<String>) -> Self {
        self.branch = Some(label.into());
        self
    }
}
