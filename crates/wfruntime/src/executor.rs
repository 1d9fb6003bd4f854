use crate::registry::HandlerRegistry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use wfcore::{
    EventBus, ExecutionEvent, RunContext, Step, StepContext, StepError, StepResult,
};

/// Dispatches a single step to its handler and folds every outcome into a
/// `StepResult`. Nothing a handler does escapes as an error.
pub struct StepExecutor {
    registry: Arc<HandlerRegistry>,
}

impl StepExecutor {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub async fn execute(
        &self,
        step: &Step,
        ctx: StepContext,
        events: &EventBus,
        attempt: u32,
    ) -> StepResult {
        let kind = step.step_type();
        events.emit(ExecutionEvent::StepStarted {
            run_id: ctx.run_id,
            step: step.name.clone(),
            kind,
            timestamp: Utc::now(),
        });
        tracing::debug!(run_id = %ctx.run_id, step = %step.name, %kind, attempt, "executing step");

        let start = Instant::now();
        let outcome = if ctx.cancellation.is_cancelled() {
            Err(StepError::Cancelled)
        } else {
            match self.registry.get(kind) {
                Some(handler) => handler.execute(step, &ctx).await,
                None => Err(StepError::NotRegistered(kind)),
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let mut result = match outcome {
            Ok(output) => {
                tracing::debug!(step = %step.name, duration_ms, "step completed");
                events.emit(ExecutionEvent::StepCompleted {
                    run_id: ctx.run_id,
                    step: step.name.clone(),
                    duration_ms,
                    branch: output.branch.clone(),
                    timestamp: Utc::now(),
                });
                let mut result = StepResult::completed(&step.name, kind, output.data, duration_ms);
                result.branch = output.branch;
                result
            }
            Err(e) => {
                tracing::warn!(step = %step.name, required = step.required, "step failed: {}", e);
                events.emit(ExecutionEvent::StepFailed {
                    run_id: ctx.run_id,
                    step: step.name.clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                StepResult::failed(&step.name, kind, e.to_string(), duration_ms)
            }
        };
        result.attempt = attempt;
        result
    }
}

/// Publishes a completed step's data under its `contextKey`.
pub fn commit_to_context(step: &Step, result: &StepResult, context: &mut RunContext) {
    if let (Some(key), true) = (&step.context_key, result.is_completed()) {
        context.insert(key.clone(), result.data.clone());
    }
}
