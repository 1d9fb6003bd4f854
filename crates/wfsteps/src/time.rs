use crate::kind_mismatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;
use wfcore::{Clock, Step, StepContext, StepError, StepHandler, StepKind, StepOutput, StepType};

/// Delay execution for a specified duration
pub struct DelayHandler;

#[async_trait]
impl StepHandler for DelayHandler {
    fn step_type(&self) -> StepType {
        StepType::Delay
    }

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let StepKind::Delay { duration_ms } = &step.kind else {
            return Err(kind_mismatch(step, StepType::Delay));
        };

        ctx.events.info(format!("Delaying for {}ms", duration_ms));
        let clock = ctx.services.clock.clone();
        ctx.cancellable(async move {
            clock.sleep(Duration::from_millis(*duration_ms)).await;
            Ok(())
        })
        .await?;

        Ok(StepOutput::new(json!({ "delayedMs": duration_ms })))
    }
}

/// Wall clock on the tokio timer
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
