use crate::kind_mismatch;
use async_trait::async_trait;
use serde_json::json;
use wfcore::{Notifier, Step, StepContext, StepError, StepHandler, StepKind, StepOutput, StepType};

/// Send a notification through the configured notifier
pub struct NotifyHandler;

#[async_trait]
impl StepHandler for NotifyHandler {
    fn step_type(&self) -> StepType {
        StepType::Notify
    }

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let StepKind::Notify { subject, body } = &step.kind else {
            return Err(kind_mismatch(step, StepType::Notify));
        };

        let subject = ctx.interpolate(subject);
        let body = ctx.interpolate(body);
        ctx.cancellable(ctx.services.notifier.send(&subject, &body))
            .await?;

        Ok(StepOutput::new(json!({ "subject": subject, "sent": true })))
    }
}

/// Writes notifications to the log instead of delivering them
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, html_body: &str) -> Result<(), StepError> {
        tracing::info!(subject, body_len = html_body.len(), "notification");
        tracing::debug!("{}", html_body);
        Ok(())
    }
}
