//! Standard step library
//!
//! One handler per step kind, plus the default collaborator adapters the
//! handlers talk to when no external services are wired in.

mod ai;
mod condition;
mod memory;
mod notify;
mod records;
mod time;
mod webhook;

pub use ai::{AiClassifyHandler, AiGenerateHandler};
pub use condition::ConditionHandler;
pub use memory::{InMemoryRecordStore, UnconfiguredTextGenerator};
pub use notify::{LogNotifier, NotifyHandler};
pub use records::{CreateRecordHandler, FetchRecordsHandler, UpdateRecordHandler};
pub use time::{DelayHandler, TokioClock};
pub use webhook::{HttpWebhookClient, WebhookHandler};

use std::sync::Arc;
use wfcore::{Collaborators, Step, StepError, StepType};
use wfruntime::HandlerRegistry;

/// Register all standard step handlers with a registry
pub fn register_all(registry: &mut HandlerRegistry) {
    registry.register(Arc::new(records::FetchRecordsHandler));
    registry.register(Arc::new(records::CreateRecordHandler));
    registry.register(Arc::new(records::UpdateRecordHandler));
    registry.register(Arc::new(ai::AiClassifyHandler));
    registry.register(Arc::new(ai::AiGenerateHandler));
    registry.register(Arc::new(condition::ConditionHandler));
    registry.register(Arc::new(webhook::WebhookHandler));
    registry.register(Arc::new(notify::NotifyHandler));
    registry.register(Arc::new(time::DelayHandler));
}

/// Collaborators backed by the local adapters in this crate
pub fn default_collaborators() -> Collaborators {
    Collaborators {
        records: Arc::new(InMemoryRecordStore::new()),
        text: Arc::new(UnconfiguredTextGenerator),
        notifier: Arc::new(LogNotifier),
        webhooks: Arc::new(HttpWebhookClient::new()),
        clock: Arc::new(TokioClock),
    }
}

fn kind_mismatch(step: &Step, expected: StepType) -> StepError {
    StepError::Configuration(format!(
        "step '{}' is a {} step, expected {}",
        step.name,
        step.step_type(),
        expected
    ))
}
