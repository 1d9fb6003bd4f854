//! Workflow execution runtime
//!
//! This crate provides the engine that walks step trees, the handler registry,
//! run-level retries with exponential backoff, template and run storage, and
//! the monitor that reports runs stuck in `Running`.

mod active;
mod condition;
mod engine;
mod executor;
mod metrics;
mod monitor;
mod registry;
mod repository;
mod retry;
mod runtime;
mod templates;

pub use active::{ActiveRun, Registration, RunRegistry};
pub use condition::{ConditionEvaluator, DEFAULT_FALSE_LABEL, DEFAULT_TRUE_LABEL};
pub use engine::Engine;
pub use executor::{commit_to_context, StepExecutor};
pub use metrics::{WorkflowMetrics, WorkflowStats};
pub use monitor::{Monitor, StuckRunAlert, DEFAULT_STUCK_THRESHOLD};
pub use registry::HandlerRegistry;
pub use repository::{InMemoryRunRepository, JsonRunRepository, RunRepository};
pub use retry::{CompletedSteps, RetryPolicy};
pub use runtime::{Runner, RuntimeConfig};
pub use templates::{InMemoryTemplateStore, JsonTemplateStore, TemplateHistory, TemplateStore};
