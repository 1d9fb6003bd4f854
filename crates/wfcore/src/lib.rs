//! Core abstractions for the workflow engine
//!
//! This crate provides the data model (templates, runs, step results), the
//! shared run context, the step handler trait and the narrow collaborator
//! interfaces every handler performs its I/O through. It has no runtime
//! dependencies.

mod collaborators;
mod context;
mod error;
pub mod events;
mod handler;
mod run;
mod template;

pub use collaborators::{
    Clock, Collaborators, Notifier, RecordStore, TextGenerator, WebhookClient, WebhookResponse,
};
pub use context::RunContext;
pub use error::{
    EngineError, RepositoryError, RunError, StepError, StepFailure, TemplateError,
    TransitionError,
};
pub use events::*;
pub use handler::{StepContext, StepHandler, StepOutput};
pub use run::{RunId, RunStatus, StepResult, StepStatus, WorkflowRun};
pub use template::{
    ConditionExpr, ConditionOperator, GenerationOptions, Step, StepKind, StepType,
    TemplateVersion, WorkflowTemplate,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
