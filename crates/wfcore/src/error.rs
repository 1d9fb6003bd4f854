use crate::{RunId, RunStatus, StepType, TemplateVersion};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single step. Always recovered into a failed `StepResult`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter '{field}': {reason}")]
    InvalidParameter { field: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    ExecutionFailed(String),

    #[error("No handler registered for step type '{0}'")]
    NotRegistered(StepType),

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Cancelled")]
    Cancelled,
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::ExecutionFailed(message.into())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("Template not found: {name} (version {version})")]
    NotFound {
        name: String,
        version: TemplateVersion,
    },

    #[error("Invalid template: {0}")]
    Invalid(String),

    #[error("Duplicate step name '{0}'")]
    DuplicateStepName(String),

    #[error("Template storage error: {0}")]
    Storage(String),
}

/// Writing or reading run summaries failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("Run not found: {0}")]
    NotFound(RunId),

    #[error("Persistence error: {0}")]
    Storage(String),
}

/// A required step that failed, as reported in run-level errors.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub step: String,
    pub message: String,
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step '{}' failed: {}", self.step, self.message)
    }
}

/// Why a run attempt aborted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error("{0}")]
    Template(#[from] TemplateError),

    #[error("{0}")]
    StepExecution(StepFailure),

    #[error("parallel group failed: {}", join_failures(.0))]
    ParallelGroupFailure(Vec<StepFailure>),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: Box<RunError> },

    #[error("run cancelled")]
    Cancelled,
}

impl RunError {
    /// Whether another attempt could change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RunError::StepExecution(_) | RunError::ParallelGroupFailure(_)
        )
    }

    /// Names of the steps responsible for this error.
    pub fn failed_steps(&self) -> Vec<&str> {
        match self {
            RunError::StepExecution(failure) => vec![failure.step.as_str()],
            RunError::ParallelGroupFailure(failures) => {
                failures.iter().map(|f| f.step.as_str()).collect()
            }
            RunError::RetryExhausted { last, .. } => last.failed_steps(),
            RunError::Template(_) | RunError::Cancelled => Vec::new(),
        }
    }
}

fn join_failures(failures: &[StepFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid run status transition: {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: RunStatus,
    pub to: RunStatus,
}
