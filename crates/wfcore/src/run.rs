use crate::{RunContext, RunError, StepType, TemplateVersion, TransitionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type RunId = Uuid;

/// Lifecycle of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Retrying,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Forward-only transitions; `Failed -> Retrying` is the single way out of a terminal state.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Failed, RunStatus::Retrying)
                | (RunStatus::Retrying, RunStatus::Running)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
}

/// Outcome of one step execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub name: String,
    pub kind: StepType,
    pub status: StepStatus,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// 0 for the initial attempt, `n` for retry `n`.
    #[serde(default)]
    pub attempt: u32,
}

impl StepResult {
    pub fn completed(name: impl Into<String>, kind: StepType, data: Value, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            status: StepStatus::Completed,
            data,
            error: None,
            duration_ms,
            branch: None,
            attempt: 0,
        }
    }

    pub fn failed(
        name: impl Into<String>,
        kind: StepType,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            status: StepStatus::Failed,
            data: Value::Null,
            error: Some(error.into()),
            duration_ms,
            branch: None,
            attempt: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// One logical execution of a template, including all of its retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: RunId,
    pub workflow_name: String,
    pub version: TemplateVersion,
    pub trigger: String,
    pub status: RunStatus,
    pub context: RunContext,
    pub steps: Vec<StepResult>,
    pub retries: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowRun {
    pub fn new(
        workflow_name: impl Into<String>,
        trigger: impl Into<String>,
        context: RunContext,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_name: workflow_name.into(),
            version: TemplateVersion::Latest,
            trigger: trigger.into(),
            status: RunStatus::Pending,
            context,
            steps: Vec::new(),
            retries: 0,
            started_at,
            completed_at: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn transition(&mut self, next: RunStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Appends to the execution log. The log is never reordered or truncated.
    pub fn record_step(&mut self, result: StepResult) {
        self.steps.push(result);
    }

    /// Moves a running run into a terminal state and stamps its timing.
    pub fn finish(
        &mut self,
        error: Option<&RunError>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let next = if error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        self.transition(next)?;
        self.error = error.map(|e| e.to_string());
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
        Ok(())
    }

    /// Leaves a failed state for another attempt and returns the retry number.
    pub fn begin_retry(&mut self) -> Result<u32, TransitionError> {
        self.transition(RunStatus::Retrying)?;
        self.retries += 1;
        Ok(self.retries)
    }

    /// Re-enters `Running` after a backoff wait, clearing the previous outcome.
    pub fn resume(&mut self) -> Result<(), TransitionError> {
        if self.status != RunStatus::Retrying {
            return Err(TransitionError {
                from: self.status,
                to: RunStatus::Running,
            });
        }
        self.transition(RunStatus::Running)?;
        self.error = None;
        self.completed_at = None;
        self.duration_ms = None;
        Ok(())
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| !s.is_completed())
    }
}
