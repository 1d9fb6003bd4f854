//! Retry/backoff decisions for failed runs.
//!
//! Retries are run-level: a failed run re-executes every step that has not
//! completed yet, after an exponentially growing delay.

use std::collections::HashMap;
use std::time::Duration;
use wfcore::{WorkflowRun, WorkflowTemplate};

/// Largest exponent applied to the base delay.
const MAX_BACKOFF_SHIFT: u32 = 20;

/// Retry policy resolved for one run from its template and the runner config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn for_template(template: &WorkflowTemplate, default_base_delay: Duration) -> Self {
        Self {
            enabled: template.retry,
            max_retries: template.max_retries,
            base_delay: template
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(default_base_delay),
        }
    }

    /// Whether a run that has already retried `retries` times may retry again.
    pub fn should_retry(&self, retries: u32) -> bool {
        self.enabled && retries < self.max_retries
    }

    /// Delay before retry `attempt` (1-indexed): `base * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.base_delay.saturating_mul(1u32 << shift)
    }
}

/// Steps that completed in earlier attempts of a run, with the branch each
/// completed condition took.
///
/// A retry skips every step named here. A skipped condition is not evaluated
/// again; the walker re-enters the branch it recorded so that steps inside
/// that branch are filtered by name like any other.
#[derive(Debug, Clone, Default)]
pub struct CompletedSteps {
    branches: HashMap<String, Option<String>>,
}

impl CompletedSteps {
    pub fn from_run(run: &WorkflowRun) -> Self {
        Self {
            branches: run
                .steps
                .iter()
                .filter(|s| s.is_completed())
                .map(|s| (s.name.clone(), s.branch.clone()))
                .collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.branches.contains_key(name)
    }

    /// Branch label recorded for a completed condition
    pub fn branch(&self, name: &str) -> Option<&str> {
        self.branches.get(name).and_then(|b| b.as_deref())
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}
