use dashmap::DashMap;
use serde::Serialize;
use wfcore::{RunStatus, WorkflowRun};

/// Aggregate outcome counters for one workflow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowStats {
    pub runs: u64,
    pub completed: u64,
    pub failed: u64,
    pub retries: u64,
    pub total_duration_ms: u64,
}

impl WorkflowStats {
    pub fn average_duration_ms(&self) -> u64 {
        if self.runs == 0 {
            0
        } else {
            self.total_duration_ms / self.runs
        }
    }
}

/// Per-workflow metrics owned by a runner
#[derive(Default)]
pub struct WorkflowMetrics {
    stats: DashMap<String, WorkflowStats>,
}

impl WorkflowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a finished run into its workflow's counters.
    pub fn record(&self, run: &WorkflowRun) {
        let mut stats = self.stats.entry(run.workflow_name.clone()).or_default();
        stats.runs += 1;
        match run.status {
            RunStatus::Completed => stats.completed += 1,
            RunStatus::Failed => stats.failed += 1,
            _ => {}
        }
        stats.retries += u64::from(run.retries);
        stats.total_duration_ms += run.duration_ms.unwrap_or(0);
    }

    pub fn get(&self, workflow: &str) -> Option<WorkflowStats> {
        self.stats.get(workflow).map(|s| s.clone())
    }

    pub fn all(&self) -> Vec<(String, WorkflowStats)> {
        let mut all: Vec<_> = self
            .stats
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
