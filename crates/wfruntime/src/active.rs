use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wfcore::{RunId, RunStatus, WorkflowRun};

/// An in-flight run as seen by the monitor
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub run_id: RunId,
    pub workflow_name: String,
    pub trigger: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    /// When the run last entered `Running`
    pub running_since: DateTime<Utc>,
    /// Set once the monitor has alerted on this run
    pub flagged: bool,
    cancellation: CancellationToken,
}

impl ActiveRun {
    /// Milliseconds spent in the current `Running` stretch, zero otherwise.
    pub fn running_for_ms(&self, now: DateTime<Utc>) -> u64 {
        if self.status != RunStatus::Running {
            return 0;
        }
        (now - self.running_since).num_milliseconds().max(0) as u64
    }
}

/// Concurrency-safe tracker of runs currently executing.
#[derive(Default)]
pub struct RunRegistry {
    runs: DashMap<RunId, ActiveRun>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, run: &WorkflowRun, cancellation: CancellationToken, now: DateTime<Utc>) {
        self.runs.insert(
            run.id,
            ActiveRun {
                run_id: run.id,
                workflow_name: run.workflow_name.clone(),
                trigger: run.trigger.clone(),
                status: run.status,
                started_at: run.started_at,
                running_since: now,
                flagged: false,
                cancellation,
            },
        );
    }

    /// Records a status change. Re-entering `Running` restarts the stuck clock.
    pub fn set_status(&self, run_id: RunId, status: RunStatus, now: DateTime<Utc>) {
        if let Some(mut entry) = self.runs.get_mut(&run_id) {
            if status == RunStatus::Running && entry.status != RunStatus::Running {
                entry.running_since = now;
                entry.flagged = false;
            }
            entry.status = status;
        }
    }

    pub fn deregister(&self, run_id: RunId) -> Option<ActiveRun> {
        self.runs.remove(&run_id).map(|(_, run)| run)
    }

    pub fn get(&self, run_id: RunId) -> Option<ActiveRun> {
        self.runs.get(&run_id).map(|r| r.clone())
    }

    /// Marks a run as alerted. Returns `false` if it was already flagged or is gone.
    pub fn flag(&self, run_id: RunId) -> bool {
        match self.runs.get_mut(&run_id) {
            Some(mut entry) if !entry.flagged => {
                entry.flagged = true;
                true
            }
            _ => false,
        }
    }

    /// Signals cancellation to an in-flight run. Returns `false` if it is not active.
    pub fn cancel(&self, run_id: RunId) -> bool {
        match self.runs.get(&run_id) {
            Some(entry) => {
                entry.cancellation.cancel();
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<ActiveRun> {
        self.runs.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

/// Keeps a run registered for as long as it is alive.
///
/// Dropping the guard deregisters the run, including when the future driving
/// the run is dropped or aborted before it finishes.
pub struct Registration {
    registry: Arc<RunRegistry>,
    run_id: RunId,
}

impl Registration {
    pub fn new(
        registry: Arc<RunRegistry>,
        run: &WorkflowRun,
        cancellation: CancellationToken,
        now: DateTime<Utc>,
    ) -> Self {
        registry.register(run, cancellation, now);
        Self {
            registry,
            run_id: run.id,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.registry.deregister(self.run_id).is_some() {
            tracing::debug!(run_id = %self.run_id, "run deregistered");
        }
    }
}
