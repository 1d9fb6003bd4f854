use crate::active::RunRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wfcore::{Clock, EventBus, ExecutionEvent, Notifier, RunId};

/// Default time a run may stay `Running` before it is reported.
pub const DEFAULT_STUCK_THRESHOLD: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StuckRunAlert {
    pub run_id: RunId,
    pub workflow_name: String,
    pub running_for_ms: u64,
    pub detected_at: DateTime<Utc>,
    /// Whether cancellation was signalled to the run
    pub aborted: bool,
}

/// Periodic scanner of the run registry for runs stuck in `Running`.
///
/// Observational unless `abort_stuck` is set, in which case flagged runs
/// also receive a cancellation signal.
pub struct Monitor {
    registry: Arc<RunRegistry>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    threshold: Duration,
    abort_stuck: bool,
    alerts: Mutex<Vec<StuckRunAlert>>,
}

impl Monitor {
    pub fn new(
        registry: Arc<RunRegistry>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        events: Arc<EventBus>,
        threshold: Duration,
    ) -> Self {
        Self {
            registry,
            notifier,
            clock,
            events,
            threshold,
            abort_stuck: false,
            alerts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_abort(mut self, abort_stuck: bool) -> Self {
        self.abort_stuck = abort_stuck;
        self
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// One pass over the registry. Returns the alerts raised by this pass;
    /// a run is reported at most once per `Running` stretch.
    pub async fn scan(&self) -> Vec<StuckRunAlert> {
        let now = self.clock.now();
        let threshold_ms = self.threshold.as_millis() as u64;
        let mut raised = Vec::new();

        for run in self.registry.snapshot() {
            let running_for_ms = run.running_for_ms(now);
            if running_for_ms <= threshold_ms || !self.registry.flag(run.run_id) {
                continue;
            }

            tracing::warn!(
                run_id = %run.run_id,
                workflow = %run.workflow_name,
                running_for_ms,
                "workflow run appears stuck"
            );
            let aborted = self.abort_stuck && self.registry.cancel(run.run_id);

            let subject = format!("[workflow] {} run appears stuck", run.workflow_name);
            let body = format!(
                "<p>Run <code>{}</code> of workflow <b>{}</b> (trigger <code>{}</code>) has been running for {} minutes.</p><p>{}</p>",
                run.run_id,
                run.workflow_name,
                run.trigger,
                running_for_ms / 60_000,
                if aborted {
                    "Cancellation has been signalled to the run."
                } else {
                    "The run has not been stopped."
                }
            );
            if let Err(e) = self.notifier.send(&subject, &body).await {
                tracing::warn!(run_id = %run.run_id, "failed to send stuck-run alert: {}", e);
            }

            self.events.emit(ExecutionEvent::StuckRunDetected {
                run_id: run.run_id,
                workflow: run.workflow_name.clone(),
                running_for_ms,
                timestamp: now,
            });

            raised.push(StuckRunAlert {
                run_id: run.run_id,
                workflow_name: run.workflow_name,
                running_for_ms,
                detected_at: now,
                aborted,
            });
        }

        if !raised.is_empty() {
            self.alerts.lock().await.extend(raised.iter().cloned());
        }
        raised
    }

    /// Every alert raised since the monitor was created.
    pub async fn alerts(&self) -> Vec<StuckRunAlert> {
        self.alerts.lock().await.clone()
    }

    /// Scan every `interval` until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.scan().await;
                    }
                }
            }
            tracing::debug!("run monitor stopped");
        })
    }
}
