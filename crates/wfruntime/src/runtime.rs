use crate::active::{ActiveRun, Registration, RunRegistry};
use crate::engine::Engine;
use crate::metrics::{WorkflowMetrics, WorkflowStats};
use crate::monitor::Monitor;
use crate::registry::HandlerRegistry;
use crate::repository::{InMemoryRunRepository, RunRepository};
use crate::retry::{CompletedSteps, RetryPolicy};
use crate::templates::{InMemoryTemplateStore, TemplateStore};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wfcore::{
    Collaborators, EngineError, EventBus, ExecutionEvent, RepositoryError, RunContext, RunError,
    RunId, RunStatus, TemplateError, TemplateVersion, TransitionError, WorkflowRun,
    WorkflowTemplate,
};

/// Configuration for the runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Backoff base; retry `n` waits `base * 2^(n-1)`
    pub retry_base_delay_ms: u64,
    pub stuck_threshold_ms: u64,
    pub monitor_interval_ms: u64,
    /// Let the monitor cancel runs it flags as stuck
    pub abort_stuck_runs: bool,
    pub event_buffer_size: usize,
    pub history_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            retry_base_delay_ms: 1_000,
            stuck_threshold_ms: 10 * 60 * 1_000,
            monitor_interval_ms: 60_000,
            abort_stuck_runs: false,
            event_buffer_size: 1000,
            history_limit: 20,
        }
    }
}

impl RuntimeConfig {
    /// Load from a JSON file; missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_millis(self.stuck_threshold_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

/// Owns everything a workflow run needs: handlers, stores, the in-flight
/// registry and metrics. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Runner {
    config: RuntimeConfig,
    engine: Arc<Engine>,
    templates: Arc<dyn TemplateStore>,
    runs: Arc<dyn RunRepository>,
    active: Arc<RunRegistry>,
    metrics: Arc<WorkflowMetrics>,
    events: Arc<EventBus>,
    services: Collaborators,
}

impl Runner {
    /// Create a runner with default settings and in-memory stores
    pub fn new(registry: Arc<HandlerRegistry>, services: Collaborators) -> Self {
        Self::with_config(registry, services, RuntimeConfig::default())
    }

    pub fn with_config(
        registry: Arc<HandlerRegistry>,
        services: Collaborators,
        config: RuntimeConfig,
    ) -> Self {
        let events = Arc::new(EventBus::new(config.event_buffer_size));
        let engine = Arc::new(Engine::new(registry, events.clone(), services.clone()));

        Self {
            config,
            engine,
            templates: Arc::new(InMemoryTemplateStore::new()),
            runs: Arc::new(InMemoryRunRepository::new()),
            active: Arc::new(RunRegistry::new()),
            metrics: Arc::new(WorkflowMetrics::new()),
            events,
            services,
        }
    }

    pub fn with_template_store(mut self, templates: Arc<dyn TemplateStore>) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_run_repository(mut self, runs: Arc<dyn RunRepository>) -> Self {
        self.runs = runs;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        self.engine.registry()
    }

    pub fn templates(&self) -> &Arc<dyn TemplateStore> {
        &self.templates
    }

    pub fn repository(&self) -> &Arc<dyn RunRepository> {
        &self.runs
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Runs currently in flight
    pub fn active_runs(&self) -> Vec<ActiveRun> {
        self.active.snapshot()
    }

    pub fn metrics(&self, workflow: &str) -> Option<WorkflowStats> {
        self.metrics.get(workflow)
    }

    pub fn all_metrics(&self) -> Vec<(String, WorkflowStats)> {
        self.metrics.all()
    }

    /// Signal cancellation to an in-flight run. Its current step fails with
    /// `Cancelled` at the next collaborator call and the run does not retry.
    pub fn cancel(&self, run_id: RunId) -> bool {
        let cancelled = self.active.cancel(run_id);
        if cancelled {
            tracing::warn!(%run_id, "cancellation requested");
        }
        cancelled
    }

    /// A monitor over this runner's in-flight runs
    pub fn monitor(&self) -> Monitor {
        Monitor::new(
            self.active.clone(),
            self.services.notifier.clone(),
            self.services.clock.clone(),
            self.events.clone(),
            self.config.stuck_threshold(),
        )
        .with_abort(self.config.abort_stuck_runs)
    }

    /// Start a background monitor scanning at the configured interval
    pub fn spawn_monitor(&self, shutdown: CancellationToken) -> (Arc<Monitor>, JoinHandle<()>) {
        let monitor = Arc::new(self.monitor());
        let handle = monitor.clone().spawn(self.config.monitor_interval(), shutdown);
        (monitor, handle)
    }

    /// Execute one workflow run end to end, including retries.
    ///
    /// Never fails: every outcome is reported through the returned run's
    /// status, error and step log.
    pub async fn execute_workflow(
        &self,
        name: &str,
        trigger: &str,
        context: RunContext,
        version: Option<TemplateVersion>,
    ) -> WorkflowRun {
        let clock = self.services.clock.clone();
        let mut run = WorkflowRun::new(name, trigger, context, clock.now());
        let cancellation = CancellationToken::new();

        checked(run.id, run.transition(RunStatus::Running));
        let registration =
            Registration::new(self.active.clone(), &run, cancellation.clone(), clock.now());
        self.events.emit(ExecutionEvent::RunStarted {
            run_id: run.id,
            workflow: name.to_string(),
            trigger: trigger.to_string(),
            timestamp: clock.now(),
        });
        tracing::info!(run_id = %run.id, workflow = name, trigger, "starting workflow run");

        let outcome = match self.resolve_template(name, version.as_ref()).await {
            Ok(template) => {
                run.version = template.version.clone();
                self.drive(&mut run, &template, &cancellation).await
            }
            Err(e) => {
                tracing::error!(run_id = %run.id, workflow = name, "cannot start run: {}", e);
                Err(RunError::Template(e))
            }
        };

        checked(run.id, run.finish(outcome.as_ref().err(), clock.now()));
        self.persist(&run).await;
        if let Err(error) = &outcome {
            self.alert_permanent_failure(&run, error).await;
        }

        drop(registration);
        self.metrics.record(&run);
        let duration_ms = run.duration_ms.unwrap_or(0);
        self.events.emit(ExecutionEvent::RunFinished {
            run_id: run.id,
            status: run.status,
            retries: run.retries,
            duration_ms,
            timestamp: clock.now(),
        });
        tracing::info!(
            run_id = %run.id,
            workflow = name,
            status = ?run.status,
            retries = run.retries,
            duration_ms,
            "workflow run finished"
        );
        run
    }

    /// Re-execute a stored run's context as a brand-new run against the
    /// latest template. The stored run is left untouched.
    pub async fn replay(&self, run_id: RunId) -> Result<WorkflowRun, EngineError> {
        let original = self.get_run(run_id).await?;
        tracing::info!(%run_id, workflow = %original.workflow_name, "replaying run");
        let trigger = format!("replay:{}", run_id);
        Ok(self
            .execute_workflow(&original.workflow_name, &trigger, original.context, None)
            .await)
    }

    pub async fn get_run(&self, run_id: RunId) -> Result<WorkflowRun, EngineError> {
        self.runs.get(run_id).await.map_err(|e| match e {
            RepositoryError::NotFound(id) => EngineError::RunNotFound(id),
            other => EngineError::Repository(other),
        })
    }

    /// Newest-first history; `None` uses the configured limit
    pub async fn history(
        &self,
        workflow: &str,
        limit: Option<usize>,
    ) -> Result<Vec<WorkflowRun>, EngineError> {
        let limit = limit.unwrap_or(self.config.history_limit);
        Ok(self.runs.history(workflow, limit).await?)
    }

    async fn resolve_template(
        &self,
        name: &str,
        version: Option<&TemplateVersion>,
    ) -> Result<WorkflowTemplate, TemplateError> {
        let template = self.templates.load(name, version).await?;
        template.validate()?;
        Ok(template)
    }

    /// Initial attempt plus retries. Each failed attempt that will be retried
    /// is persisted as `Failed` before the backoff wait.
    async fn drive(
        &self,
        run: &mut WorkflowRun,
        template: &WorkflowTemplate,
        cancellation: &CancellationToken,
    ) -> Result<(), RunError> {
        let policy = RetryPolicy::for_template(template, self.config.retry_base_delay());
        let clock = self.services.clock.clone();
        let mut outcome = self
            .engine
            .run_attempt(run, &template.steps, &CompletedSteps::default(), cancellation, 0)
            .await;

        loop {
            let error = match outcome {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };

            if !error.is_retryable() || cancellation.is_cancelled() {
                return Err(error);
            }
            if !policy.should_retry(run.retries) {
                if run.retries == 0 {
                    return Err(error);
                }
                return Err(RunError::RetryExhausted {
                    attempts: run.retries,
                    last: Box::new(error),
                });
            }

            checked(run.id, run.finish(Some(&error), clock.now()));
            self.persist(run).await;

            let attempt = match run.begin_retry() {
                Ok(attempt) => attempt,
                Err(e) => {
                    tracing::error!(run_id = %run.id, "{}", e);
                    return Err(error);
                }
            };
            self.active.set_status(run.id, RunStatus::Retrying, clock.now());
            let delay = policy.delay_for(attempt);
            tracing::warn!(
                run_id = %run.id,
                attempt,
                max_retries = policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                "run failed, retrying: {}",
                error
            );
            self.events.emit(ExecutionEvent::RunRetrying {
                run_id: run.id,
                attempt,
                delay_ms: delay.as_millis() as u64,
                timestamp: clock.now(),
            });

            let cancelled = tokio::select! {
                biased;
                _ = cancellation.cancelled() => true,
                _ = clock.sleep(delay) => false,
            };

            checked(run.id, run.resume());
            self.active.set_status(run.id, RunStatus::Running, clock.now());
            if cancelled {
                return Err(RunError::Cancelled);
            }

            let completed = CompletedSteps::from_run(run);
            tracing::debug!(run_id = %run.id, attempt, skipped = completed.len(), "resuming run");
            outcome = self
                .engine
                .run_attempt(run, &template.steps, &completed, cancellation, attempt)
                .await;
        }
    }

    /// Best-effort: persistence failures never change the run's outcome.
    async fn persist(&self, run: &WorkflowRun) {
        if let Err(e) = self.runs.save(run).await {
            tracing::warn!(run_id = %run.id, "failed to persist run summary: {}", e);
        }
    }

    async fn alert_permanent_failure(&self, run: &WorkflowRun, error: &RunError) {
        tracing::error!(
            run_id = %run.id,
            workflow = %run.workflow_name,
            retries = run.retries,
            "workflow run failed permanently: {}",
            error
        );

        let subject = format!("[workflow] {} failed", run.workflow_name);
        let failed_steps: String = run
            .failed_steps()
            .map(|s| {
                format!(
                    "<li><b>{}</b> (attempt {}): {}</li>",
                    s.name,
                    s.attempt,
                    s.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        let body = format!(
            "<p>Run <code>{}</code> of workflow <b>{}</b> failed.</p>\
             <p>Error: {}</p>\
             <p>Retries: {} &middot; Duration: {} ms &middot; Trigger: {}</p>\
             <ul>{}</ul>",
            run.id,
            run.workflow_name,
            error,
            run.retries,
            run.duration_ms.unwrap_or(0),
            run.trigger,
            failed_steps
        );

        if let Err(e) = self.services.notifier.send(&subject, &body).await {
            tracing::warn!(run_id = %run.id, "failed to send failure alert: {}", e);
        }
    }
}

fn checked(run_id: RunId, result: Result<(), TransitionError>) {
    if let Err(e) = result {
        tracing::error!(%run_id, "{}", e);
    }
}
