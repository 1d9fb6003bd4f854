use crate::executor::{commit_to_context, StepExecutor};
use crate::registry::HandlerRegistry;
use crate::retry::CompletedSteps;
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wfcore::{
    Collaborators, EventBus, RunContext, RunError, RunId, Step, StepContext, StepFailure,
    StepKind, StepResult, WorkflowRun,
};

/// One step list being walked, and the index of the next step to run.
struct Frame<'a> {
    steps: &'a [Step],
    next: usize,
}

/// Interprets a tree of step lists for a single run attempt.
///
/// Branches are walked with an explicit stack of frames: a condition step
/// pushes the selected branch, and when that frame is exhausted control
/// returns to the step after the condition in the enclosing list.
///
/// On a retry, steps in `completed` are skipped. A completed condition is not
/// evaluated again: its recorded branch is walked instead.
pub struct Engine {
    executor: StepExecutor,
    events: Arc<EventBus>,
    services: Collaborators,
}

impl Engine {
    pub fn new(registry: Arc<HandlerRegistry>, events: Arc<EventBus>, services: Collaborators) -> Self {
        Self {
            executor: StepExecutor::new(registry),
            events,
            services,
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        self.executor.registry()
    }

    /// Execute `steps` against `run`, appending every result to its log.
    ///
    /// Returns the error that aborted the walk. Non-required failures are
    /// logged and skipped over.
    pub async fn run_attempt(
        &self,
        run: &mut WorkflowRun,
        steps: &[Step],
        completed: &CompletedSteps,
        cancellation: &CancellationToken,
        attempt: u32,
    ) -> Result<(), RunError> {
        let mut stack = vec![Frame { steps, next: 0 }];

        while let Some(frame) = stack.last_mut() {
            let steps = frame.steps;
            let start = frame.next;
            if start >= steps.len() {
                stack.pop();
                continue;
            }
            if cancellation.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            if steps[start].parallel {
                let end = start + steps[start..].iter().take_while(|s| s.parallel).count();
                frame.next = end;
                let group = &steps[start..end];
                let pending: Vec<&Step> = group
                    .iter()
                    .filter(|s| !completed.contains(&s.name))
                    .collect();

                let results = self.run_group(run, &pending, cancellation, attempt).await;
                if cancellation.is_cancelled() {
                    return Err(RunError::Cancelled);
                }
                let failures: Vec<StepFailure> = pending
                    .iter()
                    .zip(&results)
                    .filter(|(step, result)| step.required && !result.is_completed())
                    .map(|(step, result)| failure(step, result))
                    .collect();
                if !failures.is_empty() {
                    return Err(RunError::ParallelGroupFailure(failures));
                }

                // Branches chosen inside the group run after the join, in declared order.
                let mut fresh = results.iter();
                let labels: Vec<Option<&str>> = group
                    .iter()
                    .map(|step| {
                        if completed.contains(&step.name) {
                            completed.branch(&step.name)
                        } else {
                            fresh.next().and_then(|r| r.branch.as_deref())
                        }
                    })
                    .collect();
                for (step, label) in group.iter().zip(labels).rev() {
                    if let Some(branch) = selected_branch(step, label) {
                        stack.push(Frame { steps: branch, next: 0 });
                    }
                }
                continue;
            }

            frame.next = start + 1;
            let step = &steps[start];
            if completed.contains(&step.name) {
                if let Some(branch) = selected_branch(step, completed.branch(&step.name)) {
                    stack.push(Frame { steps: branch, next: 0 });
                }
                continue;
            }

            let result = self.run_single(run, step, cancellation, attempt).await;

            if !result.is_completed() {
                if cancellation.is_cancelled() {
                    return Err(RunError::Cancelled);
                }
                if step.required {
                    return Err(RunError::StepExecution(failure(step, &result)));
                }
                continue;
            }

            if let Some(branch) = selected_branch(step, result.branch.as_deref()) {
                stack.push(Frame { steps: branch, next: 0 });
            }
        }

        Ok(())
    }

    async fn run_single(
        &self,
        run: &mut WorkflowRun,
        step: &Step,
        cancellation: &CancellationToken,
        attempt: u32,
    ) -> StepResult {
        let ctx = self.step_context(run.id, &run.workflow_name, run.context.clone(), step, cancellation);
        let result = self.executor.execute(step, ctx, &self.events, attempt).await;
        commit_to_context(step, &result, &mut run.context);
        run.record_step(result.clone());
        result
    }

    /// Fan out a parallel group and join on all of it. Every member sees the
    /// same context snapshot; writes and log entries are applied afterwards in
    /// declared order.
    async fn run_group(
        &self,
        run: &mut WorkflowRun,
        group: &[&Step],
        cancellation: &CancellationToken,
        attempt: u32,
    ) -> Vec<StepResult> {
        if group.is_empty() {
            return Vec::new();
        }
        tracing::debug!(run_id = %run.id, size = group.len(), "executing parallel group");

        let run_id = run.id;
        let workflow = run.workflow_name.clone();
        let snapshot = run.context.clone();
        let results = join_all(group.iter().map(|&step| {
            let ctx = self.step_context(run_id, &workflow, snapshot.clone(), step, cancellation);
            self.executor.execute(step, ctx, &self.events, attempt)
        }))
        .await;

        for (&step, result) in group.iter().zip(&results) {
            commit_to_context(step, result, &mut run.context);
            run.record_step(result.clone());
        }
        results
    }

    fn step_context(
        &self,
        run_id: RunId,
        workflow: &str,
        context: RunContext,
        step: &Step,
        cancellation: &CancellationToken,
    ) -> StepContext {
        StepContext {
            run_id,
            workflow_name: workflow.to_string(),
            context,
            services: self.services.clone(),
            events: self.events.create_emitter(run_id, &step.name),
            cancellation: cancellation.clone(),
        }
    }
}

fn failure(step: &Step, result: &StepResult) -> StepFailure {
    StepFailure {
        step: step.name.clone(),
        message: result
            .error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string()),
    }
}

fn selected_branch<'a>(step: &'a Step, label: Option<&str>) -> Option<&'a [Step]> {
    let (StepKind::Condition { branches, .. }, Some(label)) = (&step.kind, label) else {
        return None;
    };
    let branch = branches.get(label).map(Vec::as_slice);
    if branch.is_none() {
        tracing::debug!(step = %step.name, branch = %label, "no steps bound to selected branch");
    }
    branch
}
