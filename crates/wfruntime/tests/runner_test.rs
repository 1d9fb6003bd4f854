mod common;

use async_trait::async_trait;
use common::{dyn_handler, harness, Outcome, ScriptedHandler};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wfcore::{
    ConditionOperator, EngineError, ExecutionEvent, RepositoryError, RunContext, RunId,
    RunStatus, Step, StepKind, StepStatus, StepType, TemplateError, TemplateVersion, WorkflowRun,
    WorkflowTemplate,
};
use wfruntime::RunRepository;

fn notify(name: &str) -> Step {
    Step::new(name, StepKind::notify(name, "body"))
}

fn names(run: &wfcore::WorkflowRun) -> Vec<&str> {
    run.steps.iter().map(|s| s.name.as_str()).collect()
}

#[tokio::test]
async fn required_failure_aborts_remaining_steps() {
    let handler = Arc::new(
        ScriptedHandler::new(StepType::Notify).script("second", vec![Outcome::Fail("smtp down")]),
    );
    let h = harness(vec![dyn_handler(&handler)]);
    let template = WorkflowTemplate::new("billing-check")
        .with_step(notify("first"))
        .with_step(notify("second"))
        .with_step(notify("third"));
    h.runner.templates().save_latest(template).await.unwrap();

    let run = h
        .runner
        .execute_workflow("billing-check", "manual", RunContext::new(), None)
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(names(&run), vec!["first", "second"]);
    assert_eq!(handler.calls(), vec!["first", "second"]);
    let error = run.error.as_deref().unwrap();
    assert!(error.contains("second"), "{}", error);
    assert!(error.contains("smtp down"), "{}", error);
    assert_eq!(run.retries, 0);
    assert!(run.completed_at.is_some());

    // Permanent failures alert exactly once
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.contains("billing-check"));
    assert!(sent[0].1.contains("smtp down"));
}

#[tokio::test]
async fn optional_failure_is_logged_and_skipped() {
    let handler = Arc::new(
        ScriptedHandler::new(StepType::Notify).script("nice-to-have", vec![Outcome::Fail("nope")]),
    );
    let h = harness(vec![dyn_handler(&handler)]);
    let template = WorkflowTemplate::new("report")
        .with_step(notify("first"))
        .with_step(notify("nice-to-have").optional())
        .with_step(notify("last"));
    h.runner.templates().save_latest(template).await.unwrap();

    let run = h
        .runner
        .execute_workflow("report", "cron", RunContext::new(), None)
        .await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(names(&run), vec!["first", "nice-to-have", "last"]);
    assert_eq!(run.steps[1].status, StepStatus::Failed);
    assert_eq!(run.steps[1].error.as_deref(), Some("nope"));
    assert!(run.error.is_none());
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn branch_sees_context_and_returns_to_outer_list() {
    let records = Arc::new(
        ScriptedHandler::new(StepType::FetchRecords)
            .script("load-lead", vec![Outcome::Ok(json!({ "score": 82 }))]),
    );
    let notifier = Arc::new(ScriptedHandler::new(StepType::Notify));
    let h = harness(vec![dyn_handler(&records), dyn_handler(&notifier)]);

    let gate = StepKind::condition("lead.score", ConditionOperator::GreaterThan, json!(50))
        .with_branch("true", vec![notify("hot-lead")])
        .with_branch("false", vec![notify("cold-lead")]);
    let template = WorkflowTemplate::new("lead-routing")
        .with_step(Step::new("load-lead", StepKind::fetch_records("leads")).with_context_key("lead"))
        .with_step(Step::new("score-gate", gate))
        .with_step(notify("after-gate"));
    h.runner.templates().save_latest(template).await.unwrap();

    let run = h
        .runner
        .execute_workflow("lead-routing", "webhook", RunContext::new(), None)
        .await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(names(&run), vec!["load-lead", "score-gate", "hot-lead", "after-gate"]);
    assert_eq!(run.steps[1].branch.as_deref(), Some("true"));
    assert_eq!(run.context.get("lead"), Some(&json!({ "score": 82 })));
}

#[tokio::test]
async fn required_failure_inside_branch_aborts_run() {
    let notifier = Arc::new(
        ScriptedHandler::new(StepType::Notify).script("escalate", vec![Outcome::Fail("bounced")]),
    );
    let h = harness(vec![dyn_handler(&notifier)]);
    let gate = StepKind::condition("priority", ConditionOperator::Equals, json!("high"))
        .with_branch("true", vec![notify("escalate")]);
    let template = WorkflowTemplate::new("triage")
        .with_step(Step::new("gate", gate))
        .with_step(notify("close"));
    h.runner.templates().save_latest(template).await.unwrap();

    let context: RunContext = [("priority".to_string(), json!("high"))].into_iter().collect();
    let run = h.runner.execute_workflow("triage", "manual", context, None).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(names(&run), vec!["gate", "escalate"]);
    assert!(!notifier.calls().contains(&"close".to_string()));
}

#[tokio::test]
async fn parallel_group_runs_concurrently_and_appends_in_declared_order() {
    let handler = Arc::new(
        ScriptedHandler::new(StepType::Webhook)
            .script("slow", vec![Outcome::Slow(Duration::from_millis(40), json!("slow"))])
            .script("fast", vec![Outcome::Ok(json!("fast"))]),
    );
    let notifier = Arc::new(ScriptedHandler::new(StepType::Notify));
    let h = harness(vec![dyn_handler(&handler), dyn_handler(&notifier)]);
    let template = WorkflowTemplate::new("sync")
        .with_step(
            Step::new("slow", StepKind::webhook("https://a.example"))
                .parallel()
                .with_context_key("a"),
        )
        .with_step(
            Step::new("fast", StepKind::webhook("https://b.example"))
                .parallel()
                .with_context_key("b"),
        )
        .with_step(notify("done"));
    h.runner.templates().save_latest(template).await.unwrap();

    let run = h.runner.execute_workflow("sync", "cron", RunContext::new(), None).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(names(&run), vec!["slow", "fast", "done"]);
    assert_eq!(handler.max_in_flight(), 2);
    assert_eq!(run.context.get("a"), Some(&json!("slow")));
    assert_eq!(run.context.get("b"), Some(&json!("fast")));
}

#[tokio::test]
async fn parallel_group_failure_waits_for_every_member() {
    let handler = Arc::new(
        ScriptedHandler::new(StepType::Webhook)
            .script("crm", vec![Outcome::Fail("502")])
            .script("erp", vec![Outcome::Fail("timeout")]),
    );
    let h = harness(vec![dyn_handler(&handler)]);
    let template = WorkflowTemplate::new("fanout")
        .with_step(Step::new("crm", StepKind::webhook("https://crm.example")).parallel())
        .with_step(Step::new("ok", StepKind::webhook("https://ok.example")).parallel())
        .with_step(Step::new("erp", StepKind::webhook("https://erp.example")).parallel());
    h.runner.templates().save_latest(template).await.unwrap();

    let run = h.runner.execute_workflow("fanout", "cron", RunContext::new(), None).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(names(&run), vec!["crm", "ok", "erp"]);
    let error = run.error.unwrap();
    assert!(error.contains("crm") && error.contains("erp"), "{}", error);
}

#[tokio::test]
async fn backoff_doubles_between_retries() {
    let handler = Arc::new(
        ScriptedHandler::new(StepType::Webhook).script("push", vec![Outcome::Fail("503")]),
    );
    let h = harness(vec![dyn_handler(&handler)]);
    let template = WorkflowTemplate::new("push-metrics")
        .with_retry(3)
        .with_retry_delay_ms(250)
        .with_step(Step::new("push", StepKind::webhook("https://metrics.example")));
    h.runner.templates().save_latest(template).await.unwrap();
    let mut events = h.runner.subscribe_events();

    let run = h
        .runner
        .execute_workflow("push-metrics", "cron", RunContext::new(), None)
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.retries, 3);
    assert_eq!(
        h.clock.sleeps(),
        vec![
            Duration::from_millis(250),
            Duration::from_millis(500),
            Duration::from_millis(1000)
        ]
    );
    let attempts: Vec<u32> = run.steps.iter().map(|s| s.attempt).collect();
    assert_eq!(attempts, vec![0, 1, 2, 3]);
    assert!(run
        .error
        .as_deref()
        .unwrap()
        .starts_with("retries exhausted after 3 attempts"));

    let mut retrying = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::RunRetrying { attempt, delay_ms, .. } = event {
            retrying.push((attempt, delay_ms));
        }
    }
    assert_eq!(retrying, vec![(1, 250), (2, 500), (3, 1000)]);
}

#[tokio::test]
async fn retry_skips_steps_that_already_completed() {
    let handler = Arc::new(
        ScriptedHandler::new(StepType::Notify)
            .script("flaky", vec![Outcome::Fail("rate limited"), Outcome::Ok(json!("sent"))]),
    );
    let h = harness(vec![dyn_handler(&handler)]);
    let template = WorkflowTemplate::new("digest")
        .with_retry(2)
        .with_step(notify("stable"))
        .with_step(notify("flaky"))
        .with_step(notify("tail"));
    h.runner.templates().save_latest(template).await.unwrap();

    let run = h.runner.execute_workflow("digest", "cron", RunContext::new(), None).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.retries, 1);
    assert_eq!(handler.calls(), vec!["stable", "flaky", "flaky", "tail"]);
    assert_eq!(names(&run), vec!["stable", "flaky", "flaky", "tail"]);
    assert_eq!(run.steps[1].status, StepStatus::Failed);
    assert_eq!(run.steps[2].attempt, 1);
    // Default base delay applies when the template sets none
    assert_eq!(h.clock.sleeps(), vec![Duration::from_millis(1000)]);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn retry_keeps_the_branch_a_completed_condition_took() {
    let crm = Arc::new(
        ScriptedHandler::new(StepType::Webhook)
            .script("mark-contacted", vec![Outcome::Ok(json!("contacted"))]),
    );
    let notifier = Arc::new(
        ScriptedHandler::new(StepType::Notify)
            .script("send", vec![Outcome::Fail("smtp down"), Outcome::Ok(json!("sent"))]),
    );
    let h = harness(vec![dyn_handler(&crm), dyn_handler(&notifier)]);

    // The true branch rewrites `stage`, so evaluating the gate again would pick false.
    let gate = StepKind::condition("stage", ConditionOperator::Equals, json!("new"))
        .with_branch(
            "true",
            vec![Step::new("mark-contacted", StepKind::webhook("https://crm.example"))
                .with_context_key("stage")],
        )
        .with_branch("false", vec![notify("followup")]);
    let template = WorkflowTemplate::new("outreach")
        .with_retry(1)
        .with_step(Step::new("gate", gate))
        .with_step(notify("send"));
    h.runner.templates().save_latest(template).await.unwrap();

    let context: RunContext = [("stage".to_string(), json!("new"))].into_iter().collect();
    let run = h.runner.execute_workflow("outreach", "manual", context, None).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.retries, 1);
    assert_eq!(names(&run), vec!["gate", "mark-contacted", "send", "send"]);
    assert_eq!(run.steps[0].branch.as_deref(), Some("true"));
    assert_eq!(notifier.calls(), vec!["send", "send"]);
    assert_eq!(crm.calls(), vec!["mark-contacted"]);
    assert_eq!(run.context.get("stage"), Some(&json!("contacted")));
}

#[tokio::test]
async fn retry_resumes_inside_the_recorded_branch() {
    let notifier = Arc::new(
        ScriptedHandler::new(StepType::Notify)
            .script("open-ticket", vec![Outcome::Fail("503"), Outcome::Ok(json!("T-1"))]),
    );
    let h = harness(vec![dyn_handler(&notifier)]);
    let gate = StepKind::condition("priority", ConditionOperator::Equals, json!("high"))
        .with_branch("true", vec![notify("page-oncall"), notify("open-ticket")]);
    let template = WorkflowTemplate::new("incident")
        .with_retry(1)
        .with_step(Step::new("gate", gate))
        .with_step(notify("close"));
    h.runner.templates().save_latest(template).await.unwrap();

    let context: RunContext = [("priority".to_string(), json!("high"))].into_iter().collect();
    let run = h.runner.execute_workflow("incident", "pager", context, None).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(
        names(&run),
        vec!["gate", "page-oncall", "open-ticket", "open-ticket", "close"]
    );
    assert_eq!(
        notifier.calls(),
        vec!["page-oncall", "open-ticket", "open-ticket", "close"]
    );
    assert_eq!(run.steps[3].attempt, 1);
    assert_eq!(run.steps[4].attempt, 1);
}

#[tokio::test]
async fn retry_of_a_parallel_group_reruns_only_failed_members() {
    let webhooks = Arc::new(
        ScriptedHandler::new(StepType::Webhook)
            .script("ping", vec![Outcome::Fail("502"), Outcome::Ok(json!("pong"))]),
    );
    let notifier = Arc::new(ScriptedHandler::new(StepType::Notify));
    let h = harness(vec![dyn_handler(&webhooks), dyn_handler(&notifier)]);
    let gate = StepKind::condition("tier", ConditionOperator::Equals, json!("gold"))
        .with_branch("true", vec![notify("vip-welcome")]);
    let template = WorkflowTemplate::new("onboarding")
        .with_retry(1)
        .with_step(Step::new("gate", gate).parallel())
        .with_step(Step::new("ping", StepKind::webhook("https://ping.example")).parallel());
    h.runner.templates().save_latest(template).await.unwrap();

    let context: RunContext = [("tier".to_string(), json!("gold"))].into_iter().collect();
    let run = h.runner.execute_workflow("onboarding", "signup", context, None).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(names(&run), vec!["gate", "ping", "ping", "vip-welcome"]);
    assert_eq!(run.steps.iter().filter(|s| s.name == "gate").count(), 1);
    assert_eq!(notifier.calls(), vec!["vip-welcome"]);
}

/// Repository whose writes always fail
struct UnwritableRepository;

#[async_trait]
impl RunRepository for UnwritableRepository {
    async fn save(&self, _: &WorkflowRun) -> Result<(), RepositoryError> {
        Err(RepositoryError::Storage("disk full".to_string()))
    }

    async fn history(&self, _: &str, _: usize) -> Result<Vec<WorkflowRun>, RepositoryError> {
        Ok(Vec::new())
    }

    async fn get(&self, run_id: RunId) -> Result<WorkflowRun, RepositoryError> {
        Err(RepositoryError::NotFound(run_id))
    }
}

#[tokio::test]
async fn persistence_failures_never_change_the_outcome() {
    let handler = Arc::new(
        ScriptedHandler::new(StepType::Notify).script("bounce", vec![Outcome::Fail("mailbox full")]),
    );
    let h = harness(vec![dyn_handler(&handler)]);
    let runner = h
        .runner
        .clone()
        .with_run_repository(Arc::new(UnwritableRepository));
    runner
        .templates()
        .save_latest(WorkflowTemplate::new("digest").with_step(notify("send")))
        .await
        .unwrap();
    runner
        .templates()
        .save_latest(WorkflowTemplate::new("bouncer").with_step(notify("bounce")))
        .await
        .unwrap();

    let run = runner.execute_workflow("digest", "cron", RunContext::new(), None).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.error.is_none());
    assert!(h.notifier.sent().is_empty());

    let run = runner.execute_workflow("bouncer", "cron", RunContext::new(), None).await;
    assert_eq!(run.status, RunStatus::Failed);
    let error = run.error.as_deref().unwrap();
    assert!(error.contains("mailbox full"), "{}", error);
    assert!(!error.contains("disk full"), "{}", error);
    assert_eq!(h.notifier.sent().len(), 1);
    assert!(runner.active_runs().is_empty());
}

#[tokio::test]
async fn lead_intake_exhausts_two_retries_and_alerts() {
    let records = Arc::new(ScriptedHandler::new(StepType::FetchRecords));
    let classifier = Arc::new(
        ScriptedHandler::new(StepType::AiClassify)
            .script("ai_classify", vec![Outcome::Fail("rate limited")]),
    );
    let notifier = Arc::new(ScriptedHandler::new(StepType::Notify));
    let h = harness(vec![
        dyn_handler(&records),
        dyn_handler(&classifier),
        dyn_handler(&notifier),
    ]);
    let template = WorkflowTemplate::new("lead-intake")
        .with_retry(2)
        .with_retry_delay_ms(100)
        .with_step(Step::new("fetch_records", StepKind::fetch_records("leads")))
        .with_step(Step::new(
            "ai_classify",
            StepKind::ai_classify("Classify {{lead}}", &["hot", "cold"]),
        ))
        .with_step(notify("notify"));
    h.runner.templates().save_latest(template).await.unwrap();

    let run = h
        .runner
        .execute_workflow("lead-intake", "webhook", RunContext::new(), None)
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.retries, 2);
    assert_eq!(records.calls().len(), 1);
    assert_eq!(classifier.calls().len(), 3);
    assert!(notifier.calls().is_empty());
    assert_eq!(
        h.clock.sleeps(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
    assert!(run.error.as_deref().unwrap().contains("ai_classify"));

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("rate limited"));

    let stored = h.runner.get_run(run.id).await.unwrap();
    assert_eq!(stored, run);
    let stats = h.runner.metrics("lead-intake").unwrap();
    assert_eq!((stats.runs, stats.failed, stats.retries), (1, 1, 2));
}

#[tokio::test]
async fn missing_template_fails_without_retry() {
    let h = harness(vec![]);
    let run = h
        .runner
        .execute_workflow("ghost", "manual", RunContext::new(), None)
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.steps.is_empty());
    assert_eq!(run.retries, 0);
    assert!(run.error.as_deref().unwrap().contains("not found"));
    assert!(h.clock.sleeps().is_empty());
    assert_eq!(h.notifier.sent().len(), 1);
    assert!(h.runner.active_runs().is_empty());
}

#[tokio::test]
async fn pinned_version_is_used_for_the_run() {
    let handler = Arc::new(ScriptedHandler::new(StepType::Notify));
    let h = harness(vec![dyn_handler(&handler)]);
    let store = h.runner.templates();
    store
        .save_latest(WorkflowTemplate::new("weekly").with_step(notify("v1-step")))
        .await
        .unwrap();
    assert_eq!(store.create_version("weekly").await.unwrap(), 1);
    store
        .save_latest(WorkflowTemplate::new("weekly").with_step(notify("v2-step")))
        .await
        .unwrap();

    let pinned = h
        .runner
        .execute_workflow("weekly", "cron", RunContext::new(), Some(TemplateVersion::Number(1)))
        .await;
    let latest = h
        .runner
        .execute_workflow("weekly", "cron", RunContext::new(), None)
        .await;

    assert_eq!(pinned.version, TemplateVersion::Number(1));
    assert_eq!(names(&pinned), vec!["v1-step"]);
    assert_eq!(latest.version, TemplateVersion::Latest);
    assert_eq!(names(&latest), vec!["v2-step"]);
}

#[tokio::test]
async fn duplicate_step_names_are_rejected() {
    let h = harness(vec![]);
    let gate = StepKind::condition("x", ConditionOperator::Exists, json!(null))
        .with_branch("true", vec![notify("send")]);
    let template = WorkflowTemplate::new("dupes")
        .with_step(Step::new("gate", gate))
        .with_step(notify("send"));

    let err = h.runner.templates().save_latest(template).await.unwrap_err();
    assert_eq!(err, TemplateError::DuplicateStepName("send".to_string()));
}

#[tokio::test]
async fn replay_creates_an_independent_run() {
    let handler = Arc::new(
        ScriptedHandler::new(StepType::Notify)
            .script("send", vec![Outcome::Fail("smtp down"), Outcome::Ok(json!("ok"))]),
    );
    let h = harness(vec![dyn_handler(&handler)]);
    h.runner
        .templates()
        .save_latest(WorkflowTemplate::new("welcome").with_step(notify("send")))
        .await
        .unwrap();

    let context: RunContext = [("email".to_string(), json!("a@example.com"))]
        .into_iter()
        .collect();
    let original = h.runner.execute_workflow("welcome", "signup", context, None).await;
    assert_eq!(original.status, RunStatus::Failed);

    let replayed = h.runner.replay(original.id).await.unwrap();
    assert_ne!(replayed.id, original.id);
    assert_eq!(replayed.status, RunStatus::Completed);
    assert_eq!(replayed.trigger, format!("replay:{}", original.id));
    assert_eq!(replayed.context.get("email"), Some(&json!("a@example.com")));

    assert_eq!(h.runner.get_run(original.id).await.unwrap(), original);
    let history = h.runner.history("welcome", None).await.unwrap();
    assert_eq!(history.len(), 2);

    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        h.runner.replay(missing).await,
        Err(EngineError::RunNotFound(id)) if id == missing
    ));
}
