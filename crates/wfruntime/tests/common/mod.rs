#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wfcore::{
    Clock, Collaborators, GenerationOptions, Notifier, RecordStore, Step, StepContext, StepError,
    StepHandler, StepKind, StepOutput, StepType, TextGenerator, WebhookClient, WebhookResponse,
};
use wfruntime::{ConditionEvaluator, HandlerRegistry, Runner, RuntimeConfig};

/// One scripted outcome for a step name
#[derive(Clone)]
pub enum Outcome {
    Ok(Value),
    Fail(&'static str),
    /// Wait on the run's cancellation signal forever
    Hang,
    /// Sleep on the tokio timer before succeeding
    Slow(Duration, Value),
}

/// Handler for one step kind whose result per step name is scripted in
/// advance. Unscripted names succeed with `{"step": name}`; the last
/// scripted outcome for a name repeats once the queue drains.
pub struct ScriptedHandler {
    kind: StepType,
    script: Mutex<HashMap<String, VecDeque<Outcome>>>,
    calls: Arc<Mutex<Vec<String>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedHandler {
    pub fn new(kind: StepType) -> Self {
        Self {
            kind,
            script: Mutex::new(HashMap::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_calls(mut self, calls: Arc<Mutex<Vec<String>>>) -> Self {
        self.calls = calls;
        self
    }

    pub fn script(self, step: &str, outcomes: Vec<Outcome>) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(step.to_string(), outcomes.into());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, step: &str) -> Outcome {
        let mut script = self.script.lock().unwrap();
        match script.get_mut(step) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Outcome::Ok(json!({ "step": step }))),
            None => Outcome::Ok(json!({ "step": step })),
        }
    }
}

#[async_trait]
impl StepHandler for ScriptedHandler {
    fn step_type(&self) -> StepType {
        self.kind
    }

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError> {
        self.calls.lock().unwrap().push(step.name.clone());
        let outcome = self.next_outcome(&step.name);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = match outcome {
            Outcome::Ok(data) => Ok(StepOutput::new(data)),
            Outcome::Fail(message) => Err(StepError::failed(message)),
            Outcome::Hang => {
                ctx.cancellable(std::future::pending::<Result<StepOutput, StepError>>())
                    .await
            }
            Outcome::Slow(delay, data) => {
                tokio::time::sleep(delay).await;
                Ok(StepOutput::new(data))
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Condition handler built on the runtime's evaluator
pub struct ConditionHandler;

#[async_trait]
impl StepHandler for ConditionHandler {
    fn step_type(&self) -> StepType {
        StepType::Condition
    }

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let StepKind::Condition {
            condition,
            true_label,
            false_label,
            ..
        } = &step.kind
        else {
            return Err(StepError::Configuration("not a condition step".into()));
        };
        let outcome = ConditionEvaluator::evaluate(condition, &ctx.context);
        let label = ConditionEvaluator::select_branch(
            outcome,
            true_label.as_deref(),
            false_label.as_deref(),
        );
        Ok(StepOutput::new(json!({ "result": outcome, "branch": label })).with_branch(label))
    }
}

/// Clock whose sleeps return immediately and advance `now`
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, subject: &str, html_body: &str) -> Result<(), StepError> {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), html_body.to_string()));
        Ok(())
    }
}

pub struct NoRecords;

#[async_trait]
impl RecordStore for NoRecords {
    async fn fetch(&self, _: &str, _: Option<&str>, _: Option<usize>) -> Result<Vec<Value>, StepError> {
        Ok(Vec::new())
    }

    async fn create(&self, _: &str, fields: &Map<String, Value>) -> Result<Value, StepError> {
        Ok(Value::Object(fields.clone()))
    }

    async fn update(&self, _: &str, _: &str, fields: &Map<String, Value>) -> Result<Value, StepError> {
        Ok(Value::Object(fields.clone()))
    }
}

pub struct NoText;

#[async_trait]
impl TextGenerator for NoText {
    async fn generate_text(&self, _: &str, _: &GenerationOptions) -> Result<String, StepError> {
        Err(StepError::Configuration("no text generator".into()))
    }

    async fn generate_json(&self, _: &str, _: &GenerationOptions) -> Result<Value, StepError> {
        Err(StepError::Configuration("no text generator".into()))
    }
}

pub struct NoWebhooks;

#[async_trait]
impl WebhookClient for NoWebhooks {
    async fn call(
        &self,
        _: &str,
        _: &str,
        _: Option<&Value>,
        _: &BTreeMap<String, String>,
    ) -> Result<WebhookResponse, StepError> {
        Ok(WebhookResponse {
            status_code: 204,
            body: Value::Null,
        })
    }
}

pub struct Harness {
    pub runner: Runner,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness(handlers: Vec<Arc<dyn StepHandler>>) -> Harness {
    harness_with_config(handlers, RuntimeConfig::default())
}

pub fn harness_with_config(handlers: Vec<Arc<dyn StepHandler>>, config: RuntimeConfig) -> Harness {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(ConditionHandler));
    for handler in handlers {
        registry.register(handler);
    }

    let clock = Arc::new(ManualClock::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let services = Collaborators {
        records: Arc::new(NoRecords),
        text: Arc::new(NoText),
        notifier: notifier.clone(),
        webhooks: Arc::new(NoWebhooks),
        clock: clock.clone(),
    };

    Harness {
        runner: Runner::with_config(Arc::new(registry), services, config),
        clock,
        notifier,
    }
}

pub fn dyn_handler(handler: &Arc<ScriptedHandler>) -> Arc<dyn StepHandler> {
    handler.clone()
}
