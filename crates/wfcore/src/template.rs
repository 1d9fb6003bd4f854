use crate::TemplateError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Template version selector: the mutable "latest" document or a numbered snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "VersionRepr", into = "VersionRepr")]
pub enum TemplateVersion {
    #[default]
    Latest,
    Number(u32),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum VersionRepr {
    Number(u32),
    Label(String),
}

impl TryFrom<VersionRepr> for TemplateVersion {
    type Error = String;

    fn try_from(repr: VersionRepr) -> Result<Self, Self::Error> {
        match repr {
            VersionRepr::Number(n) => Ok(TemplateVersion::Number(n)),
            VersionRepr::Label(label) => label.parse(),
        }
    }
}

impl From<TemplateVersion> for VersionRepr {
    fn from(version: TemplateVersion) -> Self {
        match version {
            TemplateVersion::Latest => VersionRepr::Label("latest".to_string()),
            TemplateVersion::Number(n) => VersionRepr::Number(n),
        }
    }
}

impl FromStr for TemplateVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("latest") {
            return Ok(TemplateVersion::Latest);
        }
        s.trim_start_matches(['v', 'V'])
            .parse::<u32>()
            .map(TemplateVersion::Number)
            .map_err(|_| format!("invalid template version '{}'", s))
    }
}

impl fmt::Display for TemplateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateVersion::Latest => f.write_str("latest"),
            TemplateVersion::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Complete workflow template document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTemplate {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: TemplateVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub retry: bool,
    #[serde(default)]
    pub max_retries: u32,
    /// Overrides the configured backoff base for this template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: TemplateVersion::Latest,
            description: None,
            steps: Vec::new(),
            retry: false,
            max_retries: 0,
            retry_delay_ms: None,
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_retry(mut self, max_retries: u32) -> Self {
        self.retry = true;
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = Some(delay_ms);
        self
    }

    /// Checks the template can be executed: at least one step, non-empty
    /// names, and names unique across every branch of the step tree.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.name.trim().is_empty() {
            return Err(TemplateError::Invalid("template name is empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(TemplateError::Invalid(format!(
                "template '{}' has no steps",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        let mut pending: Vec<&Step> = self.steps.iter().collect();
        while let Some(step) = pending.pop() {
            if step.name.trim().is_empty() {
                return Err(TemplateError::Invalid(format!(
                    "a {} step has an empty name",
                    step.step_type()
                )));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(TemplateError::DuplicateStepName(step.name.clone()));
            }
            if let StepKind::Condition { branches, .. } = &step.kind {
                pending.extend(branches.values().flatten());
            }
        }
        Ok(())
    }
}

fn default_required() -> bool {
    true
}

/// A single typed unit of work within a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_key: Option<String>,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl Step {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            required: true,
            parallel: false,
            context_key: None,
            kind,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn with_context_key(mut self, key: impl Into<String>) -> Self {
        self.context_key = Some(key.into());
        self
    }

    pub fn step_type(&self) -> StepType {
        self.kind.step_type()
    }
}

/// Kind-specific step parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StepKind {
    FetchRecords {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_records: Option<usize>,
    },
    CreateRecord {
        table: String,
        #[serde(default)]
        fields: Map<String, Value>,
    },
    UpdateRecord {
        table: String,
        record_id: String,
        #[serde(default)]
        fields: Map<String, Value>,
    },
    AiClassify {
        prompt: String,
        #[serde(default)]
        categories: Vec<String>,
        #[serde(default)]
        options: GenerationOptions,
    },
    AiGenerate {
        prompt: String,
        #[serde(default)]
        json: bool,
        #[serde(default)]
        options: GenerationOptions,
    },
    Condition {
        condition: ConditionExpr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        true_label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        false_label: Option<String>,
        #[serde(default)]
        branches: BTreeMap<String, Vec<Step>>,
    },
    Webhook {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Notify {
        subject: String,
        body: String,
    },
    Delay {
        duration_ms: u64,
    },
}

fn default_method() -> String {
    "POST".to_string()
}

impl StepKind {
    pub fn step_type(&self) -> StepType {
        match self {
            StepKind::FetchRecords { .. } => StepType::FetchRecords,
            StepKind::CreateRecord { .. } => StepType::CreateRecord,
            StepKind::UpdateRecord { .. } => StepType::UpdateRecord,
            StepKind::AiClassify { .. } => StepType::AiClassify,
            StepKind::AiGenerate { .. } => StepType::AiGenerate,
            StepKind::Condition { .. } => StepType::Condition,
            StepKind::Webhook { .. } => StepType::Webhook,
            StepKind::Notify { .. } => StepType::Notify,
            StepKind::Delay { .. } => StepType::Delay,
        }
    }

    pub fn fetch_records(table: impl Into<String>) -> Self {
        StepKind::FetchRecords {
            table: table.into(),
            filter: None,
            max_records: None,
        }
    }

    pub fn ai_classify(prompt: impl Into<String>, categories: &[&str]) -> Self {
        StepKind::AiClassify {
            prompt: prompt.into(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            options: GenerationOptions::default(),
        }
    }

    pub fn ai_generate(prompt: impl Into<String>) -> Self {
        StepKind::AiGenerate {
            prompt: prompt.into(),
            json: false,
            options: GenerationOptions::default(),
        }
    }

    pub fn notify(subject: impl Into<String>, body: impl Into<String>) -> Self {
        StepKind::Notify {
            subject: subject.into(),
            body: body.into(),
        }
    }

    pub fn webhook(url: impl Into<String>) -> Self {
        StepKind::Webhook {
            url: url.into(),
            method: default_method(),
            payload: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn delay(duration_ms: u64) -> Self {
        StepKind::Delay { duration_ms }
    }

    /// A condition with default `true`/`false` labels and no branches yet.
    pub fn condition(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        StepKind::Condition {
            condition: ConditionExpr {
                field: field.into(),
                operator,
                value,
            },
            true_label: None,
            false_label: None,
            branches: BTreeMap::new(),
        }
    }

    /// Binds a step list to a branch label. No-op on non-condition kinds.
    pub fn with_branch(mut self, label: impl Into<String>, steps: Vec<Step>) -> Self {
        if let StepKind::Condition { branches, .. } = &mut self {
            branches.insert(label.into(), steps);
        }
        self
    }
}

/// Dispatch key for step handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    FetchRecords,
    CreateRecord,
    UpdateRecord,
    AiClassify,
    AiGenerate,
    Condition,
    Webhook,
    Notify,
    Delay,
}

impl StepType {
    pub const ALL: [StepType; 9] = [
        StepType::FetchRecords,
        StepType::CreateRecord,
        StepType::UpdateRecord,
        StepType::AiClassify,
        StepType::AiGenerate,
        StepType::Condition,
        StepType::Webhook,
        StepType::Notify,
        StepType::Delay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::FetchRecords => "fetch_records",
            StepType::CreateRecord => "create_record",
            StepType::UpdateRecord => "update_record",
            StepType::AiClassify => "ai_classify",
            StepType::AiGenerate => "ai_generate",
            StepType::Condition => "condition",
            StepType::Webhook => "webhook",
            StepType::Notify => "notify",
            StepType::Delay => "delay",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options forwarded to the text generator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Branch predicate evaluated against the run context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionExpr {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Exists,
    /// Operator this engine does not know yet; evaluates to true.
    Other(String),
}

impl From<String> for ConditionOperator {
    fn from(s: String) -> Self {
        match s.as_str() {
            "equals" => ConditionOperator::Equals,
            "not_equals" => ConditionOperator::NotEquals,
            "contains" => ConditionOperator::Contains,
            "greater_than" => ConditionOperator::GreaterThan,
            "less_than" => ConditionOperator::LessThan,
            "exists" => ConditionOperator::Exists,
            _ => ConditionOperator::Other(s),
        }
    }
}

impl ConditionOperator {
    pub fn as_str(&self) -> &str {
        match self {
            ConditionOperator::Equals => "equals",
            ConditionOperator::NotEquals => "not_equals",
            ConditionOperator::Contains => "contains",
            ConditionOperator::GreaterThan => "greater_than",
            ConditionOperator::LessThan => "less_than",
            ConditionOperator::Exists => "exists",
            ConditionOperator::Other(s) => s,
        }
    }
}

impl From<ConditionOperator> for String {
    fn from(op: ConditionOperator) -> Self {
        match op {
            ConditionOperator::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
