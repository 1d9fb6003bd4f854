//! Narrow interfaces to the outside world.
//!
//! Step handlers never perform I/O directly; they go through these traits so
//! the engine can be driven against real services or test doubles alike.

use crate::{GenerationOptions, StepError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Table-oriented record storage (CRM, spreadsheet, database).
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch(
        &self,
        table: &str,
        filter: Option<&str>,
        max_records: Option<usize>,
    ) -> Result<Vec<Value>, StepError>;

    async fn create(&self, table: &str, fields: &Map<String, Value>) -> Result<Value, StepError>;

    async fn update(
        &self,
        table: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<Value, StepError>;
}

/// Text generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, StepError>;

    async fn generate_json(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Value, StepError>;
}

/// Outbound notifications. Used by `notify` steps and by engine alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, html_body: &str) -> Result<(), StepError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub status_code: u16,
    pub body: Value,
}

impl WebhookResponse {
    pub fn is_success(&self) -> bool {
        self.status_code < 400
    }
}

#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn call(
        &self,
        url: &str,
        method: &str,
        payload: Option<&Value>,
        headers: &BTreeMap<String, String>,
    ) -> Result<WebhookResponse, StepError>;
}

/// Time source for delays, backoff waits and stuck-run detection.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// The set of collaborators shared by every run of a runner.
#[derive(Clone)]
pub struct Collaborators {
    pub records: Arc<dyn RecordStore>,
    pub text: Arc<dyn TextGenerator>,
    pub notifier: Arc<dyn Notifier>,
    pub webhooks: Arc<dyn WebhookClient>,
    pub clock: Arc<dyn Clock>,
}
