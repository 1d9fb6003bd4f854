use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;
use wfcore::{GenerationOptions, RecordStore, StepError, TextGenerator};

/// Record store kept in process memory, keyed by table.
///
/// Records get a generated `id` unless one is supplied. Filters have the form
/// `field=value` and match on the field's string form.
#[derive(Default)]
pub struct InMemoryRecordStore {
    tables: RwLock<HashMap<String, Vec<Map<String, Value>>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table with records, replacing any existing rows
    pub async fn seed(&self, table: &str, records: Vec<Map<String, Value>>) {
        self.tables.write().await.insert(table.to_string(), records);
    }
}

fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_filter(filter: &str) -> Result<(&str, &str), StepError> {
    filter
        .split_once('=')
        .map(|(field, value)| (field.trim(), value.trim()))
        .filter(|(field, _)| !field.is_empty())
        .ok_or_else(|| StepError::InvalidParameter {
            field: "filter".to_string(),
            reason: format!("expected field=value, got '{}'", filter),
        })
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn fetch(
        &self,
        table: &str,
        filter: Option<&str>,
        max_records: Option<usize>,
    ) -> Result<Vec<Value>, StepError> {
        let filter = filter.map(parse_filter).transpose()?;
        let tables = self.tables.read().await;
        let rows = tables.get(table).map(Vec::as_slice).unwrap_or_default();

        Ok(rows
            .iter()
            .filter(|row| match filter {
                Some((field, expected)) => row.get(field).is_some_and(|v| field_text(v) == expected),
                None => true,
            })
            .take(max_records.unwrap_or(usize::MAX))
            .map(|row| Value::Object(row.clone()))
            .collect())
    }

    async fn create(&self, table: &str, fields: &Map<String, Value>) -> Result<Value, StepError> {
        let mut record = fields.clone();
        record
            .entry("id")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));

        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        Ok(Value::Object(record))
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<Value, StepError> {
        let mut tables = self.tables.write().await;
        let record = tables
            .get_mut(table)
            .and_then(|rows| {
                rows.iter_mut()
                    .find(|row| row.get("id").is_some_and(|v| field_text(v) == id))
            })
            .ok_or_else(|| StepError::failed(format!("record {} not found in {}", id, table)))?;

        for (key, value) in fields {
            record.insert(key.clone(), value.clone());
        }
        Ok(Value::Object(record.clone()))
    }
}

/// Text generator used when no model backend is configured; every call fails.
pub struct UnconfiguredTextGenerator;

#[async_trait]
impl TextGenerator for UnconfiguredTextGenerator {
    async fn generate_text(&self, _prompt: &str, _options: &GenerationOptions) -> Result<String, StepError> {
        Err(StepError::Configuration("no text generator configured".to_string()))
    }

    async fn generate_json(&self, _prompt: &str, _options: &GenerationOptions) -> Result<Value, StepError> {
        Err(StepError::Configuration("no text generator configured".to_string()))
    }
}
