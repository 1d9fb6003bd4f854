use crate::kind_mismatch;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use wfcore::{
    Step, StepContext, StepError, StepHandler, StepKind, StepOutput, StepType, WebhookClient,
    WebhookResponse,
};

/// Outbound HTTP call
pub struct WebhookHandler;

#[async_trait]
impl StepHandler for WebhookHandler {
    fn step_type(&self) -> StepType {
        StepType::Webhook
    }

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let StepKind::Webhook {
            url,
            method,
            payload,
            headers,
        } = &step.kind
        else {
            return Err(kind_mismatch(step, StepType::Webhook));
        };

        let url = ctx.interpolate(url);
        if url.trim().is_empty() {
            return Err(StepError::MissingParameter("url".to_string()));
        }
        let payload = payload.as_ref().map(|p| ctx.interpolate_value(p));
        let headers: BTreeMap<String, String> = headers
            .iter()
            .map(|(k, v)| (k.clone(), ctx.interpolate(v)))
            .collect();

        ctx.events.info(format!("{} {}", method, url));
        let response = ctx
            .cancellable(ctx.services.webhooks.call(&url, method, payload.as_ref(), &headers))
            .await?;
        ctx.events.info(format!("Response status: {}", response.status_code));

        if !response.is_success() {
            return Err(StepError::failed(format!(
                "webhook {} {} returned status {}",
                method, url, response.status_code
            )));
        }
        Ok(StepOutput::new(json!({
            "statusCode": response.status_code,
            "body": response.body,
        })))
    }
}

/// Webhook transport over reqwest
pub struct HttpWebhookClient {
    client: reqwest::Client,
}

impl HttpWebhookClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpWebhookClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookClient for HttpWebhookClient {
    async fn call(
        &self,
        url: &str,
        method: &str,
        payload: Option<&Value>,
        headers: &BTreeMap<String, String>,
    ) -> Result<WebhookResponse, StepError> {
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| StepError::Configuration(format!("Unsupported method: {}", method)))?;

        let mut request = self.client.request(method, url);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        if let Some(body) = payload {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StepError::failed(format!("HTTP request failed: {}", e)))?;
        let status_code = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| StepError::failed(format!("Failed to read response: {}", e)))?;

        // Non-JSON bodies are kept as text
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(WebhookResponse { status_code, body })
    }
}
