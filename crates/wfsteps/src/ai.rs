use crate::kind_mismatch;
use async_trait::async_trait;
use serde_json::{json, Value};
use wfcore::{Step, StepContext, StepError, StepHandler, StepKind, StepOutput, StepType};

/// Ask the text generator to pick one of a fixed set of categories
pub struct AiClassifyHandler;

impl AiClassifyHandler {
    fn build_prompt(prompt: &str, categories: &[String]) -> String {
        if categories.is_empty() {
            return prompt.to_string();
        }
        format!(
            "{}\n\nAnswer with exactly one of: {}",
            prompt,
            categories.join(", ")
        )
    }

    /// First category named in the response, compared case-insensitively.
    /// An exact match wins over a substring match.
    fn match_category<'a>(response: &str, categories: &'a [String]) -> Option<&'a String> {
        let answer = response.trim().trim_matches(|c: char| c == '"' || c == '.').to_lowercase();
        categories
            .iter()
            .find(|c| c.to_lowercase() == answer)
            .or_else(|| categories.iter().find(|c| answer.contains(&c.to_lowercase())))
    }
}

#[async_trait]
impl StepHandler for AiClassifyHandler {
    fn step_type(&self) -> StepType {
        StepType::AiClassify
    }

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let StepKind::AiClassify {
            prompt,
            categories,
            options,
        } = &step.kind
        else {
            return Err(kind_mismatch(step, StepType::AiClassify));
        };

        let prompt = Self::build_prompt(&ctx.interpolate(prompt), categories);
        let response = ctx
            .cancellable(ctx.services.text.generate_text(&prompt, options))
            .await?;

        if categories.is_empty() {
            return Ok(StepOutput::new(json!({ "category": response.trim() })));
        }
        match Self::match_category(&response, categories) {
            Some(category) => {
                ctx.events.info(format!("Classified as {}", category));
                Ok(StepOutput::new(json!({ "category": category, "raw": response })))
            }
            None => Err(StepError::failed(format!(
                "response '{}' matches none of: {}",
                response.trim(),
                categories.join(", ")
            ))),
        }
    }
}

/// Free-form or JSON text generation
pub struct AiGenerateHandler;

#[async_trait]
impl StepHandler for AiGenerateHandler {
    fn step_type(&self) -> StepType {
        StepType::AiGenerate
    }

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let StepKind::AiGenerate {
            prompt,
            json,
            options,
        } = &step.kind
        else {
            return Err(kind_mismatch(step, StepType::AiGenerate));
        };

        let prompt = ctx.interpolate(prompt);
        let data = if *json {
            ctx.cancellable(ctx.services.text.generate_json(&prompt, options))
                .await?
        } else {
            Value::String(
                ctx.cancellable(ctx.services.text.generate_text(&prompt, options))
                    .await?,
            )
        };
        Ok(StepOutput::new(data))
    }
}
