use crate::kind_mismatch;
use async_trait::async_trait;
use serde_json::json;
use wfcore::{Step, StepContext, StepError, StepHandler, StepKind, StepOutput, StepType};
use wfruntime::ConditionEvaluator;

/// Evaluates a predicate and reports the selected branch label.
/// The engine runs the branch; this handler only decides it.
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
            return Err(kind_mismatch(step, StepType::Condition));
        };

        let outcome = ConditionEvaluator::evaluate(condition, &ctx.context);
        let label =
            ConditionEvaluator::select_branch(outcome, true_label.as_deref(), false_label.as_deref());
        ctx.events.info(format!(
            "{} {} {} => {}",
            condition.field,
            condition.operator,
            condition.value,
            label
        ));

        Ok(StepOutput::new(json!({ "result": outcome, "branch": label })).with_branch(label))
    }
}
