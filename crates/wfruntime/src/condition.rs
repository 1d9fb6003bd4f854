//! Branch predicates for `condition` steps.

use serde_json::Value;
use wfcore::{ConditionExpr, ConditionOperator, RunContext};

pub const DEFAULT_TRUE_LABEL: &str = "true";
pub const DEFAULT_FALSE_LABEL: &str = "false";

/// Stateless evaluator; all logic lives in associated functions.
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Evaluates `expr` against the context. Unknown operators pass.
    pub fn evaluate(expr: &ConditionExpr, context: &RunContext) -> bool {
        let actual = context.lookup(&expr.field);
        match &expr.operator {
            ConditionOperator::Exists => actual.is_some_and(|v| !v.is_null()),
            ConditionOperator::Equals => loosely_equal(actual.unwrap_or(&Value::Null), &expr.value),
            ConditionOperator::NotEquals => {
                !loosely_equal(actual.unwrap_or(&Value::Null), &expr.value)
            }
            ConditionOperator::Contains => actual.is_some_and(|v| contains(v, &expr.value)),
            ConditionOperator::GreaterThan => compare(actual, &expr.value, |a, b| a > b),
            ConditionOperator::LessThan => compare(actual, &expr.value, |a, b| a < b),
            ConditionOperator::Other(op) => {
                tracing::warn!(operator = %op, field = %expr.field, "unknown condition operator, treating as true");
                true
            }
        }
    }

    /// Maps an evaluation result to a branch label, honouring custom labels.
    pub fn select_branch(
        outcome: bool,
        true_label: Option<&str>,
        false_label: Option<&str>,
    ) -> String {
        if outcome {
            true_label.unwrap_or(DEFAULT_TRUE_LABEL).to_string()
        } else {
            false_label.unwrap_or(DEFAULT_FALSE_LABEL).to_string()
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => match (actual, expected) {
            (Value::Null, _) | (_, Value::Null) => false,
            _ => as_text(actual) == as_text(expected),
        },
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, needle)),
        Value::Null => false,
        other => as_text(other).contains(&as_text(needle)),
    }
}

fn compare(actual: Option<&Value>, expected: &Value, op: fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(as_number), as_number(expected)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}
