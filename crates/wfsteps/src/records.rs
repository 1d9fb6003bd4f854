use crate::kind_mismatch;
use async_trait::async_trait;
use serde_json::{json, Value};
use wfcore::{Step, StepContext, StepError, StepHandler, StepKind, StepOutput, StepType};

/// Query a table through the record store
pub struct FetchRecordsHandler;

#[async_trait]
impl StepHandler for FetchRecordsHandler {
    fn step_type(&self) -> StepType {
        StepType::FetchRecords
    }

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let StepKind::FetchRecords {
            table,
            filter,
            max_records,
        } = &step.kind
        else {
            return Err(kind_mismatch(step, StepType::FetchRecords));
        };

        let table = ctx.interpolate(table);
        let filter = filter.as_deref().map(|f| ctx.interpolate(f));
        let records = ctx
            .cancellable(ctx.services.records.fetch(&table, filter.as_deref(), *max_records))
            .await?;

        ctx.events.info(format!("Fetched {} records from {}", records.len(), table));
        Ok(StepOutput::new(Value::Array(records)))
    }
}

/// Insert one record
pub struct CreateRecordHandler;

#[async_trait]
impl StepHandler for CreateRecordHandler {
    fn step_type(&self) -> StepType {
        StepType::CreateRecord
    }

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let StepKind::CreateRecord { table, fields } = &step.kind else {
            return Err(kind_mismatch(step, StepType::CreateRecord));
        };
        if fields.is_empty() {
            return Err(StepError::MissingParameter("fields".to_string()));
        }

        let table = ctx.interpolate(table);
        let fields = ctx.context.interpolate_map(fields);
        let record = ctx
            .cancellable(ctx.services.records.create(&table, &fields))
            .await?;

        ctx.events.info(format!("Created record in {}", table));
        Ok(StepOutput::new(record))
    }
}

/// Patch one record by id
pub struct UpdateRecordHandler;

#[async_trait]
impl StepHandler for UpdateRecordHandler {
    fn step_type(&self) -> StepType {
        StepType::UpdateRecord
    }

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let StepKind::UpdateRecord {
            table,
            record_id,
            fields,
        } = &step.kind
        else {
            return Err(kind_mismatch(step, StepType::UpdateRecord));
        };

        let record_id = ctx.interpolate(record_id);
        if record_id.trim().is_empty() || record_id.contains("{{") {
            return Err(StepError::InvalidParameter {
                field: "recordId".to_string(),
                reason: format!("'{}' does not resolve to a record id", record_id),
            });
        }

        let table = ctx.interpolate(table);
        let fields = ctx.context.interpolate_map(fields);
        let record = ctx
            .cancellable(ctx.services.records.update(&table, &record_id, &fields))
            .await?;

        ctx.events.info(format!("Updated record {} in {}", record_id, table));
        Ok(StepOutput::new(json!({ "id": record_id, "record": record })))
    }
}
