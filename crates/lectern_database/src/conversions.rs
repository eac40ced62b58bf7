//! Conversions between domain records and database rows.

use crate::models::{LedgerEntryRow, RunRow, SessionMessageRow, SessionRow, StepRunRow};
use lectern_core::{
    ConversationId, FailedItem, LedgerEntry, LedgerEntryBuilder, LedgerEntryId, Run, RunBuilder,
    RunId, Session, SessionMessage, SessionMetadata, StepRun, StepRunBuilder, StepRunId,
    TokenUsage,
};
use lectern_error::{DatabaseError, DatabaseErrorKind};
use std::collections::BTreeMap;
use std::str::FromStr;

fn parse<T: FromStr>(column: &str, value: &str) -> Result<T, DatabaseError> {
    value.parse().map_err(|_| {
        DatabaseError::new(DatabaseErrorKind::Serialization(format!(
            "invalid {} value '{}'",
            column, value
        )))
    })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn usage(input: i64, output: i64) -> TokenUsage {
    TokenUsage::new(input.max(0) as u64, output.max(0) as u64)
}

fn builder_error(entity: &str, e: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::Serialization(format!(
        "cannot rebuild {}: {}",
        entity, e
    )))
}

impl From<&Run> for RunRow {
    fn from(run: &Run) -> Self {
        Self {
            id: run.id().as_uuid(),
            flow_name: run.flow_name().clone(),
            status: run.status().to_string(),
            execution_mode: run.execution_mode().to_string(),
            inputs: run.inputs().clone(),
            outputs: run.outputs().clone(),
            current_step: run.current_step().clone(),
            step_progress: to_i32(*run.step_progress()),
            total_steps: to_i32(*run.total_steps()),
            input_tokens: to_i64(run.usage().input_tokens),
            output_tokens: to_i64(run.usage().output_tokens),
            total_tokens: to_i64(run.usage().total_tokens),
            cost_estimate: *run.cost_estimate(),
            completion: run.completion().map(|c| c.to_string()),
            failed_items: serde_json::to_value(run.failed_items())
                .unwrap_or_else(|_| serde_json::Value::Array(Vec::new())),
            error_message: run.error_message().clone(),
            created_at: *run.created_at(),
            started_at: *run.started_at(),
            completed_at: *run.completed_at(),
            updated_at: *run.updated_at(),
        }
    }
}

impl TryFrom<RunRow> for Run {
    type Error = DatabaseError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let failed_items: Vec<FailedItem> = serde_json::from_value(row.failed_items)?;
        RunBuilder::default()
            .id(RunId::from(row.id))
            .flow_name(row.flow_name)
            .status(parse::<lectern_core::RunStatus>("status", &row.status)?)
            .execution_mode(parse::<lectern_core::ExecutionMode>(
                "execution_mode",
                &row.execution_mode,
            )?)
            .inputs(row.inputs)
            .outputs(row.outputs)
            .current_step(row.current_step)
            .step_progress(row.step_progress.max(0) as u32)
            .total_steps(row.total_steps.max(0) as u32)
            .usage(usage(row.input_tokens, row.output_tokens))
            .cost_estimate(row.cost_estimate)
            .completion(
                row.completion
                    .as_deref()
                    .map(|c| parse::<lectern_core::Completion>("completion", c))
                    .transpose()?,
            )
            .failed_items(failed_items)
            .error_message(row.error_message)
            .created_at(row.created_at)
            .started_at(row.started_at)
            .completed_at(row.completed_at)
            .updated_at(row.updated_at)
            .build()
            .map_err(|e| builder_error("run", e))
    }
}

impl From<&StepRun> for StepRunRow {
    fn from(step: &StepRun) -> Self {
        Self {
            id: step.id().as_uuid(),
            run_id: step.run_id().as_uuid(),
            step_name: step.step_name().clone(),
            step_order: to_i32(*step.order()),
            stage_index: to_i32(*step.stage_index()),
            item_index: step.item_index().map(to_i32),
            status: step.status().to_string(),
            inputs: step.inputs().clone(),
            outputs: step.outputs().clone(),
            input_tokens: to_i64(step.usage().input_tokens),
            output_tokens: to_i64(step.usage().output_tokens),
            total_tokens: to_i64(step.usage().total_tokens),
            cost_estimate: *step.cost_estimate(),
            attempts: to_i32(*step.attempts()),
            execution_time_ms: to_i64(*step.execution_time_ms()),
            error_message: step.error_message().clone(),
            failure_kind: step.failure_kind().map(|k| k.to_string()),
            started_at: *step.started_at(),
            completed_at: *step.completed_at(),
        }
    }
}

impl TryFrom<StepRunRow> for StepRun {
    type Error = DatabaseError;

    fn try_from(row: StepRunRow) -> Result<Self, Self::Error> {
        StepRunBuilder::default()
            .id(StepRunId::from(row.id))
            .run_id(RunId::from(row.run_id))
            .step_name(row.step_name)
            .order(row.step_order.max(0) as u32)
            .stage_index(row.stage_index.max(0) as u32)
            .item_index(row.item_index.map(|i| i.max(0) as u32))
            .status(parse::<lectern_core::StepStatus>("status", &row.status)?)
            .inputs(row.inputs)
            .outputs(row.outputs)
            .usage(usage(row.input_tokens, row.output_tokens))
            .cost_estimate(row.cost_estimate)
            .attempts(row.attempts.max(0) as u32)
            .execution_time_ms(row.execution_time_ms.max(0) as u64)
            .error_message(row.error_message)
            .failure_kind(
                row.failure_kind
                    .as_deref()
                    .map(|k| parse::<lectern_core::FailureKind>("failure_kind", k))
                    .transpose()?,
            )
            .started_at(row.started_at)
            .completed_at(row.completed_at)
            .build()
            .map_err(|e| builder_error("step run", e))
    }
}

impl From<&LedgerEntry> for LedgerEntryRow {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.id().as_uuid(),
            call_id: entry.call_id().as_uuid(),
            step_run_id: entry.step_run_id().map(|id| id.as_uuid()),
            conversation_id: entry.conversation_id().as_ref().map(|c| c.as_str().to_string()),
            provider: entry.provider().clone(),
            model: entry.model().clone(),
            input_tokens: to_i64(entry.usage().input_tokens),
            output_tokens: to_i64(entry.usage().output_tokens),
            total_tokens: to_i64(entry.usage().total_tokens),
            cost_estimate: *entry.cost_estimate(),
            status: entry.status().to_string(),
            retry_attempt: to_i32(*entry.retry_attempt()),
            cached: *entry.cached(),
            error_message: entry.error_message().clone(),
            started_at: *entry.started_at(),
            completed_at: *entry.completed_at(),
            response_ref: entry.response_ref().clone(),
        }
    }
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = DatabaseError;

    fn try_from(row: LedgerEntryRow) -> Result<Self, Self::Error> {
        LedgerEntryBuilder::default()
            .id(LedgerEntryId::from(row.id))
            .call_id(lectern_core::CallId::from(row.call_id))
            .step_run_id(row.step_run_id.map(StepRunId::from))
            .conversation_id(row.conversation_id.map(ConversationId::from))
            .provider(row.provider)
            .model(row.model)
            .usage(usage(row.input_tokens, row.output_tokens))
            .cost_estimate(row.cost_estimate)
            .status(parse::<lectern_core::LedgerStatus>("status", &row.status)?)
            .retry_attempt(row.retry_attempt.max(1) as u32)
            .cached(row.cached)
            .error_message(row.error_message)
            .started_at(row.started_at)
            .completed_at(row.completed_at)
            .response_ref(row.response_ref)
            .build()
            .map_err(|e| builder_error("ledger entry", e))
    }
}

/// Split a session into its header row and message rows.
pub(crate) fn session_to_rows(session: &Session) -> (SessionRow, Vec<SessionMessageRow>) {
    let conversation_id = session.conversation_id().as_str().to_string();
    let header = SessionRow {
        conversation_id: conversation_id.clone(),
        owner_id: session.owner_id().clone(),
        conversation_type: session.conversation_type().to_string(),
        metadata: serde_json::to_value(session.metadata().entries())
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default())),
        created_at: *session.created_at(),
        last_message_at: *session.last_message_at(),
    };
    let messages = session
        .messages()
        .iter()
        .map(|m| SessionMessageRow {
            conversation_id: conversation_id.clone(),
            sequence: to_i32(m.sequence),
            role: m.role.to_string(),
            content: m.content.clone(),
            ledger_entry_id: m.ledger_entry_id.map(|id| id.as_uuid()),
            created_at: m.created_at,
        })
        .collect();
    (header, messages)
}

/// Rebuild a session from its header row and message rows.
pub(crate) fn rows_to_session(
    header: SessionRow,
    messages: Vec<SessionMessageRow>,
) -> Result<Session, DatabaseError> {
    let metadata: BTreeMap<String, serde_json::Value> = serde_json::from_value(header.metadata)?;
    let messages = messages
        .into_iter()
        .map(|row| {
            Ok(SessionMessage {
                sequence: row.sequence.max(0) as u32,
                role: parse("role", &row.role)?,
                content: row.content,
                ledger_entry_id: row.ledger_entry_id.map(LedgerEntryId::from),
                created_at: row.created_at,
            })
        })
        .collect::<Result<Vec<_>, DatabaseError>>()?;

    Ok(Session::restore(
        ConversationId::from(header.conversation_id),
        header.owner_id,
        parse("conversation_type", &header.conversation_type)?,
        messages,
        SessionMetadata::from_entries(metadata),
        header.created_at,
    ))
}
