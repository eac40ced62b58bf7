//! Diesel row types.

use crate::schema::{conversation_sessions, ledger_entries, runs, session_messages, step_runs};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

/// Database row for `runs`.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = runs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct RunRow {
    pub id: Uuid,
    pub flow_name: String,
    pub status: String,
    pub execution_mode: String,
    pub inputs: serde_json::Value,
    pub outputs: Option<serde_json::Value>,
    pub current_step: Option<String>,
    pub step_progress: i32,
    pub total_steps: i32,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub cost_estimate: f64,
    pub completion: Option<String>,
    pub failed_items: serde_json::Value,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Database row for `step_runs`.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = step_runs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct StepRunRow {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_name: String,
    pub step_order: i32,
    pub stage_index: i32,
    pub item_index: Option<i32>,
    pub status: String,
    pub inputs: serde_json::Value,
    pub outputs: Option<serde_json::Value>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub cost_estimate: f64,
    pub attempts: i32,
    pub execution_time_ms: i64,
    pub error_message: Option<String>,
    pub failure_kind: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Database row for `ledger_entries`.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable)]
#[diesel(table_name = ledger_entries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LedgerEntryRow {
    pub id: Uuid,
    pub call_id: Uuid,
    pub step_run_id: Option<Uuid>,
    pub conversation_id: Option<String>,
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub cost_estimate: f64,
    pub status: String,
    pub retry_attempt: i32,
    pub cached: bool,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub response_ref: Option<String>,
}

/// Database row for `conversation_sessions`.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable)]
#[diesel(table_name = conversation_sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SessionRow {
    pub conversation_id: String,
    pub owner_id: String,
    pub conversation_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Database row for `session_messages`.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable)]
#[diesel(table_name = session_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SessionMessageRow {
    pub conversation_id: String,
    pub sequence: i32,
    pub role: String,
    pub content: String,
    pub ledger_entry_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
