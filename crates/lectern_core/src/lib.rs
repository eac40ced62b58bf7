//! Core data types for the Lectern orchestration engine.
//!
//! This crate provides the records shared by the flow engine, the
//! conversation session manager and the persistence layer:
//!
//! - [`Run`] and [`StepRun`]: one execution of a flow and its steps
//! - [`LedgerEntry`]: one external model call attempt
//! - [`Session`]: persistent multi-turn conversation state
//!
//! Records reference each other only through ids; a run never holds its
//! step runs, it keeps aggregated totals recomputed from them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod ids;
mod learning;
mod ledger;
mod message;
mod role;
mod run;
mod session;
mod step_run;
mod tier;
mod usage;

pub use ids::{CallId, ConversationId, LedgerEntryId, RunId, StepRunId};
pub use learning::{
    AnswerRecord, AssessmentQuestion, LearnerProgress, LessonMaterial, ResourceSummary,
};
pub use ledger::{LedgerAttachment, LedgerEntry, LedgerEntryBuilder, LedgerStatus};
pub use message::{Message, MessageBuilder};
pub use role::Role;
pub use run::{
    Completion, ExecutionMode, FailedItem, FailureKind, Run, RunBuilder, RunStatus,
};
pub use session::{ConversationType, Session, SessionMessage, SessionMetadata};
pub use step_run::{StepRun, StepRunBuilder, StepStatus};
pub use tier::ModelTier;
pub use usage::TokenUsage;
