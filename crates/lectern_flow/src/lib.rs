//! Flow orchestration for Lectern.
//!
//! A [`Flow`] is a named list of stages. Each stage is either a single
//! [`Step`] or a [`BatchStage`] of steps run with bounded concurrency.
//! The [`FlowEngine`] executes flows against a [`StepExecutor`], owns the
//! run record lifecycle and hands background runs to the
//! [`BackgroundSupervisor`].
//!
//! # Example
//!
//! ```rust,ignore
//! let flow = Flow::builder("lesson_pack")
//!     .step(StructuredStep::new("extract", "Key points of {{input.text}}")?)
//!     .step(TextStep::new("summarize", "Summarize: {{extract}}")?)
//!     .build()?;
//!
//! let engine = FlowEngine::new(
//!     FlowRegistry::new().with(flow),
//!     Arc::new(StepExecutor::new(client, &config)),
//!     persistence.clone(),
//!     BackgroundSupervisor::new(persistence),
//! );
//! let run = engine.run("lesson_pack", json!({ "text": "..." })).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod definition;
mod engine;
mod executor;
mod extraction;
mod flow;
mod step;
mod supervisor;
mod template;

pub use definition::{
    BatchDefinition, FlowDefinition, FlowHeader, StageDefinition, StepDefinition, StepFormat,
};
pub use engine::{FlowEngine, INPUT_KEY, RunHandle, RunSnapshot};
pub use executor::{StepExecutor, StepOutcome, failure_kind};
pub use extraction::extract_json;
pub use flow::{BatchMembers, BatchStage, Flow, FlowBuilder, FlowRegistry, Stage};
pub use step::{JsonSchema, Step, StructuredStep, TextStep};
pub use supervisor::BackgroundSupervisor;
pub use template::{PromptTemplate, lookup};
