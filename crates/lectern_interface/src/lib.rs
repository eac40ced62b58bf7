//! Collaborator contracts for the Lectern orchestration engine.
//!
//! The engine consumes three kinds of collaborators, each behind a trait:
//!
//! - [`ModelClient`]: the external model call
//! - [`RunStore`], [`LedgerStore`], [`SessionStore`]: persistence, grouped
//!   into a [`PersistenceContext`] opened from a [`PersistenceProvider`]
//! - [`LessonMaterialSource`], [`ProgressSource`], [`ResourceSummarySource`]:
//!   read-only learner context providers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod sources;
mod store;

pub use client::{ModelClient, ModelContent, ModelRequest, ModelRequestBuilder, ModelResponse};
pub use sources::{
    EmptySources, LessonMaterialSource, ProgressSource, ResourceSummarySource,
};
pub use store::{
    LedgerStore, PersistenceContext, PersistenceProvider, RunFilter, RunFilterBuilder, RunStore,
    SessionStore,
};
