//! Read-only learner context providers.

use async_trait::async_trait;
use lectern_core::{LearnerProgress, LessonMaterial, ResourceSummary};
use lectern_error::StorageError;

/// Looks up lesson material.
#[async_trait]
pub trait LessonMaterialSource: Send + Sync {
    /// Lesson material by lesson id.
    async fn lesson(&self, lesson_id: &str) -> Result<Option<LessonMaterial>, StorageError>;
}

/// Looks up learner progress.
#[async_trait]
pub trait ProgressSource: Send + Sync {
    /// Progress of a learner through a lesson.
    async fn progress(
        &self,
        owner_id: &str,
        lesson_id: &str,
    ) -> Result<Option<LearnerProgress>, StorageError>;
}

/// Looks up attached resource summaries.
#[async_trait]
pub trait ResourceSummarySource: Send + Sync {
    /// Summaries for the given resource ids; unknown ids are skipped.
    async fn summaries(&self, resource_ids: &[String])
    -> Result<Vec<ResourceSummary>, StorageError>;
}

/// Sources that know nothing.
///
/// Used when the host provides no learner context.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySources;

#[async_trait]
impl LessonMaterialSource for EmptySources {
    async fn lesson(&self, _lesson_id: &str) -> Result<Option<LessonMaterial>, StorageError> {
        Ok(None)
    }
}

#[async_trait]
impl ProgressSource for EmptySources {
    async fn progress(
        &self,
        _owner_id: &str,
        _lesson_id: &str,
    ) -> Result<Option<LearnerProgress>, StorageError> {
        Ok(None)
    }
}

#[async_trait]
impl ResourceSummarySource for EmptySources {
    async fn summaries(
        &self,
        _resource_ids: &[String],
    ) -> Result<Vec<ResourceSummary>, StorageError> {
        Ok(Vec::new())
    }
}
