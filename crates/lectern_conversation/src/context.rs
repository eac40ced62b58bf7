//! Learner context for conversation turns.

use lectern_core::{
    AssessmentQuestion, ConversationType, LearnerProgress, LessonMaterial, ResourceSummary,
};
use lectern_error::StorageError;
use lectern_interface::{LessonMaterialSource, ProgressSource, ResourceSummarySource};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Everything the model is told about the learner for one turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnContext {
    /// Lesson being studied
    pub lesson: Option<LessonMaterial>,
    /// Learner's answers so far
    pub progress: Option<LearnerProgress>,
    /// Attached study resources
    pub resources: Vec<ResourceSummary>,
    /// Question under discussion
    pub active_question: Option<AssessmentQuestion>,
}

impl TurnContext {
    /// System prompt for a reply.
    pub fn system_prompt(&self, conversation_type: ConversationType) -> String {
        let mut prompt = match conversation_type {
            ConversationType::Coach => String::from(
                "You are a patient lesson coach. Explain mistakes, ask guiding questions \
                 and suggest what to practice next.",
            ),
            ConversationType::Assistant => String::from(
                "You are a helpful course assistant. Answer questions about the course \
                 material clearly and briefly.",
            ),
        };

        if let Some(lesson) = &self.lesson {
            let _ = write!(
                prompt,
                "\n\nLesson: {} ({})\n{}",
                lesson.title, lesson.subject, lesson.summary
            );
            for point in &lesson.key_points {
                let _ = write!(prompt, "\n- {}", point);
            }
        }

        if let Some(progress) = self.progress.as_ref().filter(|p| !p.answers.is_empty()) {
            let _ = write!(
                prompt,
                "\n\nProgress: {} of {} exercises correct.",
                progress.correct_count(),
                progress.total_exercises
            );
            for answer in &progress.answers {
                let _ = write!(
                    prompt,
                    "\n- {}: {}",
                    answer.topic,
                    if answer.correct { "correct" } else { "wrong" }
                );
            }
        }

        if !self.resources.is_empty() {
            prompt.push_str("\n\nAttached resources:");
            for resource in &self.resources {
                let _ = write!(prompt, "\n- {}: {}", resource.title, resource.summary);
            }
        }

        if let Some(question) = &self.active_question {
            let _ = write!(prompt, "\n\nThe learner is working on: {}", question.prompt);
            for (index, option) in question.options.iter().enumerate() {
                let label = u8::try_from(index)
                    .ok()
                    .filter(|i| *i < 26)
                    .map(|i| char::from(b'A' + i))
                    .unwrap_or('?');
                let _ = write!(prompt, "\n{}) {}", label, option);
            }
            prompt.push_str("\nNever state or hint at the correct option directly.");
        }

        prompt.push_str(
            "\n\nRespond with JSON: {\"reply\": \"...\", \"quick_replies\": [\"...\"]} \
             where quick_replies are 2 to 4 short follow-ups the learner might send next.",
        );
        prompt
    }
}

/// Gathers [`TurnContext`] from the read-only sources.
#[derive(Clone)]
pub struct ContextAssembler {
    lessons: Arc<dyn LessonMaterialSource>,
    progress: Arc<dyn ProgressSource>,
    resources: Arc<dyn ResourceSummarySource>,
}

impl std::fmt::Debug for ContextAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextAssembler").finish_non_exhaustive()
    }
}

impl ContextAssembler {
    /// An assembler over the given sources.
    pub fn new(
        lessons: Arc<dyn LessonMaterialSource>,
        progress: Arc<dyn ProgressSource>,
        resources: Arc<dyn ResourceSummarySource>,
    ) -> Self {
        Self {
            lessons,
            progress,
            resources,
        }
    }

    /// Read the context for one turn.
    #[instrument(skip(self, resource_ids, active_question))]
    pub async fn assemble(
        &self,
        owner_id: &str,
        lesson_id: Option<&str>,
        resource_ids: &[String],
        active_question: Option<AssessmentQuestion>,
    ) -> Result<TurnContext, StorageError> {
        let (lesson, progress) = match lesson_id {
            Some(lesson_id) => (
                self.lessons.lesson(lesson_id).await?,
                self.progress.progress(owner_id, lesson_id).await?,
            ),
            None => (None, None),
        };
        let resources = if resource_ids.is_empty() {
            Vec::new()
        } else {
            self.resources.summaries(resource_ids).await?
        };
        debug!(
            has_lesson = lesson.is_some(),
            answers = progress.as_ref().map(|p| p.answers.len()).unwrap_or(0),
            resources = resources.len(),
            "Assembled turn context"
        );

        Ok(TurnContext {
            lesson,
            progress,
            resources,
            active_question,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_options_without_marking_the_answer() {
        let context = TurnContext {
            active_question: Some(AssessmentQuestion {
                question_id: "q1".to_string(),
                prompt: "Which is bigger?".to_string(),
                options: vec!["2/3".to_string(), "3/5".to_string()],
                correct_answer: "2/3".to_string(),
            }),
            ..TurnContext::default()
        };
        let prompt = context.system_prompt(ConversationType::Coach);
        assert!(prompt.contains("A) 2/3"));
        assert!(prompt.contains("B) 3/5"));
        assert!(!prompt.to_lowercase().contains("correct answer"));
        assert!(prompt.starts_with("You are a patient lesson coach"));
    }
}
