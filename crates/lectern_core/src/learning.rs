//! Learner context assembled for conversation turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lesson content a conversation can draw on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonMaterial {
    /// Lesson id
    pub lesson_id: String,
    /// Lesson title
    pub title: String,
    /// Subject, used when no specific topic can be named
    pub subject: String,
    /// Short description
    pub summary: String,
    /// Key points covered
    #[serde(default)]
    pub key_points: Vec<String>,
}

/// A single exercise answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Exercise id
    pub exercise_id: String,
    /// Topic the exercise assessed
    pub topic: String,
    /// Whether the answer was correct
    pub correct: bool,
    /// When the answer was submitted
    pub answered_at: DateTime<Utc>,
}

/// A learner's progress through a lesson.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerProgress {
    /// Exercises in the lesson
    pub total_exercises: u32,
    /// Answers in submission order
    #[serde(default)]
    pub answers: Vec<AnswerRecord>,
}

impl LearnerProgress {
    /// Number of correct answers.
    pub fn correct_count(&self) -> usize {
        self.answers.iter().filter(|a| a.correct).count()
    }

    /// Number of wrong answers.
    pub fn wrong_count(&self) -> usize {
        self.answers.len() - self.correct_count()
    }

    /// The most recent answer, if any.
    pub fn latest(&self) -> Option<&AnswerRecord> {
        self.answers.iter().max_by_key(|a| a.answered_at)
    }
}

/// Summary of a study resource attached to a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    /// Resource id
    pub resource_id: String,
    /// Title
    pub title: String,
    /// Short summary
    pub summary: String,
}

/// An assessment question the learner is working on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentQuestion {
    /// Question id
    pub question_id: String,
    /// Question text
    pub prompt: String,
    /// Multiple choice options, in display order
    #[serde(default)]
    pub options: Vec<String>,
    /// The correct answer text
    pub correct_answer: String,
}

impl AssessmentQuestion {
    /// Option label ("A", "B", ...) of the correct answer, when it is one of the options.
    pub fn correct_label(&self) -> Option<String> {
        self.options
            .iter()
            .position(|o| o.trim().eq_ignore_ascii_case(self.correct_answer.trim()))
            .and_then(|i| u8::try_from(i).ok())
            .filter(|i| *i < 26)
            .map(|i| char::from(b'A' + i).to_string())
    }
}
