//! Suggested next turns.

use lectern_core::{AssessmentQuestion, ConversationType};
use std::collections::HashSet;

const COACH_FALLBACKS: &[&str] = &[
    "Can you give me a hint?",
    "Explain the key idea again",
    "Show me a similar example",
    "What should I review next?",
];

const ASSISTANT_FALLBACKS: &[&str] = &[
    "Can you explain that differently?",
    "Give me an example",
    "Summarize the lesson so far",
    "What should I study next?",
];

/// Fallback suggestions for a conversation type.
pub fn fallback_replies(conversation_type: ConversationType) -> &'static [&'static str] {
    match conversation_type {
        ConversationType::Coach => COACH_FALLBACKS,
        ConversationType::Assistant => ASSISTANT_FALLBACKS,
    }
}

/// Lowercase, strip punctuation and collapse whitespace.
pub fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Filters, dedupes and tops up suggested replies.
///
/// # Examples
///
/// ```
/// use lectern_conversation::QuickReplyComposer;
/// use lectern_core::{AssessmentQuestion, ConversationType};
///
/// let question = AssessmentQuestion {
///     question_id: "q1".into(),
///     prompt: "Simplify 6:9".into(),
///     options: vec!["3:2".into(), "2:3".into()],
///     correct_answer: "2:3".into(),
/// };
/// let composer = QuickReplyComposer::new(2, 4);
/// let replies = composer.compose(
///     ConversationType::Coach,
///     &["Is it 2:3?".to_string(), "Why divide by 3?".to_string()],
///     Some(&question),
/// );
///
/// assert!(replies.iter().all(|r| !r.contains("2:3")));
/// assert_eq!(replies[0], "Why divide by 3?");
/// assert_eq!(replies.len(), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuickReplyComposer {
    min: usize,
    max: usize,
}

impl QuickReplyComposer {
    /// A composer producing between `min` and `max` replies.
    pub fn new(min: usize, max: usize) -> Self {
        Self {
            min: min.min(max),
            max,
        }
    }

    /// Whether a reply would reveal the active question's answer.
    pub fn leaks_answer(reply: &str, question: &AssessmentQuestion) -> bool {
        let reply = normalize(reply);
        let answer = normalize(&question.correct_answer);
        if !answer.is_empty() && format!(" {} ", reply).contains(&format!(" {} ", answer)) {
            return true;
        }

        let Some(label) = question.correct_label().map(|l| l.to_ascii_lowercase()) else {
            return false;
        };
        if reply == label {
            return true;
        }
        let words: Vec<&str> = reply.split_whitespace().collect();
        let names_label = words.windows(2).any(|pair| {
            matches!(pair[0], "option" | "answer" | "choice" | "letter") && pair[1] == label
        });
        // "a" and "i" are ordinary words; only the explicit forms above count for them.
        names_label || (label != "a" && label != "i" && words.contains(&label.as_str()))
    }

    /// Final suggestions from model-proposed candidates.
    pub fn compose(
        &self,
        conversation_type: ConversationType,
        candidates: &[String],
        question: Option<&AssessmentQuestion>,
    ) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut replies = Vec::new();
        let mut offer = |reply: &str, replies: &mut Vec<String>| {
            let reply = reply.trim();
            let key = normalize(reply);
            if key.is_empty() || question.is_some_and(|q| Self::leaks_answer(reply, q)) {
                return;
            }
            if seen.insert(key) {
                replies.push(reply.to_string());
            }
        };

        for candidate in candidates {
            if replies.len() >= self.max {
                break;
            }
            offer(candidate, &mut replies);
        }
        for fallback in fallback_replies(conversation_type) {
            if replies.len() >= self.min {
                break;
            }
            offer(fallback, &mut replies);
        }
        replies
    }
}
