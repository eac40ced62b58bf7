//! Introductory turns for new sessions.

use lectern_core::{LearnerProgress, LessonMaterial};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Confidence added when the learner's latest answer was wrong on the topic.
const LATEST_MISS_BOOST: f64 = 0.25;

/// A best-effort guess at what brought the learner here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicGuess {
    /// Topic the learner most likely wants help with
    pub topic: String,
    /// Score in `[0, 1]`
    pub confidence: f64,
}

/// The greeting that opens a new session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Introduction {
    /// Greeting text, stored as the first assistant message
    pub text: String,
    /// Best topic guess, whether or not the greeting used it
    pub guess: Option<TopicGuess>,
    /// Whether the greeting names the guessed topic
    pub names_topic: bool,
}

/// Guess the topic a learner is struggling with.
///
/// Each topic with wrong answers scores its share of all wrong answers,
/// plus a boost when the most recent answer was a miss on that topic.
/// Ties go to the alphabetically first topic.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use lectern_conversation::guess_topic;
/// use lectern_core::{AnswerRecord, LearnerProgress};
///
/// let answer = |topic: &str, correct: bool, minute: u32| AnswerRecord {
///     exercise_id: format!("ex-{minute}"),
///     topic: topic.to_string(),
///     correct,
///     answered_at: Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, 0).unwrap(),
/// };
/// let progress = LearnerProgress {
///     total_exercises: 5,
///     answers: vec![answer("ratios", false, 1), answer("rates", false, 2)],
/// };
///
/// let guess = guess_topic(&progress).unwrap();
/// assert_eq!(guess.topic, "rates");
/// assert!((guess.confidence - 0.75).abs() < 1e-9);
/// ```
pub fn guess_topic(progress: &LearnerProgress) -> Option<TopicGuess> {
    let wrong = progress.wrong_count();
    if wrong == 0 {
        return None;
    }

    let mut misses: BTreeMap<&str, usize> = BTreeMap::new();
    for answer in progress.answers.iter().filter(|a| !a.correct) {
        *misses.entry(answer.topic.as_str()).or_default() += 1;
    }
    let latest_miss = progress
        .latest()
        .filter(|a| !a.correct)
        .map(|a| a.topic.as_str());

    misses
        .into_iter()
        .map(|(topic, count)| {
            let mut confidence = count as f64 / wrong as f64;
            if latest_miss == Some(topic) {
                confidence += LATEST_MISS_BOOST;
            }
            TopicGuess {
                topic: topic.to_string(),
                confidence: confidence.min(1.0),
            }
        })
        .fold(None, |best: Option<TopicGuess>, guess| match best {
            Some(best) if best.confidence >= guess.confidence => Some(best),
            _ => Some(guess),
        })
}

/// Build the greeting for a new session.
///
/// The greeting names the guessed topic only when its confidence reaches
/// `threshold`; otherwise it mentions the lesson subject, or nothing
/// specific when no lesson is known.
pub fn synthesize_introduction(
    lesson: Option<&LessonMaterial>,
    progress: Option<&LearnerProgress>,
    threshold: f64,
) -> Introduction {
    let guess = progress.and_then(guess_topic);
    let confident = guess.as_ref().filter(|g| g.confidence >= threshold);

    let text = match (confident, lesson) {
        (Some(guess), Some(lesson)) => format!(
            "Hi! It looks like {} in \"{}\" has been tricky. Want to work through it together?",
            guess.topic, lesson.title
        ),
        (Some(guess), None) => format!(
            "Hi! It looks like {} has been tricky. Want to work through it together?",
            guess.topic
        ),
        (None, Some(lesson)) => {
            let mut text = format!(
                "Hi! I'm here to help with {}. What would you like to go over?",
                lesson.subject
            );
            if let Some(progress) = progress.filter(|p| !p.answers.is_empty()) {
                text.push_str(&format!(
                    " You've answered {} of {} exercises correctly so far.",
                    progress.correct_count(),
                    progress.total_exercises
                ));
            }
            text
        }
        (None, None) => "Hi! What would you like to work on today?".to_string(),
    };

    Introduction {
        text,
        names_topic: confident.is_some(),
        guess,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lectern_core::AnswerRecord;

    fn answer(topic: &str, correct: bool, minute: u32) -> AnswerRecord {
        AnswerRecord {
            exercise_id: format!("ex-{}", minute),
            topic: topic.to_string(),
            correct,
            answered_at: Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, 0).unwrap(),
        }
    }

    fn lesson() -> LessonMaterial {
        LessonMaterial {
            lesson_id: "l1".to_string(),
            title: "Proportional Reasoning".to_string(),
            subject: "ratios and rates".to_string(),
            summary: "Comparing quantities".to_string(),
            key_points: vec![],
        }
    }

    #[test]
    fn test_no_misses_means_no_guess() {
        let progress = LearnerProgress {
            total_exercises: 3,
            answers: vec![answer("ratios", true, 1)],
        };
        assert!(guess_topic(&progress).is_none());
    }

    #[test]
    fn test_spread_misses_fall_back_to_subject() {
        // Four topics missed once each, latest answer correct: 0.25 apiece.
        let progress = LearnerProgress {
            total_exercises: 5,
            answers: vec![
                answer("a", false, 1),
                answer("b", false, 2),
                answer("c", false, 3),
                answer("d", false, 4),
                answer("e", true, 5),
            ],
        };
        let intro = synthesize_introduction(Some(&lesson()), Some(&progress), 0.6);
        assert!(!intro.names_topic);
        assert!((intro.guess.unwrap().confidence - 0.25).abs() < 1e-9);
        assert!(intro.text.contains("ratios and rates"));
        assert!(intro.text.contains("1 of 5"));
    }

    #[test]
    fn test_unknown_lesson_gets_generic_greeting() {
        let intro = synthesize_introduction(None, None, 0.6);
        assert_eq!(intro.text, "Hi! What would you like to work on today?");
        assert!(intro.guess.is_none());
    }
}
