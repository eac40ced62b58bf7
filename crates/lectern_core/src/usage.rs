//! Token accounting.

use serde::{Deserialize, Serialize};

/// Token counts reported for one or more model calls.
///
/// # Examples
///
/// ```
/// use lectern_core::TokenUsage;
///
/// let mut total = TokenUsage::new(120, 30);
/// total.add(&TokenUsage::new(10, 5));
/// assert_eq!(total.total_tokens, 165);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub input_tokens: u64,
    /// Completion tokens
    pub output_tokens: u64,
    /// Sum of input and output tokens
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Usage from input and output counts.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Accumulate another usage record into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }

    /// True when no tokens were recorded.
    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0
    }
}

impl std::iter::Sum for TokenUsage {
    fn sum<I: Iterator<Item = TokenUsage>>(iter: I) -> Self {
        iter.fold(TokenUsage::default(), |mut acc, usage| {
            acc.add(&usage);
            acc
        })
    }
}
