//! Token Estimation
//!
//! Approximates the token cost of a text blob before it is sent to the
//! completion service.
//!
//! ## Strategy
//! - ~4 characters per token for prose
//! - 1.2x penalty when the text carries JSON structure (`{` or `[`), which
//!   packs less information per character
//!
//! The estimate is monotonic non-decreasing in length for texts of the same
//! composition, which the chunk packer relies on to terminate.

use crate::constants::tokens;

/// Character-based token estimator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenEstimator {
    chars_per_token: usize,
    json_penalty: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(tokens::CHARS_PER_TOKEN, tokens::JSON_PENALTY)
    }
}

impl TokenEstimator {
    pub fn new(chars_per_token: usize, json_penalty: f64) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
            json_penalty: json_penalty.max(1.0),
        }
    }

    /// Estimate token count for a string. Empty text costs 0, anything else at least 1.
    pub fn estimate(&self, text: &str) -> usize {
        self.estimate_counts(text.chars().count(), Self::looks_structured(text))
    }

    /// Estimate from a character count and whether the text carries JSON markers.
    ///
    /// Lets callers that build text incrementally avoid rescanning it.
    pub fn estimate_counts(&self, char_count: usize, structured: bool) -> usize {
        let base = char_count.div_ceil(self.chars_per_token);
        if structured {
            (base as f64 * self.json_penalty).ceil() as usize
        } else {
            base
        }
    }

    /// Check if content fits within token budget
    pub fn fits_budget(&self, text: &str, budget: usize) -> bool {
        self.estimate(text) <= budget
    }

    /// Calculate remaining budget after content
    pub fn remaining_budget(&self, text: &str, budget: usize) -> usize {
        budget.saturating_sub(self.estimate(text))
    }

    pub fn looks_structured(text: &str) -> bool {
        text.contains(['{', '['])
    }
}

/// Estimate tokens with the default estimator
pub fn estimate_tokens(text: &str) -> usize {
    TokenEstimator::default().estimate(text)
}
