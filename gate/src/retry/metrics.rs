//! Metrics tracking and token estimation for gated runs.

use serde::Serialize;
use std::time::Duration;

/// Metrics collected during a gated run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunMetrics {
    /// Total number of attempts made.
    pub total_attempts: usize,
    /// Attempts consumed by a generation or evaluation failure.
    pub failed_attempts: usize,
    /// Wall-clock time elapsed during the run.
    pub wall_time: Duration,
    /// Estimated input tokens sent to the provider across attempts.
    pub estimated_input_tokens: usize,
    /// Estimated output tokens received across attempts.
    pub estimated_output_tokens: usize,
}

/// Estimate token count from a character count, 4 chars per token, rounded up.
#[must_use]
pub const fn estimate_tokens_from_chars(chars: usize) -> usize {
    chars.div_ceil(4)
}

/// Estimate token count from text using the 4-chars-per-token heuristic.
///
/// Counts `chars()`, not bytes, so multi-byte text is not overestimated.
///
/// ```
/// use vizeval_gate::retry::estimate_tokens;
///
/// assert_eq!(estimate_tokens("hello"), 2);
/// assert_eq!(estimate_tokens("hello world"), 3);
/// ```
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    estimate_tokens_from_chars(text.chars().count())
}
