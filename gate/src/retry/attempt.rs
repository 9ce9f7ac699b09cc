//! Evaluation results and per-attempt records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use vizeval_client::EvaluationResponse;

use super::error::{EvaluationServiceError, GenerationError};
use crate::request::{GenerationParams, GenerationResult};

/// Score and feedback for one generated response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    /// Score in `[0, 1]`. `0.0` for unscored evaluations.
    pub score: f64,
    /// Evaluator feedback, or the failure reason for unscored evaluations.
    pub feedback: String,
    /// Evaluator that produced (or should have produced) the score.
    pub evaluator_id: String,
    /// `false` when the attempt failed or the service returned no score.
    pub scored: bool,
}

impl Evaluation {
    /// A real score. Out-of-range scores are clamped, NaN is treated as unscored.
    pub fn scored(evaluator_id: impl Into<String>, score: f64, feedback: impl Into<String>) -> Self {
        if score.is_nan() {
            return Self::unscored(evaluator_id, "evaluation returned NaN score");
        }
        Self {
            score: score.clamp(0.0, 1.0),
            feedback: feedback.into(),
            evaluator_id: evaluator_id.into(),
            scored: true,
        }
    }

    /// Placeholder for an attempt that could not be scored.
    pub fn unscored(evaluator_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            feedback: reason.into(),
            evaluator_id: evaluator_id.into(),
            scored: false,
        }
    }

    /// Maps a service response; a missing score yields an unscored evaluation.
    #[must_use]
    pub fn from_response(response: EvaluationResponse) -> Self {
        let feedback = response.feedback.unwrap_or_default();
        match response.score {
            Some(score) => Self::scored(response.evaluator, score, feedback),
            None if feedback.is_empty() => {
                Self::unscored(response.evaluator, "evaluation service returned no score")
            }
            None => Self::unscored(response.evaluator, feedback),
        }
    }

    /// Whether this evaluation accepts the response at `threshold`.
    #[must_use]
    pub fn passes(&self, threshold: f64) -> bool {
        self.scored && self.score >= threshold
    }
}

/// Why an attempt produced no usable score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "error", rename_all = "snake_case")]
pub enum AttemptFailure {
    /// The completion call failed.
    Generation(GenerationError),
    /// The evaluation call failed.
    Evaluation(EvaluationServiceError),
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generation(err) => write!(f, "{err}"),
            Self::Evaluation(err) => write!(f, "{err}"),
        }
    }
}

/// Record of a single generate + evaluate cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// The attempt number (1-indexed).
    pub attempt_number: usize,
    /// Generation output; `None` when the completion call failed.
    pub generation: Option<GenerationResult>,
    /// Evaluation of the output; unscored when the attempt failed.
    pub evaluation: Evaluation,
    /// Failure that consumed this attempt, if any.
    pub failure: Option<AttemptFailure>,
    /// Parameter override applied on top of the base parameters.
    pub params_override: GenerationParams,
    /// When the attempt started.
    pub timestamp: DateTime<Utc>,
    /// Elapsed run time when the attempt finished.
    pub elapsed: Duration,
}

impl AttemptRecord {
    /// The attempt's score (`0.0` when unscored).
    #[must_use]
    pub const fn score(&self) -> f64 {
        self.evaluation.score
    }

    /// Whether the attempt failed before being scored.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Generated text, if any.
    #[must_use]
    pub fn response_text(&self) -> Option<&str> {
        self.generation.as_ref().map(|g| g.text.as_str())
    }
}
