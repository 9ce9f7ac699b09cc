//! Aggregate result of a gated run.

use serde::Serialize;
use uuid::Uuid;

use super::attempt::{AttemptRecord, Evaluation};
use super::metrics::RunMetrics;
use crate::request::GenerationResult;

/// Picks the best attempt: highest score, then earliest attempt number.
/// Unscored attempts count as 0.0.
///
/// Pure and deterministic: selecting twice over the same slice returns the
/// same record.
#[must_use]
pub fn select_best(attempts: &[AttemptRecord]) -> Option<&AttemptRecord> {
    attempts.iter().fold(None, |best: Option<&AttemptRecord>, candidate| {
        match best {
            Some(current) if !outranks(candidate, current) => Some(current),
            _ => Some(candidate),
        }
    })
}

fn outranks(candidate: &AttemptRecord, current: &AttemptRecord) -> bool {
    candidate.evaluation.score > current.evaluation.score
}

/// Everything a caller needs after a gated run.
#[derive(Debug, Clone, Serialize)]
pub struct ResultEnvelope {
    /// Identifier of the run, also recorded on its tracing span.
    pub run_id: Uuid,
    /// All attempts in chronological order.
    pub attempts: Vec<AttemptRecord>,
    /// Evaluation of the best attempt.
    pub final_evaluation: Evaluation,
    /// Generation of the best attempt; `None` only if no attempt generated text.
    pub final_response: Option<GenerationResult>,
    /// `attempts.len()`.
    pub total_attempts: usize,
    /// Whether the best attempt reached the threshold.
    pub passed_threshold: bool,
    /// `final_evaluation.score`.
    pub best_score: f64,
    /// Threshold the run was gated on.
    pub threshold: f64,
    /// Attempt, timing and token metrics.
    pub metrics: RunMetrics,
}

impl ResultEnvelope {
    /// Builds the envelope from a non-empty attempt list.
    #[must_use]
    pub fn from_attempts(
        run_id: Uuid,
        attempts: Vec<AttemptRecord>,
        threshold: f64,
        metrics: RunMetrics,
    ) -> Option<Self> {
        let best = select_best(&attempts)?;
        let final_evaluation = best.evaluation.clone();
        let final_response = best.generation.clone();

        Some(Self {
            run_id,
            total_attempts: attempts.len(),
            passed_threshold: final_evaluation.passes(threshold),
            best_score: final_evaluation.score,
            final_evaluation,
            final_response,
            attempts,
            threshold,
            metrics,
        })
    }

    /// The attempt the final evaluation came from.
    #[must_use]
    pub fn best_attempt(&self) -> Option<&AttemptRecord> {
        select_best(&self.attempts)
    }

    /// Text of the chosen response.
    #[must_use]
    pub fn final_text(&self) -> Option<&str> {
        self.final_response.as_ref().map(|r| r.text.as_str())
    }

    /// Attempts consumed by a failure.
    pub fn failed_attempts(&self) -> impl Iterator<Item = &AttemptRecord> {
        self.attempts.iter().filter(|a| a.is_failed())
    }
}
