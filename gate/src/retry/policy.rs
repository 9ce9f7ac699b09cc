//! Retry decisions and parameter strategies.
//!
//! The policy is pure: the same inputs always produce the same decision,
//! which keeps the orchestration loop deterministic under test.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::attempt::AttemptRecord;
use crate::request::GenerationParams;

/// Terminal or continuing state after an attempt is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Score reached the threshold.
    Accept,
    /// Below threshold with budget left.
    Retry,
    /// Below threshold and `max_retries` additional attempts already spent.
    Exhausted,
}

impl Verdict {
    /// Whether the loop should run another attempt.
    #[must_use]
    pub const fn should_continue(self) -> bool {
        matches!(self, Self::Retry)
    }
}

/// Classifies an attempt.
///
/// `score` is `None` for failed or unscored attempts, which never accept.
/// `max_retries` counts attempts beyond the first, so at most
/// `max_retries + 1` attempts run.
#[must_use]
pub fn classify(attempt_number: usize, score: Option<f64>, threshold: f64, max_retries: u32) -> Verdict {
    if score.is_some_and(|s| s >= threshold) {
        Verdict::Accept
    } else if attempt_number > max_retries as usize {
        Verdict::Exhausted
    } else {
        Verdict::Retry
    }
}

/// Output of [`RetryPolicy::decide`], consumed immediately by the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryDecision {
    /// What to do next.
    pub verdict: Verdict,
    /// Parameters to apply on the next attempt. Only set on `Retry`.
    pub next_params_override: Option<GenerationParams>,
}

/// Chooses the parameter override for the next attempt.
///
/// Implementations must be pure functions of their inputs.
pub trait ParamStrategy: Send + Sync {
    /// Override for attempt `next_attempt` given the history so far.
    fn next_params(
        &self,
        next_attempt: usize,
        history: &[AttemptRecord],
        base: &GenerationParams,
    ) -> Option<GenerationParams>;
}

impl<F> ParamStrategy for F
where
    F: Fn(usize, &[AttemptRecord], &GenerationParams) -> Option<GenerationParams> + Send + Sync,
{
    fn next_params(
        &self,
        next_attempt: usize,
        history: &[AttemptRecord],
        base: &GenerationParams,
    ) -> Option<GenerationParams> {
        self(next_attempt, history, base)
    }
}

/// Retries with the base parameters unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdenticalRetry;

impl ParamStrategy for IdenticalRetry {
    fn next_params(&self, _: usize, _: &[AttemptRecord], _: &GenerationParams) -> Option<GenerationParams> {
        None
    }
}

/// Moves `temperature` (and optionally `top_p`) by a fixed step per retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureRamp {
    /// Change per retry; negative lowers the temperature.
    pub step: f64,
    /// Value the temperature never crosses.
    pub limit: f64,
    /// Temperature assumed when the base parameters do not set one.
    pub default_temperature: f64,
    /// Change of `top_p` per retry, applied only when `top_p` is set.
    pub top_p_step: f64,
    /// Value `top_p` never crosses.
    pub top_p_limit: f64,
}

impl TemperatureRamp {
    /// +0.1 per retry from 0.7 up to 0.9, `top_p` +0.05 up to 0.95.
    #[must_use]
    pub const fn raising() -> Self {
        Self {
            step: 0.1,
            limit: 0.9,
            default_temperature: 0.7,
            top_p_step: 0.05,
            top_p_limit: 0.95,
        }
    }

    /// Lowers the temperature by `step` per retry down to `floor`. `top_p` is left alone.
    #[must_use]
    pub fn lowering(step: f64, floor: f64) -> Self {
        Self {
            step: -step.abs(),
            limit: floor,
            default_temperature: 0.7,
            top_p_step: 0.0,
            top_p_limit: 1.0,
        }
    }
}

impl Default for TemperatureRamp {
    fn default() -> Self {
        Self::raising()
    }
}

fn ramp(start: f64, step: f64, retries: f64, limit: f64) -> f64 {
    if step >= 0.0 {
        if start < limit {
            step.mul_add(retries, start).min(limit)
        } else {
            start
        }
    } else if start > limit {
        step.mul_add(retries, start).max(limit)
    } else {
        start
    }
}

impl ParamStrategy for TemperatureRamp {
    #[allow(clippy::cast_precision_loss)]
    fn next_params(
        &self,
        next_attempt: usize,
        _history: &[AttemptRecord],
        base: &GenerationParams,
    ) -> Option<GenerationParams> {
        let retries = next_attempt.saturating_sub(1) as f64;
        let mut overrides = GenerationParams::new();

        let temperature = base
            .get("temperature")
            .and_then(Value::as_f64)
            .unwrap_or(self.default_temperature);
        overrides.insert(
            "temperature".to_string(),
            Value::from(ramp(temperature, self.step, retries, self.limit)),
        );

        if self.top_p_step != 0.0 {
            if let Some(top_p) = base.get("top_p").and_then(Value::as_f64) {
                overrides.insert(
                    "top_p".to_string(),
                    Value::from(ramp(top_p, self.top_p_step, retries, self.top_p_limit)),
                );
            }
        }

        Some(overrides)
    }
}

/// Threshold, retry budget and parameter strategy of one run.
#[derive(Clone)]
pub struct RetryPolicy {
    threshold: f64,
    max_retries: u32,
    strategy: Arc<dyn ParamStrategy>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("threshold", &self.threshold)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Policy retrying with identical parameters.
    #[must_use]
    pub fn new(threshold: f64, max_retries: u32) -> Self {
        Self {
            threshold,
            max_retries,
            strategy: Arc::new(IdenticalRetry),
        }
    }

    /// Replaces the parameter strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn ParamStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Acceptance threshold.
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Upper bound on attempts (`max_retries + 1`).
    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        (self.max_retries as usize).saturating_add(1)
    }

    /// Decides what follows the last attempt in `history`.
    #[must_use]
    pub fn decide(&self, history: &[AttemptRecord], base: &GenerationParams) -> RetryDecision {
        let Some(last) = history.last() else {
            return RetryDecision {
                verdict: Verdict::Retry,
                next_params_override: None,
            };
        };

        let score = last.evaluation.scored.then_some(last.evaluation.score);
        let verdict = classify(last.attempt_number, score, self.threshold, self.max_retries);

        let next_params_override = match verdict {
            Verdict::Retry => self
                .strategy
                .next_params(last.attempt_number + 1, history, base),
            Verdict::Accept | Verdict::Exhausted => None,
        };

        RetryDecision {
            verdict,
            next_params_override,
        }
    }
}
