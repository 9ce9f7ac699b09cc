//! Error types for gated runs with attempt history tracking.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use vizeval_client::VizevalError;

use super::attempt::AttemptRecord;

/// Invalid configuration, detected before any remote call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// `api_key` is empty.
    #[error("api_key is required")]
    MissingApiKey,

    /// `threshold` is outside `[0, 1]` or not a number.
    #[error("threshold must be between 0 and 1, got {0}")]
    ThresholdOutOfRange(f64),

    /// `max_retries` is negative.
    #[error("max_retries must be greater than or equal to 0, got {0}")]
    NegativeMaxRetries(i64),

    /// Evaluator is not registered.
    #[error("{0}")]
    UnknownEvaluator(String),

    /// Base url does not parse.
    #[error("{0}")]
    InvalidBaseUrl(String),

    /// Per-call timeout is zero.
    #[error("request_timeout must be greater than zero")]
    InvalidTimeout,

    /// A configuration value could not be parsed.
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Raw value.
        value: String,
        /// Parse failure.
        reason: String,
    },
}

impl From<VizevalError> for ConfigurationError {
    fn from(err: VizevalError) -> Self {
        match err {
            VizevalError::MissingApiKey => Self::MissingApiKey,
            VizevalError::UnknownEvaluator { .. } => Self::UnknownEvaluator(err.to_string()),
            VizevalError::InvalidBaseUrl { .. } => Self::InvalidBaseUrl(err.to_string()),
            other => Self::InvalidValue {
                key: "client".to_string(),
                value: String::new(),
                reason: other.to_string(),
            },
        }
    }
}

/// Failure of the completion call for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum GenerationError {
    /// Transport failure reaching the provider.
    #[error("Completion request failed: {0}")]
    Request(String),

    /// Provider answered with an error (auth, rate limit, validation).
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider answered but the payload could not be read.
    #[error("Malformed completion response: {0}")]
    MalformedResponse(String),

    /// No text could be extracted from the response.
    #[error("Completion response contained no text")]
    EmptyResponse,

    /// The call exceeded its deadline.
    #[error("Completion timed out after {0:?}")]
    Timeout(Duration),

    /// A gated run wrapped by a provider did not produce a usable response.
    #[error("Gated completion failed: {0}")]
    Gate(String),
}

/// Failure of the evaluation call for one attempt.
///
/// Keeps the raw status and body for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("Evaluation service error: {message}")]
pub struct EvaluationServiceError {
    /// What went wrong.
    pub message: String,
    /// HTTP status, when the service answered.
    pub status: Option<u16>,
    /// Raw response body, when the service answered.
    pub body: Option<String>,
}

impl EvaluationServiceError {
    /// Error without transport details.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            body: None,
        }
    }

    /// The call exceeded its deadline.
    #[must_use]
    pub fn timeout(deadline: Duration) -> Self {
        Self::new(format!("evaluation timed out after {deadline:?}"))
    }
}

impl From<VizevalError> for EvaluationServiceError {
    fn from(err: VizevalError) -> Self {
        Self {
            message: err.to_string(),
            status: err.status(),
            body: err.body().map(str::to_string),
        }
    }
}

/// Errors that end a gated run.
///
/// Generation and evaluation failures inside the loop are recorded on the
/// attempt and never surface here, except on the pass-through path of a
/// disabled gate.
#[derive(Debug, Error)]
pub enum GateError {
    /// Configuration was rejected before any remote call.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The request cannot be scored (no user message).
    #[error("Request cannot be evaluated: {0}")]
    InvalidRequest(String),

    /// Strict mode only: no attempt reached the threshold.
    #[error(
        "Threshold {threshold} not met after {} attempts (best score {best_score:.3})",
        .attempts.len()
    )]
    ThresholdNotMet {
        /// Every attempt, in order.
        attempts: Vec<AttemptRecord>,
        /// Highest score reached.
        best_score: f64,
        /// Threshold that was missed.
        threshold: f64,
    },

    /// The caller cancelled the run while a remote call was in flight.
    #[error("Run cancelled after {} completed attempts", .attempts.len())]
    Cancelled {
        /// Attempts completed before cancellation.
        attempts: Vec<AttemptRecord>,
    },

    /// Completion failed on the pass-through path.
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl GateError {
    /// Attempt history carried by the error, empty for errors raised before the loop.
    #[must_use]
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::ThresholdNotMet { attempts, .. } | Self::Cancelled { attempts } => attempts,
            _ => &[],
        }
    }
}
