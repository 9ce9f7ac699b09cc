//! Public error type for the facade.

use thiserror::Error;
use vizeval_client::VizevalError;
use vizeval_gate::{ConfigurationError, EvaluationServiceError, GateError, GenerationError};

/// Any failure surfaced by the facade.
///
/// Wraps the error of each layer unchanged, so callers can match on the
/// underlying type (e.g. the attempt history of [`GateError::ThresholdNotMet`]).
#[derive(Debug, Error)]
pub enum Error {
    /// Evaluation service transport or API error.
    #[error("{0}")]
    Client(#[from] VizevalError),

    /// Invalid gate configuration.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Completion failed outside a gated run.
    #[error("{0}")]
    Generation(#[from] GenerationError),

    /// Evaluation failed outside a gated run.
    #[error("{0}")]
    Evaluation(#[from] EvaluationServiceError),

    /// A gated run ended in error.
    #[error("{0}")]
    Gate(#[from] GateError),
}

impl Error {
    /// Whether the error was raised before any remote call was made.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Gate(GateError::Configuration(_))
        )
    }
}
