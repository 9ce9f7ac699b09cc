//! Evaluation-gated retry loop.
//!
//! - [`Orchestrator`] - Sequential generate, evaluate, decide loop
//! - [`RetryPolicy`] - Accept / retry / exhausted decisions and parameter strategies
//! - [`ResultEnvelope`] - Attempt history, best response and run metrics
//! - [`GateConfig`] - Validated run configuration
//! - [`GateError`] - Run-level errors carrying the attempt history

pub mod attempt;
pub mod config;
pub mod envelope;
pub mod error;
pub mod feedback;
pub mod metrics;
pub mod orchestrator;
pub mod policy;

pub use attempt::{AttemptFailure, AttemptRecord, Evaluation};
pub use config::{GateConfig, DEFAULT_MAX_RETRIES, DEFAULT_THRESHOLD};
pub use envelope::{select_best, ResultEnvelope};
pub use error::{ConfigurationError, EvaluationServiceError, GateError, GenerationError};
pub use feedback::{build_retry_feedback, feedback_messages};
pub use metrics::{estimate_tokens, RunMetrics};
pub use orchestrator::Orchestrator;
pub use policy::{
    classify, IdenticalRetry, ParamStrategy, RetryDecision, RetryPolicy, TemperatureRamp,
    Verdict,
};
