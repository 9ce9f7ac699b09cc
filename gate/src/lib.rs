//! Evaluation-gated retries for LLM completions.
//!
//! Every completion is scored by an external evaluation service; responses
//! below the configured threshold are regenerated, up to a bounded number of
//! retries, and the best attempt is returned with its full history.
//!
//! # Components
//!
//! - [`Orchestrator`] runs one gated request against a [`CompletionProvider`]
//!   and an [`EvaluationService`]
//! - [`GatedProvider`] wraps a provider so that it gates transparently and can
//!   be reconfigured or disabled at runtime
//! - [`GateConfig`] is the validated run configuration
//! - [`ResultEnvelope`] carries every [`AttemptRecord`], the best response and
//!   [`RunMetrics`]
//!
//! ```no_run
//! use vizeval_gate::prelude::*;
//!
//! # async fn example(provider: impl CompletionProvider) -> Result<(), GateError> {
//! let config = GateConfig::new("vz-key").with_threshold(0.8).with_max_retries(2);
//! let evaluator = config.client()?;
//! let request = CompletionRequest::new(
//!     "gpt-4",
//!     vec![
//!         ChatMessage::system("You are a medical assistant."),
//!         ChatMessage::user("What are the symptoms of flu?"),
//!     ],
//! );
//!
//! let envelope = Orchestrator::new(provider, evaluator).run(&request, &config).await?;
//! if envelope.passed_threshold {
//!     println!("{}", envelope.final_text().unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

/// Provider decorator with a reconfigurable gate.
pub mod gated;
/// Capability traits for generation and evaluation.
pub mod provider;
/// Request and generation result model.
pub mod request;
pub mod retry;

pub use gated::{EvaluationFactory, GatedProvider, GatedResponse};
pub use provider::{CompletionProvider, EvaluationInput, EvaluationService};
pub use request::{merge_params, ChatMessage, CompletionRequest, GenerationParams, GenerationResult, Role};
pub use retry::{
    AttemptFailure, AttemptRecord, ConfigurationError, Evaluation, EvaluationServiceError,
    GateConfig, GateError, GenerationError, IdenticalRetry, Orchestrator, ParamStrategy,
    ResultEnvelope, RetryPolicy, RunMetrics, TemperatureRamp, Verdict,
};

/// Re-exports for typical use.
pub mod prelude {
    pub use crate::gated::{GatedProvider, GatedResponse};
    pub use crate::provider::{CompletionProvider, EvaluationInput, EvaluationService};
    pub use crate::request::{ChatMessage, CompletionRequest, GenerationParams, GenerationResult, Role};
    pub use crate::retry::{
        ConfigurationError, Evaluation, EvaluationServiceError, GateConfig, GateError,
        GenerationError, Orchestrator, ResultEnvelope, TemperatureRamp,
    };
    pub use vizeval_client::{Evaluator, EvaluatorRegistry};
}
