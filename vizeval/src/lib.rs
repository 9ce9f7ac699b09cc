//! # vizeval
//!
//! Evaluation-gated LLM completions.
//!
//! Wraps any completion provider so that every response is scored by a
//! Vizeval evaluator (medical, juridical, ...) and regenerated until it
//! reaches the configured threshold or the retry budget runs out.
//!
//! ## Example
//!
//! ```no_run
//! # use vizeval::prelude::*;
//! # async fn example<M: rig::completion::CompletionModel>(model: M) -> Result<(), vizeval::Error> {
//! let config = GateConfig::new("vz-key")
//!     .with_evaluator(Evaluator::Medical)
//!     .with_threshold(0.8)
//!     .with_max_retries(2);
//!
//! let request = CompletionRequest::new(
//!     "gpt-4o",
//!     vec![
//!         ChatMessage::system("You are a careful medical assistant."),
//!         ChatMessage::user("How should a mild fever be treated?"),
//!     ],
//! );
//!
//! let evaluator = config.client()?;
//! let envelope = Orchestrator::new(RigProvider::new(model), evaluator)
//!     .run(&request, &config)
//!     .await?;
//!
//! for attempt in &envelope.attempts {
//!     println!("attempt {}: {:.3}", attempt.attempt_number, attempt.score());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! - [`vizeval_client`]: HTTP client and evaluator registry
//! - [`vizeval_gate`]: retry orchestration and the gated provider

/// Rig completion model adapter.
pub mod adapter;

/// Public error types.
pub mod errors;

/// Commonly used types and traits.
pub mod prelude;

pub use adapter::{RigProvider, RigTurns};
pub use errors::Error;
pub use vizeval_client as client;
pub use vizeval_gate as gate;
