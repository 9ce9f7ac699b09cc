//! Rust client for the Vizeval evaluation service.
//!
//! Scores a generated response against a domain-specialized evaluator
//! (medical, juridical, ...) and exposes the registry of evaluator
//! identifiers the service accepts.
//!
//! ```no_run
//! use vizeval_client::{EvaluationRequest, Evaluator, VizevalClient};
//!
//! # async fn example() -> Result<(), vizeval_client::VizevalError> {
//! let client = VizevalClient::new("vz-key")?;
//! let request = EvaluationRequest::new(
//!     "You are a doctor",
//!     "What are the flu symptoms?",
//!     "Fever, headache, fatigue",
//!     &Evaluator::Medical,
//! );
//! let evaluation = client.evaluate(request).await?;
//! println!("score: {:?}", evaluation.score);
//! # Ok(())
//! # }
//! ```

/// HTTP client for the evaluation endpoints.
pub mod client;
/// Error types returned by client operations.
pub mod error;
/// Evaluator identifiers and registry.
pub mod evaluators;
/// Request and response bodies.
pub mod types;

pub use client::{validate_base_url, VizevalClient, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
pub use error::VizevalError;
pub use evaluators::{Evaluator, EvaluatorInfo, EvaluatorRegistry};
pub use types::{EvaluationRequest, EvaluationResponse};
