//! Wire types exchanged with the evaluation service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::evaluators::Evaluator;

/// Body of a `POST /evaluation/` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationRequest {
    /// System prompt used during generation (empty when none was given).
    pub system_prompt: String,
    /// The user prompt that was answered.
    pub user_prompt: String,
    /// The generated text under evaluation.
    pub response: String,
    /// Identifier of the scoring policy.
    pub evaluator: String,
    /// Free-form metadata forwarded to the service.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// API key of the caller. Filled in by the client.
    #[serde(default)]
    pub api_key: String,
    /// Ask the service to score asynchronously.
    #[serde(default)]
    pub async_mode: bool,
}

impl EvaluationRequest {
    /// Builds a request for the given prompts, response and evaluator.
    #[must_use]
    pub fn new(
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        response: impl Into<String>,
        evaluator: &Evaluator,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            response: response.into(),
            evaluator: evaluator.id().to_string(),
            metadata: Map::new(),
            api_key: String::new(),
            async_mode: false,
        }
    }

    /// Attaches metadata to the request.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the async scoring flag.
    #[must_use]
    pub const fn with_async_mode(mut self, async_mode: bool) -> Self {
        self.async_mode = async_mode;
        self
    }
}

/// Body returned by the evaluation service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResponse {
    /// Evaluator that produced the score.
    pub evaluator: String,
    /// Score in `[0, 1]`; absent when the service could not score.
    #[serde(default)]
    pub score: Option<f64>,
    /// Human-readable feedback.
    #[serde(default)]
    pub feedback: Option<String>,
}

impl EvaluationResponse {
    /// Whether the service produced a score.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.score.is_some()
    }

    /// Whether the score is present and reaches `threshold`.
    #[must_use]
    pub fn passed_threshold(&self, threshold: f64) -> bool {
        self.score.is_some_and(|score| score >= threshold)
    }
}
