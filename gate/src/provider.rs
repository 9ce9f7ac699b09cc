//! Trait seams for the two remote capabilities a gated run depends on.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use vizeval_client::{EvaluationRequest, Evaluator, VizevalClient};

use crate::request::{CompletionRequest, GenerationParams, GenerationResult};
use crate::retry::{Evaluation, EvaluationServiceError, GenerationError};

/// Anything that can turn a request into generated text.
///
/// Implemented by raw provider adapters and by [`crate::GatedProvider`],
/// which wraps another provider.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generates one response using `params` in place of `request.params`.
    async fn generate(
        &self,
        request: &CompletionRequest,
        params: &GenerationParams,
    ) -> Result<GenerationResult, GenerationError>;
}

#[async_trait]
impl<T: CompletionProvider + ?Sized> CompletionProvider for Arc<T> {
    async fn generate(
        &self,
        request: &CompletionRequest,
        params: &GenerationParams,
    ) -> Result<GenerationResult, GenerationError> {
        (**self).generate(request, params).await
    }
}

/// What the evaluation service needs to score one response.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    /// System prompt of the request, empty when none.
    pub system_prompt: &'a str,
    /// Joined user prompt.
    pub user_prompt: &'a str,
    /// Text under evaluation.
    pub response: &'a str,
    /// Scoring policy.
    pub evaluator: &'a Evaluator,
    /// Forwarded metadata.
    pub metadata: &'a Map<String, Value>,
    /// Async scoring flag.
    pub async_mode: bool,
}

/// Scores generated responses.
#[async_trait]
pub trait EvaluationService: Send + Sync {
    /// Scores one response. A missing score is an unscored [`Evaluation`], not an error.
    async fn evaluate(
        &self,
        input: EvaluationInput<'_>,
    ) -> Result<Evaluation, EvaluationServiceError>;
}

#[async_trait]
impl<T: EvaluationService + ?Sized> EvaluationService for Arc<T> {
    async fn evaluate(
        &self,
        input: EvaluationInput<'_>,
    ) -> Result<Evaluation, EvaluationServiceError> {
        (**self).evaluate(input).await
    }
}

#[async_trait]
impl EvaluationService for VizevalClient {
    async fn evaluate(
        &self,
        input: EvaluationInput<'_>,
    ) -> Result<Evaluation, EvaluationServiceError> {
        let request = EvaluationRequest::new(
            input.system_prompt,
            input.user_prompt,
            input.response,
            input.evaluator,
        )
        .with_metadata(input.metadata.clone())
        .with_async_mode(input.async_mode);

        let response = Self::evaluate(self, request).await?;
        Ok(Evaluation::from_response(response))
    }
}
