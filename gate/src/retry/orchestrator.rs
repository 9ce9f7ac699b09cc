//! The generate, evaluate, decide loop.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{error::Elapsed, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;
use vizeval_client::EvaluatorRegistry;

use super::attempt::{AttemptFailure, AttemptRecord, Evaluation};
use super::config::GateConfig;
use super::envelope::ResultEnvelope;
use super::error::{EvaluationServiceError, GateError, GenerationError};
use super::feedback::feedback_messages;
use super::metrics::{estimate_tokens_from_chars, RunMetrics};
use super::policy::{IdenticalRetry, ParamStrategy, RetryPolicy, Verdict};
use crate::provider::{CompletionProvider, EvaluationInput, EvaluationService};
use crate::request::{CompletionRequest, GenerationParams, GenerationResult};

/// Runs bounded, sequential generate + evaluate attempts until a response
/// reaches the configured threshold or the retry budget is spent.
///
/// Each run allocates its own attempt history, so one orchestrator can
/// serve concurrent runs with different configurations.
pub struct Orchestrator<P, E> {
    provider: P,
    evaluator: E,
    registry: Arc<EvaluatorRegistry>,
    strategy: Arc<dyn ParamStrategy>,
}

impl<P, E> Orchestrator<P, E>
where
    P: CompletionProvider,
    E: EvaluationService,
{
    /// Creates an orchestrator with the built-in evaluators and identical retries.
    pub fn new(provider: P, evaluator: E) -> Self {
        Self {
            provider,
            evaluator,
            registry: Arc::new(EvaluatorRegistry::builtin()),
            strategy: Arc::new(IdenticalRetry),
        }
    }

    /// Validates evaluators against `registry` instead of the built-in one.
    #[must_use]
    pub fn with_registry(mut self, registry: impl Into<Arc<EvaluatorRegistry>>) -> Self {
        self.registry = registry.into();
        self
    }

    /// Chooses the parameter override applied on each retry.
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl ParamStrategy + 'static) -> Self {
        self.strategy = Arc::new(strategy);
        self
    }

    /// Shares an already boxed strategy.
    #[must_use]
    pub fn with_shared_strategy(mut self, strategy: Arc<dyn ParamStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Registry used to validate configurations.
    #[must_use]
    pub fn registry(&self) -> &EvaluatorRegistry {
        &self.registry
    }

    /// Runs the loop without external cancellation.
    ///
    /// # Errors
    ///
    /// See [`Self::run_with_cancel`].
    pub async fn run(
        &self,
        request: &CompletionRequest,
        config: &GateConfig,
    ) -> Result<ResultEnvelope, GateError> {
        self.run_with_cancel(request, config, &CancellationToken::new())
            .await
    }

    /// Runs the loop, abandoning it as soon as `cancel` fires.
    ///
    /// Generation and evaluation failures are recorded on their attempt and
    /// never returned. Without strict mode a missed threshold is reported
    /// through [`ResultEnvelope::passed_threshold`].
    ///
    /// # Errors
    ///
    /// - `GateError::Configuration` if `config` is invalid (no remote call is made)
    /// - `GateError::InvalidRequest` if the request has no user message
    /// - `GateError::Cancelled` if `cancel` fired during the run
    /// - `GateError::ThresholdNotMet` in strict mode when no attempt passed
    pub async fn run_with_cancel(
        &self,
        request: &CompletionRequest,
        config: &GateConfig,
        cancel: &CancellationToken,
    ) -> Result<ResultEnvelope, GateError> {
        config.validate(&self.registry)?;
        if !request.is_evaluable() {
            return Err(GateError::InvalidRequest(
                "request has no user message to evaluate against".to_string(),
            ));
        }

        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "gate_run",
            %run_id,
            evaluator = %config.evaluator,
            model = %request.model,
        );

        self.run_loop(run_id, request, config, cancel)
            .instrument(span)
            .await
    }

    #[allow(clippy::too_many_lines)]
    async fn run_loop(
        &self,
        run_id: Uuid,
        request: &CompletionRequest,
        config: &GateConfig,
        cancel: &CancellationToken,
    ) -> Result<ResultEnvelope, GateError> {
        let policy = RetryPolicy::new(config.threshold, config.max_retries)
            .with_strategy(Arc::clone(&self.strategy));
        let max_attempts = policy.max_attempts();
        let deadline = config.request_timeout;
        let evaluator_id = config.evaluator.id();
        let system_prompt = request.system_prompt().unwrap_or_default();
        let user_prompt = request.user_prompt();

        let start = Instant::now();
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut conversation = request.clone();
        let mut params_override = GenerationParams::new();
        let mut input_chars: usize = 0;
        let mut output_chars: usize = 0;

        tracing::info!(
            event = "gate_run_started",
            threshold = config.threshold,
            max_attempts,
            strict = config.strict,
            "gate_run_started"
        );

        for attempt_number in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(cancelled(attempts));
            }

            let timestamp = Utc::now();
            let params = request.params_with(&params_override);
            input_chars += conversation.prompt_chars();

            let generated =
                match guarded(cancel, deadline, self.provider.generate(&conversation, &params))
                    .await
                {
                    None => return Err(cancelled(attempts)),
                    Some(Err(_)) => Err(GenerationError::Timeout(deadline)),
                    Some(Ok(result)) => result.and_then(non_empty),
                };

            let (generation, evaluation, failure) = match generated {
                Err(err) => {
                    tracing::warn!(
                        event = "attempt_failed",
                        attempt = attempt_number,
                        stage = "generation",
                        error = %err,
                        "attempt_failed"
                    );
                    let evaluation = Evaluation::unscored(evaluator_id, err.to_string());
                    (None, evaluation, Some(AttemptFailure::Generation(err)))
                }
                Ok(generation) => {
                    output_chars += generation.text.chars().count();
                    tracing::debug!(
                        event = "attempt_generated",
                        attempt = attempt_number,
                        response_chars = generation.text.chars().count(),
                        "attempt_generated"
                    );

                    let input = EvaluationInput {
                        system_prompt,
                        user_prompt: &user_prompt,
                        response: &generation.text,
                        evaluator: &config.evaluator,
                        metadata: &config.metadata,
                        async_mode: config.async_mode,
                    };
                    let scored = match guarded(cancel, deadline, self.evaluator.evaluate(input))
                        .await
                    {
                        None => return Err(cancelled(attempts)),
                        Some(Err(_)) => Err(EvaluationServiceError::timeout(deadline)),
                        Some(Ok(result)) => result.and_then(require_score),
                    };

                    match scored {
                        Ok(evaluation) => {
                            tracing::info!(
                                event = "attempt_scored",
                                attempt = attempt_number,
                                score = evaluation.score,
                                "attempt_scored"
                            );
                            (Some(generation), evaluation, None)
                        }
                        Err(err) => {
                            tracing::warn!(
                                event = "attempt_failed",
                                attempt = attempt_number,
                                stage = "evaluation",
                                status = ?err.status,
                                error = %err,
                                "attempt_failed"
                            );
                            let evaluation = Evaluation::unscored(evaluator_id, err.message.clone());
                            (Some(generation), evaluation, Some(AttemptFailure::Evaluation(err)))
                        }
                    }
                }
            };

            attempts.push(AttemptRecord {
                attempt_number,
                generation,
                evaluation,
                failure,
                params_override: std::mem::take(&mut params_override),
                timestamp,
                elapsed: start.elapsed(),
            });

            let decision = policy.decide(&attempts, &request.params);
            match decision.verdict {
                Verdict::Accept => {
                    tracing::info!(event = "threshold_met", attempt = attempt_number, "threshold_met");
                    break;
                }
                Verdict::Exhausted => {
                    tracing::warn!(
                        event = "retries_exhausted",
                        attempts = attempts.len(),
                        "retries_exhausted"
                    );
                    break;
                }
                Verdict::Retry => {
                    params_override = decision.next_params_override.unwrap_or_default();
                    if config.feedback_on_retry {
                        if let Some(last) = attempts.last() {
                            conversation.messages.extend(feedback_messages(
                                last,
                                max_attempts,
                                &config.evaluator,
                            ));
                        }
                    }
                    tracing::info!(
                        event = "retry_scheduled",
                        next_attempt = attempt_number + 1,
                        overridden = params_override.len(),
                        "retry_scheduled"
                    );
                }
            }
        }

        let metrics = RunMetrics {
            total_attempts: attempts.len(),
            failed_attempts: attempts.iter().filter(|a| a.is_failed()).count(),
            wall_time: start.elapsed(),
            estimated_input_tokens: estimate_tokens_from_chars(input_chars),
            estimated_output_tokens: estimate_tokens_from_chars(output_chars),
        };

        let envelope = ResultEnvelope::from_attempts(run_id, attempts, config.threshold, metrics)
            .ok_or_else(|| GateError::InvalidRequest("run produced no attempts".to_string()))?;

        if config.strict && !envelope.passed_threshold {
            return Err(GateError::ThresholdNotMet {
                best_score: envelope.best_score,
                threshold: envelope.threshold,
                attempts: envelope.attempts,
            });
        }

        Ok(envelope)
    }
}

/// Races `fut` against the deadline and the cancellation token.
///
/// `None` means the run was cancelled; cancellation wins over a result that
/// becomes ready at the same time.
async fn guarded<F: Future>(
    cancel: &CancellationToken,
    deadline: Duration,
    fut: F,
) -> Option<Result<F::Output, Elapsed>> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        result = tokio::time::timeout(deadline, fut) => Some(result),
    }
}

fn non_empty(generation: GenerationResult) -> Result<GenerationResult, GenerationError> {
    if generation.text.trim().is_empty() {
        Err(GenerationError::EmptyResponse)
    } else {
        Ok(generation)
    }
}

fn require_score(evaluation: Evaluation) -> Result<Evaluation, EvaluationServiceError> {
    if evaluation.scored {
        Ok(evaluation)
    } else {
        Err(EvaluationServiceError::new(evaluation.feedback))
    }
}

fn cancelled(attempts: Vec<AttemptRecord>) -> GateError {
    tracing::info!(event = "run_cancelled", attempts = attempts.len(), "run_cancelled");
    GateError::Cancelled { attempts }
}
