//! Provider decorator that gates every completion behind evaluation.

use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use vizeval_client::EvaluatorRegistry;

use crate::provider::{CompletionProvider, EvaluationService};
use crate::request::{CompletionRequest, GenerationParams, GenerationResult};
use crate::retry::{
    ConfigurationError, GateConfig, GateError, GenerationError, IdenticalRetry, Orchestrator,
    ParamStrategy, ResultEnvelope,
};

/// Builds the evaluation service for a bound configuration.
pub type EvaluationFactory = Arc<
    dyn Fn(&GateConfig) -> Result<Arc<dyn EvaluationService>, ConfigurationError> + Send + Sync,
>;

fn http_evaluation(config: &GateConfig) -> Result<Arc<dyn EvaluationService>, ConfigurationError> {
    let client: Arc<dyn EvaluationService> = Arc::new(config.client()?);
    Ok(client)
}

/// Outcome of [`GatedProvider::generate_gated`].
#[derive(Debug, Clone)]
pub enum GatedResponse {
    /// The completion went through the evaluation loop.
    Gated(Box<ResultEnvelope>),
    /// The gate was disabled or the request could not be evaluated.
    Passthrough(GenerationResult),
}

impl GatedResponse {
    /// The response a caller should use: the best attempt, or the pass-through result.
    #[must_use]
    pub fn response(&self) -> Option<&GenerationResult> {
        match self {
            Self::Gated(envelope) => envelope.final_response.as_ref(),
            Self::Passthrough(result) => Some(result),
        }
    }

    /// The envelope, when the request was gated.
    #[must_use]
    pub fn envelope(&self) -> Option<&ResultEnvelope> {
        match self {
            Self::Gated(envelope) => Some(envelope),
            Self::Passthrough(_) => None,
        }
    }

    /// Whether the request went through the evaluation loop.
    #[must_use]
    pub const fn is_gated(&self) -> bool {
        matches!(self, Self::Gated(_))
    }
}

/// Configuration bound to a [`GatedProvider`], with the evaluation service
/// built for it. Runs snapshot both together.
#[derive(Clone)]
struct Binding {
    config: Arc<GateConfig>,
    evaluation: Arc<dyn EvaluationService>,
}

/// Wraps a [`CompletionProvider`] so that each completion is generated,
/// evaluated and retried according to the bound [`GateConfig`].
///
/// The configuration can be swapped or cleared at any time; runs already in
/// flight keep the snapshot they started with. The evaluation service is
/// built once per bound configuration and shared by every run under it.
///
/// [`Self::with_registry`] and [`Self::with_evaluation_factory`] apply to
/// configurations bound after them: call them before [`Self::set_config`],
/// or use [`Self::with_config_in`].
pub struct GatedProvider<P> {
    inner: Arc<P>,
    binding: RwLock<Option<Binding>>,
    registry: Arc<EvaluatorRegistry>,
    strategy: Arc<dyn ParamStrategy>,
    evaluation: EvaluationFactory,
}

impl<P: CompletionProvider> GatedProvider<P> {
    /// Wraps `inner` with the gate disabled.
    pub fn new(inner: P) -> Self {
        Self {
            inner: Arc::new(inner),
            binding: RwLock::new(None),
            registry: Arc::new(EvaluatorRegistry::builtin()),
            strategy: Arc::new(IdenticalRetry),
            evaluation: Arc::new(http_evaluation),
        }
    }

    /// Wraps `inner` with the gate enabled, validating against the built-in evaluators.
    ///
    /// # Errors
    ///
    /// Returns the validation error of `config`.
    pub fn with_config(inner: P, config: GateConfig) -> Result<Self, ConfigurationError> {
        let gated = Self::new(inner);
        gated.set_config(config)?;
        Ok(gated)
    }

    /// Wraps `inner` with the gate enabled, validating against `registry`.
    ///
    /// # Errors
    ///
    /// Returns the validation error of `config`.
    pub fn with_config_in(
        inner: P,
        config: GateConfig,
        registry: EvaluatorRegistry,
    ) -> Result<Self, ConfigurationError> {
        let gated = Self::new(inner).with_registry(registry);
        gated.set_config(config)?;
        Ok(gated)
    }

    /// Validates evaluators against `registry`.
    #[must_use]
    pub fn with_registry(mut self, registry: EvaluatorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Parameter strategy for retries.
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl ParamStrategy + 'static) -> Self {
        self.strategy = Arc::new(strategy);
        self
    }

    /// Replaces the HTTP evaluation client, e.g. with an in-process scorer.
    ///
    /// The factory runs once per [`Self::set_config`].
    #[must_use]
    pub fn with_evaluation_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&GateConfig) -> Result<Arc<dyn EvaluationService>, ConfigurationError>
            + Send
            + Sync
            + 'static,
    {
        self.evaluation = Arc::new(factory);
        self
    }

    /// Validates and binds a new configuration, enabling the gate.
    ///
    /// The evaluation service for `config` is built here, not per run.
    ///
    /// # Errors
    ///
    /// Returns the validation error, or the error of building the evaluation
    /// service; the previous configuration stays bound.
    pub fn set_config(&self, config: GateConfig) -> Result<(), ConfigurationError> {
        config.validate(&self.registry)?;
        let evaluation = (self.evaluation)(&config)?;
        tracing::info!(
            event = "gate_configured",
            evaluator = %config.evaluator,
            threshold = config.threshold,
            max_retries = config.max_retries,
            "gate_configured"
        );
        *self.binding.write().unwrap_or_else(PoisonError::into_inner) = Some(Binding {
            config: Arc::new(config),
            evaluation,
        });
        Ok(())
    }

    /// Clears the configuration; completions pass straight through.
    pub fn disable(&self) {
        tracing::info!(event = "gate_disabled", "gate_disabled");
        *self.binding.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn binding(&self) -> Option<Binding> {
        self.binding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the bound configuration.
    #[must_use]
    pub fn config(&self) -> Option<Arc<GateConfig>> {
        self.binding().map(|binding| binding.config)
    }

    /// Whether a configuration is bound.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config().is_some()
    }

    /// The wrapped provider.
    #[must_use]
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Runs the completion through the gate and returns the full outcome.
    ///
    /// # Errors
    ///
    /// Run-level [`GateError`]s; pass-through failures surface as `GateError::Generation`.
    pub async fn generate_gated(
        &self,
        request: &CompletionRequest,
        params: &GenerationParams,
    ) -> Result<GatedResponse, GateError> {
        self.generate_gated_with_cancel(request, params, &CancellationToken::new())
            .await
    }

    /// Like [`Self::generate_gated`], abandoning the run when `cancel` fires.
    ///
    /// # Errors
    ///
    /// See [`Self::generate_gated`].
    pub async fn generate_gated_with_cancel(
        &self,
        request: &CompletionRequest,
        params: &GenerationParams,
        cancel: &CancellationToken,
    ) -> Result<GatedResponse, GateError> {
        let Some(Binding { config, evaluation }) = self.binding() else {
            let result = self.inner.generate(request, params).await?;
            return Ok(GatedResponse::Passthrough(result));
        };

        if !request.is_evaluable() {
            tracing::warn!(
                event = "gate_bypassed",
                reason = "no user message",
                "gate_bypassed"
            );
            let result = self.inner.generate(request, params).await?;
            return Ok(GatedResponse::Passthrough(result));
        }

        let orchestrator = Orchestrator::new(Arc::clone(&self.inner), evaluation)
            .with_registry(Arc::clone(&self.registry))
            .with_shared_strategy(Arc::clone(&self.strategy));

        let request = CompletionRequest {
            params: params.clone(),
            ..request.clone()
        };
        let envelope = orchestrator
            .run_with_cancel(&request, &config, cancel)
            .await?;

        Ok(GatedResponse::Gated(Box::new(envelope)))
    }
}

#[async_trait]
impl<P: CompletionProvider> CompletionProvider for GatedProvider<P> {
    async fn generate(
        &self,
        request: &CompletionRequest,
        params: &GenerationParams,
    ) -> Result<GenerationResult, GenerationError> {
        match self.generate_gated(request, params).await {
            Ok(GatedResponse::Passthrough(result)) => Ok(result),
            Ok(GatedResponse::Gated(envelope)) => envelope.final_response.ok_or_else(|| {
                GenerationError::Gate(format!(
                    "none of {} attempts produced a response",
                    envelope.total_attempts
                ))
            }),
            Err(GateError::Generation(err)) => Err(err),
            Err(err) => Err(GenerationError::Gate(err.to_string())),
        }
    }
}
