use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vizeval_gate::prelude::*;
use vizeval_gate::AttemptFailure;

#[derive(Debug, Clone)]
enum Gen {
    Text(&'static str),
    Fail,
    Empty,
    Hang(Duration),
}

struct ScriptedProvider {
    steps: Vec<Gen>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(CompletionRequest, GenerationParams)>>,
}

impl ScriptedProvider {
    fn new(steps: Vec<Gen>) -> Arc<Self> {
        Arc::new(Self {
            steps,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn answering() -> Arc<Self> {
        Self::new(Vec::new())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn seen(&self) -> Vec<(CompletionRequest, GenerationParams)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn generate(
        &self,
        request: &CompletionRequest,
        params: &GenerationParams,
    ) -> Result<GenerationResult, GenerationError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen
            .lock()
            .unwrap()
            .push((request.clone(), params.clone()));

        let answer = || GenerationResult::new(json!({ "call": n }), format!("answer {n}"));
        match self.steps.get(n - 1).cloned().unwrap_or(Gen::Text("")) {
            Gen::Text("") => Ok(answer()),
            Gen::Text(text) => Ok(GenerationResult::new(json!({ "call": n }), text)),
            Gen::Fail => Err(GenerationError::Request("connection reset".into())),
            Gen::Empty => Ok(GenerationResult::new(json!({ "call": n }), "   ")),
            Gen::Hang(duration) => {
                tokio::time::sleep(duration).await;
                Ok(answer())
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Score {
    Value(f64),
    WithFeedback(f64, &'static str),
    Null,
    Fail,
}

#[derive(Debug, Clone)]
struct SeenEvaluation {
    system_prompt: String,
    user_prompt: String,
    response: String,
    evaluator: String,
    metadata: serde_json::Map<String, serde_json::Value>,
}

struct ScriptedEvaluator {
    scores: Vec<Score>,
    calls: AtomicUsize,
    seen: Mutex<Vec<SeenEvaluation>>,
}

impl ScriptedEvaluator {
    fn new(scores: Vec<Score>) -> Arc<Self> {
        Arc::new(Self {
            scores,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn scoring(scores: &[f64]) -> Arc<Self> {
        Self::new(scores.iter().copied().map(Score::Value).collect())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EvaluationService for ScriptedEvaluator {
    async fn evaluate(
        &self,
        input: EvaluationInput<'_>,
    ) -> Result<Evaluation, EvaluationServiceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(SeenEvaluation {
            system_prompt: input.system_prompt.to_string(),
            user_prompt: input.user_prompt.to_string(),
            response: input.response.to_string(),
            evaluator: input.evaluator.id().to_string(),
            metadata: input.metadata.clone(),
        });

        let id = input.evaluator.id();
        match self.scores.get(n).cloned().unwrap_or(Score::Value(1.0)) {
            Score::Value(score) => Ok(Evaluation::scored(id, score, "")),
            Score::WithFeedback(score, feedback) => Ok(Evaluation::scored(id, score, feedback)),
            Score::Null => Ok(Evaluation::unscored(id, "Evaluation error")),
            Score::Fail => Err(EvaluationServiceError {
                message: "status 503".into(),
                status: Some(503),
                body: Some("upstream unavailable".into()),
            }),
        }
    }
}

fn request() -> CompletionRequest {
    CompletionRequest::new(
        "gpt-4",
        vec![
            ChatMessage::system("You are a medical assistant."),
            ChatMessage::user("What are the symptoms of flu?"),
        ],
    )
}

fn config(threshold: f64, max_retries: u32) -> GateConfig {
    GateConfig::new("vz-test-key")
        .with_threshold(threshold)
        .with_max_retries(max_retries)
}

fn scores(envelope: &ResultEnvelope) -> Vec<f64> {
    envelope.attempts.iter().map(|a| a.evaluation.score).collect()
}

#[tokio::test]
async fn test_retries_until_threshold_met() {
    let provider = ScriptedProvider::answering();
    let evaluator = ScriptedEvaluator::scoring(&[0.5, 0.6, 0.85]);
    let orchestrator = Orchestrator::new(Arc::clone(&provider), Arc::clone(&evaluator));

    let envelope = orchestrator.run(&request(), &config(0.8, 2)).await.unwrap();

    assert_eq!(envelope.total_attempts, 3);
    assert_eq!(envelope.attempts.len(), 3);
    assert!(envelope.passed_threshold);
    assert!((envelope.final_evaluation.score - 0.85).abs() < f64::EPSILON);
    assert!((envelope.best_score - 0.85).abs() < f64::EPSILON);
    assert_eq!(envelope.final_text(), Some("answer 3"));
    assert_eq!(
        envelope.attempts.iter().map(|a| a.attempt_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(envelope.metrics.total_attempts, 3);
    assert_eq!(envelope.metrics.failed_attempts, 0);
    assert!(envelope.metrics.estimated_input_tokens > 0);
    assert_eq!(provider.calls(), 3);
    assert_eq!(evaluator.calls(), 3);
}

#[tokio::test]
async fn test_stops_at_first_passing_attempt() {
    let provider = ScriptedProvider::answering();
    let evaluator = ScriptedEvaluator::scoring(&[0.9, 0.95]);
    let orchestrator = Orchestrator::new(Arc::clone(&provider), Arc::clone(&evaluator));

    let envelope = orchestrator.run(&request(), &config(0.8, 3)).await.unwrap();

    assert_eq!(envelope.total_attempts, 1);
    assert!(envelope.passed_threshold);
    assert_eq!(provider.calls(), 1);
    assert_eq!(evaluator.calls(), 1);
}

#[tokio::test]
async fn test_exhausted_returns_best_attempt() {
    let provider = ScriptedProvider::answering();
    let evaluator = ScriptedEvaluator::scoring(&[0.4, 0.6]);
    let orchestrator = Orchestrator::new(Arc::clone(&provider), evaluator);

    let envelope = orchestrator.run(&request(), &config(0.8, 1)).await.unwrap();

    assert_eq!(envelope.total_attempts, 2);
    assert!(!envelope.passed_threshold);
    assert!((envelope.best_score - 0.6).abs() < f64::EPSILON);
    assert_eq!(envelope.final_text(), Some("answer 2"));
    assert_eq!(envelope.best_attempt().unwrap().attempt_number, 2);
}

#[tokio::test]
async fn test_best_score_is_max_over_attempts() {
    let evaluator = ScriptedEvaluator::scoring(&[0.7, 0.3, 0.7, 0.5]);
    let orchestrator = Orchestrator::new(ScriptedProvider::answering(), evaluator);

    let envelope = orchestrator.run(&request(), &config(0.9, 3)).await.unwrap();

    let max = scores(&envelope).into_iter().fold(0.0_f64, f64::max);
    assert!((envelope.best_score - max).abs() < f64::EPSILON);
    assert_eq!(envelope.best_attempt().unwrap().attempt_number, 1);
    assert_eq!(envelope.final_text(), Some("answer 1"));
}

#[tokio::test]
async fn test_generation_failure_consumes_attempt() {
    let provider = ScriptedProvider::new(vec![Gen::Text(""), Gen::Fail, Gen::Text("")]);
    let evaluator = ScriptedEvaluator::scoring(&[0.3, 0.9]);
    let orchestrator = Orchestrator::new(Arc::clone(&provider), Arc::clone(&evaluator));

    let envelope = orchestrator.run(&request(), &config(0.8, 2)).await.unwrap();

    assert_eq!(envelope.total_attempts, 3);
    assert!(envelope.passed_threshold);
    let failed = &envelope.attempts[1];
    assert!(failed.is_failed());
    assert!(failed.generation.is_none());
    assert!(!failed.evaluation.scored);
    assert!(failed.score().abs() < f64::EPSILON);
    assert!(matches!(
        failed.failure,
        Some(AttemptFailure::Generation(GenerationError::Request(_)))
    ));
    assert_eq!(envelope.metrics.failed_attempts, 1);
    assert_eq!(provider.calls(), 3);
    assert_eq!(evaluator.calls(), 2);
}

#[tokio::test]
async fn test_evaluation_failure_consumes_attempt() {
    let evaluator = ScriptedEvaluator::new(vec![Score::Fail, Score::Value(0.9)]);
    let orchestrator = Orchestrator::new(ScriptedProvider::answering(), evaluator);

    let envelope = orchestrator.run(&request(), &config(0.8, 1)).await.unwrap();

    let failed = &envelope.attempts[0];
    assert!(failed.generation.is_some());
    match &failed.failure {
        Some(AttemptFailure::Evaluation(err)) => {
            assert_eq!(err.status, Some(503));
            assert_eq!(err.body.as_deref(), Some("upstream unavailable"));
        }
        other => panic!("expected evaluation failure, got {other:?}"),
    }
    assert!(envelope.passed_threshold);
    assert_eq!(envelope.final_text(), Some("answer 2"));
}

#[tokio::test]
async fn test_null_score_is_treated_as_failed_evaluation() {
    let evaluator = ScriptedEvaluator::new(vec![Score::Null]);
    let orchestrator = Orchestrator::new(ScriptedProvider::answering(), evaluator);

    let envelope = orchestrator.run(&request(), &config(0.0, 0)).await.unwrap();

    assert_eq!(envelope.total_attempts, 1);
    assert!(!envelope.passed_threshold);
    assert!(envelope.attempts[0].is_failed());
    assert_eq!(envelope.metrics.failed_attempts, 1);
}

#[tokio::test]
async fn test_empty_text_is_a_generation_error() {
    let provider = ScriptedProvider::new(vec![Gen::Empty, Gen::Text("Rest and fluids.")]);
    let evaluator = ScriptedEvaluator::scoring(&[0.9]);
    let orchestrator = Orchestrator::new(provider, Arc::clone(&evaluator));

    let envelope = orchestrator.run(&request(), &config(0.8, 1)).await.unwrap();

    assert_eq!(
        envelope.attempts[0].failure,
        Some(AttemptFailure::Generation(GenerationError::EmptyResponse))
    );
    assert_eq!(envelope.final_text(), Some("Rest and fluids."));
    assert_eq!(evaluator.calls(), 1);
}

#[tokio::test]
async fn test_every_attempt_failed() {
    let provider = ScriptedProvider::new(vec![Gen::Fail, Gen::Fail]);
    let evaluator = ScriptedEvaluator::scoring(&[]);
    let orchestrator = Orchestrator::new(provider, Arc::clone(&evaluator));

    let envelope = orchestrator.run(&request(), &config(0.0, 1)).await.unwrap();

    assert_eq!(envelope.total_attempts, 2);
    assert!(envelope.final_response.is_none());
    assert!(!envelope.passed_threshold);
    assert_eq!(envelope.metrics.failed_attempts, 2);
    assert_eq!(evaluator.calls(), 0);
}

#[tokio::test]
async fn test_zero_retries_makes_exactly_one_attempt() {
    let provider = ScriptedProvider::answering();
    let evaluator = ScriptedEvaluator::scoring(&[0.1]);
    let orchestrator = Orchestrator::new(Arc::clone(&provider), evaluator);

    let envelope = orchestrator.run(&request(), &config(0.8, 0)).await.unwrap();

    assert_eq!(envelope.total_attempts, 1);
    assert!(!envelope.passed_threshold);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_large_retry_budget_stops_at_first_pass() {
    let provider = ScriptedProvider::answering();
    let evaluator = ScriptedEvaluator::scoring(&[0.9]);
    let orchestrator = Orchestrator::new(Arc::clone(&provider), evaluator);

    let envelope = orchestrator
        .run(&request(), &config(0.8, u32::MAX))
        .await
        .unwrap();

    assert_eq!(envelope.total_attempts, 1);
    assert!(envelope.passed_threshold);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_earlier_failure_wins_tie_with_zero_score() {
    let provider = ScriptedProvider::new(vec![Gen::Fail, Gen::Text("")]);
    let evaluator = ScriptedEvaluator::scoring(&[0.0]);
    let orchestrator = Orchestrator::new(provider, evaluator);

    let envelope = orchestrator.run(&request(), &config(0.5, 1)).await.unwrap();

    assert_eq!(scores(&envelope), vec![0.0, 0.0]);
    assert_eq!(envelope.best_attempt().unwrap().attempt_number, 1);
    assert_eq!(envelope.final_evaluation, envelope.attempts[0].evaluation);
    assert!(envelope.final_response.is_none());
    assert!(!envelope.passed_threshold);
}

#[tokio::test]
async fn test_invalid_threshold_makes_no_calls() {
    let provider = ScriptedProvider::answering();
    let evaluator = ScriptedEvaluator::scoring(&[0.9]);
    let orchestrator = Orchestrator::new(Arc::clone(&provider), Arc::clone(&evaluator));

    let err = orchestrator
        .run(&request(), &config(1.5, 2))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GateError::Configuration(ConfigurationError::ThresholdOutOfRange(t)) if (t - 1.5).abs() < f64::EPSILON
    ));
    assert_eq!(provider.calls(), 0);
    assert_eq!(evaluator.calls(), 0);
}

#[tokio::test]
async fn test_unknown_evaluator_makes_no_calls() {
    let provider = ScriptedProvider::answering();
    let orchestrator = Orchestrator::new(Arc::clone(&provider), ScriptedEvaluator::scoring(&[]));

    let err = orchestrator
        .run(&request(), &config(0.8, 1).with_evaluator("finance"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GateError::Configuration(ConfigurationError::UnknownEvaluator(_))
    ));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_registered_custom_evaluator() {
    let mut registry = EvaluatorRegistry::builtin();
    registry.register(
        "finance",
        vizeval_client::EvaluatorInfo::new(0.75, "Financial advice", &["accuracy"]),
    );
    let evaluator = ScriptedEvaluator::scoring(&[0.9]);
    let orchestrator = Orchestrator::new(ScriptedProvider::answering(), Arc::clone(&evaluator))
        .with_registry(registry);

    let envelope = orchestrator
        .run(&request(), &config(0.8, 0).with_evaluator("finance"))
        .await
        .unwrap();

    assert!(envelope.passed_threshold);
    assert_eq!(envelope.final_evaluation.evaluator_id, "finance");
    assert_eq!(evaluator.seen.lock().unwrap()[0].evaluator, "finance");
}

#[tokio::test]
async fn test_request_without_user_message_is_rejected() {
    let provider = ScriptedProvider::answering();
    let orchestrator = Orchestrator::new(Arc::clone(&provider), ScriptedEvaluator::scoring(&[]));
    let request = CompletionRequest::new("gpt-4", vec![ChatMessage::system("Only a preamble")]);

    let err = orchestrator.run(&request, &config(0.8, 1)).await.unwrap_err();

    assert!(matches!(err, GateError::InvalidRequest(_)));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_strict_mode_raises_threshold_not_met() {
    let evaluator = ScriptedEvaluator::scoring(&[0.4, 0.6]);
    let orchestrator = Orchestrator::new(ScriptedProvider::answering(), evaluator);

    let err = orchestrator
        .run(&request(), &config(0.8, 1).with_strict(true))
        .await
        .unwrap_err();

    match err {
        GateError::ThresholdNotMet {
            attempts,
            best_score,
            threshold,
        } => {
            assert_eq!(attempts.len(), 2);
            assert!((best_score - 0.6).abs() < f64::EPSILON);
            assert!((threshold - 0.8).abs() < f64::EPSILON);
        }
        other => panic!("expected ThresholdNotMet, got {other:?}"),
    }
}

#[tokio::test]
async fn test_strict_mode_passes_when_threshold_met() {
    let evaluator = ScriptedEvaluator::scoring(&[0.4, 0.9]);
    let orchestrator = Orchestrator::new(ScriptedProvider::answering(), evaluator);

    let envelope = orchestrator
        .run(&request(), &config(0.8, 1).with_strict(true))
        .await
        .unwrap();

    assert!(envelope.passed_threshold);
}

#[tokio::test]
async fn test_evaluation_input_is_forwarded() {
    let evaluator = ScriptedEvaluator::scoring(&[0.9]);
    let orchestrator = Orchestrator::new(
        ScriptedProvider::new(vec![Gen::Text("Fever and cough.")]),
        Arc::clone(&evaluator),
    );
    let config = config(0.8, 0)
        .with_evaluator(Evaluator::Medical)
        .with_metadata("tenant", "clinic-42");

    orchestrator.run(&request(), &config).await.unwrap();

    let seen = evaluator.seen.lock().unwrap()[0].clone();
    assert_eq!(seen.system_prompt, "You are a medical assistant.");
    assert_eq!(seen.user_prompt, "What are the symptoms of flu?");
    assert_eq!(seen.response, "Fever and cough.");
    assert_eq!(seen.evaluator, "medical");
    assert_eq!(seen.metadata["tenant"], "clinic-42");
}

#[tokio::test]
async fn test_param_overrides_reach_the_provider() {
    let provider = ScriptedProvider::answering();
    let evaluator = ScriptedEvaluator::scoring(&[0.1, 0.1, 0.9]);
    let orchestrator = Orchestrator::new(Arc::clone(&provider), evaluator)
        .with_strategy(TemperatureRamp::raising());
    let request = request()
        .with_param("temperature", 0.7)
        .with_param("max_tokens", 256);

    let envelope = orchestrator.run(&request, &config(0.8, 2)).await.unwrap();

    let temperatures: Vec<f64> = provider
        .seen()
        .iter()
        .map(|(_, params)| params["temperature"].as_f64().unwrap())
        .collect();
    assert_eq!(temperatures.len(), 3);
    for (actual, expected) in temperatures.iter().zip([0.7, 0.8, 0.9]) {
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }
    assert!(provider
        .seen()
        .iter()
        .all(|(_, params)| params["max_tokens"] == json!(256)));
    assert!(envelope.attempts[0].params_override.is_empty());
    assert!(envelope.attempts[1].params_override.contains_key("temperature"));
    assert_eq!(request.params["temperature"], json!(0.7));
}

#[tokio::test]
async fn test_identical_retry_resends_same_request() {
    let provider = ScriptedProvider::answering();
    let orchestrator = Orchestrator::new(
        Arc::clone(&provider),
        ScriptedEvaluator::scoring(&[0.2, 0.9]),
    );
    let request = request().with_param("temperature", 0.3);

    orchestrator.run(&request, &config(0.8, 1)).await.unwrap();

    let seen = provider.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);
}

#[tokio::test]
async fn test_feedback_on_retry_appends_critique() {
    let provider = ScriptedProvider::new(vec![Gen::Text("Take antibiotics."), Gen::Text("")]);
    let evaluator = ScriptedEvaluator::new(vec![
        Score::WithFeedback(0.2, "Antibiotics do not treat viral infections"),
        Score::Value(0.9),
    ]);
    let orchestrator = Orchestrator::new(Arc::clone(&provider), evaluator);

    orchestrator
        .run(&request(), &config(0.8, 1).with_feedback_on_retry(true))
        .await
        .unwrap();

    let seen = provider.seen();
    let first = &seen[0].0.messages;
    let second = &seen[1].0.messages;
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 4);
    assert_eq!(second[2], ChatMessage::assistant("Take antibiotics."));
    assert_eq!(second[3].role, Role::System);
    assert!(second[3].content.contains("Attempt 1/2"));
    assert!(second[3].content.contains("0.200"));
    assert!(second[3]
        .content
        .contains("Antibiotics do not treat viral infections"));
}

#[tokio::test(start_paused = true)]
async fn test_generation_timeout_consumes_attempt() {
    let provider = ScriptedProvider::new(vec![Gen::Hang(Duration::from_secs(60)), Gen::Text("")]);
    let evaluator = ScriptedEvaluator::scoring(&[0.9]);
    let orchestrator = Orchestrator::new(provider, evaluator);
    let config = config(0.8, 1).with_request_timeout(Duration::from_secs(1));

    let envelope = orchestrator.run(&request(), &config).await.unwrap();

    assert_eq!(
        envelope.attempts[0].failure,
        Some(AttemptFailure::Generation(GenerationError::Timeout(
            Duration::from_secs(1)
        )))
    );
    assert!(envelope.passed_threshold);
    assert_eq!(envelope.final_text(), Some("answer 2"));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_generation() {
    let provider = ScriptedProvider::new(vec![
        Gen::Text(""),
        Gen::Hang(Duration::from_secs(60)),
    ]);
    let evaluator = ScriptedEvaluator::scoring(&[0.1]);
    let orchestrator = Orchestrator::new(Arc::clone(&provider), Arc::clone(&evaluator));
    let config = config(0.8, 3).with_request_timeout(Duration::from_secs(120));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let err = orchestrator
        .run_with_cancel(&request(), &config, &cancel)
        .await
        .unwrap_err();

    match err {
        GateError::Cancelled { attempts } => assert_eq!(attempts.len(), 1),
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert_eq!(provider.calls(), 2);
    assert_eq!(evaluator.calls(), 1);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let provider = ScriptedProvider::answering();
    let orchestrator = Orchestrator::new(Arc::clone(&provider), ScriptedEvaluator::scoring(&[]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orchestrator
        .run_with_cancel(&request(), &config(0.8, 1), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, GateError::Cancelled { attempts } if attempts.is_empty()));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let orchestrator = Arc::new(Orchestrator::new(
        ScriptedProvider::answering(),
        ScriptedEvaluator::scoring(&[]),
    ));

    let request = request();
    let lenient_config = config(0.5, 2);
    let strict_config = config(0.9, 0).with_evaluator("juridical");

    let (lenient, strict) = tokio::join!(
        orchestrator.run(&request, &lenient_config),
        orchestrator.run(&request, &strict_config),
    );

    assert!(lenient.unwrap().passed_threshold);
    let strict = strict.unwrap();
    assert_eq!(strict.final_evaluation.evaluator_id, "juridical");
    assert_eq!(strict.total_attempts, 1);
}

fn gated(
    provider: &Arc<ScriptedProvider>,
    evaluator: &Arc<ScriptedEvaluator>,
) -> GatedProvider<Arc<ScriptedProvider>> {
    let evaluator = Arc::clone(evaluator);
    GatedProvider::new(Arc::clone(provider)).with_evaluation_factory(move |_config| {
        Ok(Arc::clone(&evaluator) as Arc<dyn EvaluationService>)
    })
}

#[tokio::test]
async fn test_gated_provider_passthrough_when_disabled() {
    let provider = ScriptedProvider::answering();
    let evaluator = ScriptedEvaluator::scoring(&[0.1]);
    let gate = gated(&provider, &evaluator);

    assert!(!gate.is_enabled());
    let response = gate.generate_gated(&request(), &GenerationParams::new()).await.unwrap();

    assert!(!response.is_gated());
    assert_eq!(response.response().unwrap().text, "answer 1");
    assert_eq!(evaluator.calls(), 0);
}

#[tokio::test]
async fn test_gated_provider_runs_the_loop() {
    let provider = ScriptedProvider::answering();
    let evaluator = ScriptedEvaluator::scoring(&[0.3, 0.85]);
    let gate = gated(&provider, &evaluator);
    gate.set_config(config(0.8, 2)).unwrap();

    let mut params = GenerationParams::new();
    params.insert("temperature".into(), json!(0.2));
    let result = gate.generate(&request(), &params).await.unwrap();

    assert_eq!(result.text, "answer 2");
    assert_eq!(provider.calls(), 2);
    assert_eq!(evaluator.calls(), 2);
    assert_eq!(provider.seen()[0].1["temperature"], json!(0.2));
}

#[tokio::test]
async fn test_gated_provider_reconfigure_and_disable() {
    let provider = ScriptedProvider::answering();
    let evaluator = ScriptedEvaluator::scoring(&[0.6, 0.6, 0.6]);
    let gate = gated(&provider, &evaluator);

    gate.set_config(config(0.5, 0)).unwrap();
    let first = gate.generate_gated(&request(), &GenerationParams::new()).await.unwrap();
    assert!(first.envelope().unwrap().passed_threshold);

    let rejected = gate.set_config(config(2.0, 0));
    assert!(matches!(rejected, Err(ConfigurationError::ThresholdOutOfRange(_))));
    assert!((gate.config().unwrap().threshold - 0.5).abs() < f64::EPSILON);

    gate.set_config(config(0.9, 0)).unwrap();
    let second = gate.generate_gated(&request(), &GenerationParams::new()).await.unwrap();
    assert!(!second.envelope().unwrap().passed_threshold);

    gate.disable();
    let third = gate.generate_gated(&request(), &GenerationParams::new()).await.unwrap();
    assert!(!third.is_gated());
    assert_eq!(evaluator.calls(), 2);
}

#[tokio::test]
async fn test_gated_provider_passes_through_unevaluable_requests() {
    let provider = ScriptedProvider::answering();
    let evaluator = ScriptedEvaluator::scoring(&[]);
    let gate = gated(&provider, &evaluator);
    gate.set_config(config(0.8, 1)).unwrap();

    let request = CompletionRequest::new("gpt-4", vec![ChatMessage::system("Say hi")]);
    let response = gate.generate_gated(&request, &GenerationParams::new()).await.unwrap();

    assert!(!response.is_gated());
    assert_eq!(provider.calls(), 1);
    assert_eq!(evaluator.calls(), 0);
}

#[tokio::test]
async fn test_gated_provider_surfaces_failures_as_generation_errors() {
    let provider = ScriptedProvider::new(vec![Gen::Fail]);
    let evaluator = ScriptedEvaluator::scoring(&[]);
    let gate = gated(&provider, &evaluator);

    let err = gate.generate(&request(), &GenerationParams::new()).await.unwrap_err();
    assert!(matches!(err, GenerationError::Request(_)));

    let provider = ScriptedProvider::new(vec![Gen::Fail, Gen::Fail]);
    let gate = gated(&provider, &evaluator);
    gate.set_config(config(0.8, 1)).unwrap();
    let err = gate.generate(&request(), &GenerationParams::new()).await.unwrap_err();
    assert!(matches!(err, GenerationError::Gate(_)));

    let provider = ScriptedProvider::answering();
    let evaluator = ScriptedEvaluator::scoring(&[0.1]);
    let gate = gated(&provider, &evaluator);
    gate.set_config(config(0.8, 0).with_strict(true)).unwrap();
    let err = gate.generate(&request(), &GenerationParams::new()).await.unwrap_err();
    assert!(err.to_string().contains("Threshold 0.8 not met"));
}

#[tokio::test]
async fn test_evaluation_service_is_built_once_per_config() {
    let provider = ScriptedProvider::answering();
    let evaluator = ScriptedEvaluator::scoring(&[0.9, 0.9, 0.9]);
    let builds = Arc::new(AtomicUsize::new(0));
    let factory = {
        let builds = Arc::clone(&builds);
        let evaluator = Arc::clone(&evaluator);
        move |_config: &GateConfig| {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ConfigurationError>(Arc::clone(&evaluator) as Arc<dyn EvaluationService>)
        }
    };
    let gate = GatedProvider::new(Arc::clone(&provider)).with_evaluation_factory(factory);

    gate.set_config(config(0.8, 0)).unwrap();
    for _ in 0..3 {
        gate.generate(&request(), &GenerationParams::new()).await.unwrap();
    }
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(evaluator.calls(), 3);

    assert!(gate.set_config(config(1.5, 0)).is_err());
    assert_eq!(builds.load(Ordering::SeqCst), 1);

    gate.set_config(config(0.7, 0)).unwrap();
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_run_keeps_its_config() {
    let provider = ScriptedProvider::new(vec![
        Gen::Hang(Duration::from_secs(10)),
        Gen::Hang(Duration::from_secs(10)),
    ]);
    let evaluator = ScriptedEvaluator::scoring(&[0.6, 0.7]);
    let gate = gated(&provider, &evaluator);
    gate.set_config(config(0.9, 1)).unwrap();

    let request = request();
    let params = GenerationParams::new();
    let reconfigure = async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        gate.set_config(config(0.5, 0)).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        gate.disable();
    };

    let (response, ()) = tokio::join!(gate.generate_gated(&request, &params), reconfigure);

    let response = response.unwrap();
    let envelope = response.envelope().unwrap();
    assert_eq!(envelope.total_attempts, 2);
    assert!((envelope.threshold - 0.9).abs() < f64::EPSILON);
    assert!(!envelope.passed_threshold);
    assert!((envelope.best_score - 0.7).abs() < f64::EPSILON);
    assert_eq!(provider.calls(), 2);
    assert!(!gate.is_enabled());
}

#[test]
fn test_with_config_in_accepts_registered_evaluator() {
    let mut registry = EvaluatorRegistry::builtin();
    registry.register(
        "finance",
        vizeval_client::EvaluatorInfo::new(0.75, "Financial advice", &["accuracy"]),
    );
    let finance = config(0.8, 1).with_evaluator("finance");

    let rejected = GatedProvider::with_config(ScriptedProvider::answering(), finance.clone());
    assert!(matches!(
        rejected,
        Err(ConfigurationError::UnknownEvaluator(_))
    ));

    let gate =
        GatedProvider::with_config_in(ScriptedProvider::answering(), finance, registry).unwrap();
    assert!(gate.is_enabled());
    assert_eq!(gate.config().unwrap().evaluator.id(), "finance");
}
