//! Command-line access to the Vizeval evaluation service.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vizeval_client::{
    EvaluationRequest, EvaluatorRegistry, VizevalClient, DEFAULT_BASE_URL,
};
use vizeval_gate::ConfigurationError;

/// Exit code of `evaluate` when the score misses the threshold.
const EXIT_BELOW_THRESHOLD: u8 = 2;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Evaluation service api key
    #[arg(long, env = "VIZEVAL_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Evaluation service endpoint
    #[arg(long, env = "VIZEVAL_BASE_URL", global = true, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Per-request timeout in seconds
    #[arg(long, global = true, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a response and exit non-zero when it misses the threshold
    Evaluate {
        /// The prompt that was answered
        #[arg(long)]
        user_prompt: String,
        /// The response to score
        #[arg(long)]
        response: String,
        /// System prompt used during generation
        #[arg(long, default_value = "")]
        system_prompt: String,
        /// Evaluator identifier
        #[arg(long, env = "VIZEVAL_EVALUATOR", default_value = "medical")]
        evaluator: String,
        /// Acceptance threshold (defaults to the evaluator's own)
        #[arg(long, env = "VIZEVAL_THRESHOLD")]
        threshold: Option<f64>,
        /// Metadata entry forwarded to the service, as key=value
        #[arg(long = "metadata", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,
    },
    /// Check whether the service is reachable
    Health,
    /// List the known evaluators
    Evaluators,
    /// Print past evaluations for the api key
    History,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

impl Cli {
    fn client(&self) -> anyhow::Result<VizevalClient> {
        let api_key = self
            .api_key
            .clone()
            .context("an api key is required (--api-key or VIZEVAL_API_KEY)")?;
        self.client_with_key(api_key)
    }

    fn client_with_key(&self, api_key: String) -> anyhow::Result<VizevalClient> {
        Ok(VizevalClient::new(api_key)?
            .with_base_url(&self.base_url)?
            .with_timeout(Duration::from_secs(self.timeout)))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match &cli.command {
        Commands::Evaluate {
            user_prompt,
            response,
            system_prompt,
            evaluator,
            threshold,
            metadata,
        } => {
            let registry = EvaluatorRegistry::builtin();
            let evaluator = registry.resolve(evaluator)?;
            let threshold = threshold
                .or_else(|| registry.info(&evaluator).map(|info| info.default_threshold))
                .unwrap_or(vizeval_gate::retry::DEFAULT_THRESHOLD);
            if !(0.0..=1.0).contains(&threshold) {
                bail!(ConfigurationError::ThresholdOutOfRange(threshold));
            }

            let metadata: Map<String, Value> = metadata
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            let request = EvaluationRequest::new(system_prompt, user_prompt, response, &evaluator)
                .with_metadata(metadata);

            let result = cli.client()?.evaluate(request).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);

            if result.passed_threshold(threshold) {
                tracing::info!(event = "evaluation_passed", threshold, "evaluation_passed");
                Ok(ExitCode::SUCCESS)
            } else {
                tracing::warn!(
                    event = "evaluation_below_threshold",
                    threshold,
                    score = ?result.score,
                    "evaluation_below_threshold"
                );
                Ok(ExitCode::from(EXIT_BELOW_THRESHOLD))
            }
        }
        Commands::Health => {
            // GET /health does not check the key.
            let api_key = cli.api_key.clone().unwrap_or_else(|| "anonymous".to_string());
            let client = cli.client_with_key(api_key)?;
            if client.health_check().await {
                println!("{} is healthy", client.base_url());
                Ok(ExitCode::SUCCESS)
            } else {
                println!("{} is unreachable", client.base_url());
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Evaluators => {
            for (evaluator, info) in EvaluatorRegistry::builtin().iter() {
                println!(
                    "{:<10} {:.2}  {} ({})",
                    evaluator.id(),
                    info.default_threshold,
                    info.description,
                    info.focus.join(", ")
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::History => {
            let evaluations = cli.client()?.user_evaluations().await?;
            println!("{}", serde_json::to_string_pretty(&evaluations)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
