//! Configuration of a gated run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use vizeval_client::{
    validate_base_url, Evaluator, EvaluatorRegistry, VizevalClient, DEFAULT_BASE_URL,
    DEFAULT_TIMEOUT,
};

use super::error::ConfigurationError;

/// Default acceptance threshold.
pub const DEFAULT_THRESHOLD: f64 = 0.8;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Caller-supplied configuration, validated before any remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Evaluation service api key (required).
    pub api_key: String,
    /// Scoring policy (default: medical).
    #[serde(default)]
    pub evaluator: Evaluator,
    /// Minimum acceptable score in `[0, 1]` (default: 0.8).
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Attempts allowed beyond the first (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Evaluation service endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Forwarded to the evaluation service with every call.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Fail the run with `ThresholdNotMet` instead of returning a flagged envelope.
    #[serde(default)]
    pub strict: bool,
    /// Ask the service to score asynchronously.
    #[serde(default)]
    pub async_mode: bool,
    /// Deadline for each remote call (default: 30s).
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Append the rejected answer and a critique to the next attempt's messages.
    #[serde(default)]
    pub feedback_on_retry: bool,
}

const fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

const fn default_request_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl GateConfig {
    /// Configuration with every optional field at its default.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            evaluator: Evaluator::default(),
            threshold: DEFAULT_THRESHOLD,
            max_retries: DEFAULT_MAX_RETRIES,
            base_url: default_base_url(),
            metadata: Map::new(),
            strict: false,
            async_mode: false,
            request_timeout: DEFAULT_TIMEOUT,
            feedback_on_retry: false,
        }
    }

    /// Set the evaluator.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: impl Into<Evaluator>) -> Self {
        self.evaluator = evaluator.into();
        self
    }

    /// Set the acceptance threshold.
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the number of retries after the first attempt.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the evaluation service endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Add one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set strict mode.
    #[must_use]
    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set async scoring.
    #[must_use]
    pub const fn with_async_mode(mut self, async_mode: bool) -> Self {
        self.async_mode = async_mode;
        self
    }

    /// Set the per-call deadline.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set whether retries carry the evaluator's critique.
    #[must_use]
    pub const fn with_feedback_on_retry(mut self, enabled: bool) -> Self {
        self.feedback_on_retry = enabled;
        self
    }

    /// Upper bound on attempts (`max_retries + 1`).
    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        (self.max_retries as usize).saturating_add(1)
    }

    /// Checks every field against `registry`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigurationError`] found.
    pub fn validate(&self, registry: &EvaluatorRegistry) -> Result<(), ConfigurationError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigurationError::MissingApiKey);
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigurationError::ThresholdOutOfRange(self.threshold));
        }
        registry.ensure(&self.evaluator)?;
        validate_base_url(&self.base_url)?;
        if self.request_timeout.is_zero() {
            return Err(ConfigurationError::InvalidTimeout);
        }
        Ok(())
    }

    /// Builds an evaluation client bound to this configuration.
    ///
    /// # Errors
    ///
    /// Fails on an empty api key or an invalid base url.
    pub fn client(&self) -> Result<VizevalClient, ConfigurationError> {
        Ok(VizevalClient::new(self.api_key.clone())?
            .with_base_url(&self.base_url)?
            .with_timeout(self.request_timeout))
    }

    /// Reads the configuration from `VIZEVAL_*` environment variables.
    ///
    /// # Errors
    ///
    /// `VIZEVAL_API_KEY` is required; unparsable values and a negative
    /// `VIZEVAL_MAX_RETRIES` are rejected.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, using the `VIZEVAL_*` keys.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_env`].
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let api_key = lookup("VIZEVAL_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigurationError::MissingApiKey)?;
        let mut config = Self::new(api_key);

        if let Some(evaluator) = lookup("VIZEVAL_EVALUATOR") {
            config.evaluator = Evaluator::from(evaluator.trim());
        }
        if let Some(raw) = lookup("VIZEVAL_THRESHOLD") {
            config.threshold = raw
                .trim()
                .parse()
                .map_err(|e: std::num::ParseFloatError| invalid("VIZEVAL_THRESHOLD", &raw, e))?;
        }
        if let Some(raw) = lookup("VIZEVAL_MAX_RETRIES") {
            config.max_retries = parse_max_retries(&raw)?;
        }
        if let Some(base_url) = lookup("VIZEVAL_BASE_URL") {
            config.base_url = base_url.trim().to_string();
        }
        if let Some(raw) = lookup("VIZEVAL_STRICT") {
            config.strict = parse_flag("VIZEVAL_STRICT", &raw)?;
        }

        Ok(config)
    }
}

fn invalid(key: &str, value: &str, reason: impl ToString) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_max_retries(raw: &str) -> Result<u32, ConfigurationError> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid("VIZEVAL_MAX_RETRIES", raw, e))?;
    if value < 0 {
        return Err(ConfigurationError::NegativeMaxRetries(value));
    }
    u32::try_from(value).map_err(|e| invalid("VIZEVAL_MAX_RETRIES", raw, e))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigurationError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(invalid(key, raw, "expected a boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GateConfig::new("key");
        assert_eq!(config.evaluator, Evaluator::Medical);
        assert!((config.threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_attempts(), 4);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(!config.strict);
        assert!(config.validate(&EvaluatorRegistry::builtin()).is_ok());
    }

    #[test]
    fn test_builder() {
        let config = GateConfig::new("key")
            .with_evaluator("juridical")
            .with_threshold(0.6)
            .with_max_retries(0)
            .with_strict(true)
            .with_metadata("tenant", "acme");

        assert_eq!(config.evaluator, Evaluator::Juridical);
        assert_eq!(config.max_attempts(), 1);
        assert!(config.strict);
        assert_eq!(config.metadata["tenant"], "acme");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let registry = EvaluatorRegistry::builtin();

        assert_eq!(
            GateConfig::new("").validate(&registry),
            Err(ConfigurationError::MissingApiKey)
        );
        assert_eq!(
            GateConfig::new("k").with_threshold(1.5).validate(&registry),
            Err(ConfigurationError::ThresholdOutOfRange(1.5))
        );
        assert!(matches!(
            GateConfig::new("k").with_threshold(f64::NAN).validate(&registry),
            Err(ConfigurationError::ThresholdOutOfRange(_))
        ));
        assert!(matches!(
            GateConfig::new("k").with_evaluator("finance").validate(&registry),
            Err(ConfigurationError::UnknownEvaluator(_))
        ));
        assert!(matches!(
            GateConfig::new("k").with_base_url("not a url").validate(&registry),
            Err(ConfigurationError::InvalidBaseUrl(_))
        ));
        assert_eq!(
            GateConfig::new("k")
                .with_request_timeout(Duration::ZERO)
                .validate(&registry),
            Err(ConfigurationError::InvalidTimeout)
        );
    }

    #[test]
    fn test_threshold_bounds_are_inclusive() {
        let registry = EvaluatorRegistry::builtin();
        assert!(GateConfig::new("k").with_threshold(0.0).validate(&registry).is_ok());
        assert!(GateConfig::new("k").with_threshold(1.0).validate(&registry).is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let config = GateConfig::from_lookup(lookup(&[
            ("VIZEVAL_API_KEY", "secret"),
            ("VIZEVAL_EVALUATOR", "dummy"),
            ("VIZEVAL_THRESHOLD", "0.5"),
            ("VIZEVAL_MAX_RETRIES", "1"),
            ("VIZEVAL_BASE_URL", "http://localhost:8000"),
            ("VIZEVAL_STRICT", "true"),
        ]))
        .unwrap();

        assert_eq!(config.api_key, "secret");
        assert_eq!(config.evaluator, Evaluator::Dummy);
        assert!((config.threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.base_url, "http://localhost:8000");
        assert!(config.strict);
    }

    #[test]
    fn test_from_lookup_errors() {
        assert_eq!(
            GateConfig::from_lookup(lookup(&[])),
            Err(ConfigurationError::MissingApiKey)
        );
        assert_eq!(
            GateConfig::from_lookup(lookup(&[
                ("VIZEVAL_API_KEY", "k"),
                ("VIZEVAL_MAX_RETRIES", "-1"),
            ])),
            Err(ConfigurationError::NegativeMaxRetries(-1))
        );
        assert!(matches!(
            GateConfig::from_lookup(lookup(&[
                ("VIZEVAL_API_KEY", "k"),
                ("VIZEVAL_THRESHOLD", "high"),
            ])),
            Err(ConfigurationError::InvalidValue { key, .. }) if key == "VIZEVAL_THRESHOLD"
        ));
        assert!(matches!(
            GateConfig::from_lookup(lookup(&[
                ("VIZEVAL_API_KEY", "k"),
                ("VIZEVAL_STRICT", "maybe"),
            ])),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let config: GateConfig = serde_json::from_str(r#"{"api_key": "k", "evaluator": "juridical"}"#).unwrap();
        assert_eq!(config, GateConfig::new("k").with_evaluator(Evaluator::Juridical));
    }

    #[test]
    fn test_client_is_bound_to_config() {
        let client = GateConfig::new("k")
            .with_base_url("http://localhost:8000/")
            .with_request_timeout(Duration::from_secs(5))
            .client()
            .unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(client.timeout(), Duration::from_secs(5));
    }
}
