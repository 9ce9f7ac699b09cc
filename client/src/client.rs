//! Evaluation service client implementation

use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;

use crate::error::VizevalError;
use crate::types::{EvaluationRequest, EvaluationResponse};

/// Endpoint used when no base url is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.vizeval.com";

/// Deadline applied to each call unless overridden.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("vizeval-rs/", env!("CARGO_PKG_VERSION"));

/// Checks that `url` is an absolute http(s) url and returns it without a trailing `/`.
pub fn validate_base_url(url: &str) -> Result<String, VizevalError> {
    let parsed = Url::parse(url).map_err(|e| VizevalError::InvalidBaseUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(VizevalError::InvalidBaseUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    Ok(url.trim_end_matches('/').to_string())
}

/// Client for the Vizeval evaluation API.
///
/// Cheap to clone; the api key and base url never change after construction,
/// so one client can serve concurrent runs.
#[derive(Clone, Debug)]
pub struct VizevalClient {
    http: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl VizevalClient {
    /// Creates a client for the default endpoint.
    ///
    /// # Errors
    ///
    /// Returns `VizevalError::MissingApiKey` if `api_key` is empty.
    pub fn new(api_key: impl Into<String>) -> Result<Self, VizevalError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(VizevalError::MissingApiKey);
        }

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| VizevalError::RequestFailed(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Points the client at another endpoint.
    ///
    /// # Errors
    ///
    /// Returns `VizevalError::InvalidBaseUrl` if the url does not parse.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, VizevalError> {
        self.base_url = validate_base_url(base_url)?;
        Ok(self)
    }

    /// Sets the per-call deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The api key sent with every request.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Base url without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Per-call deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Scores a response.
    ///
    /// # Errors
    ///
    /// Returns `VizevalError::EmptyResponse` for blank response text, `Api` for
    /// non-2xx answers (with status and raw body), `Timeout`/`RequestFailed` for
    /// transport failures and `ResponseParseFailed` for malformed payloads.
    pub async fn evaluate(
        &self,
        mut request: EvaluationRequest,
    ) -> Result<EvaluationResponse, VizevalError> {
        if request.response.trim().is_empty() {
            return Err(VizevalError::EmptyResponse);
        }
        request.api_key.clone_from(&self.api_key);

        tracing::debug!(
            event = "evaluation_request",
            evaluator = %request.evaluator,
            response_chars = request.response.chars().count(),
            "evaluation_request"
        );

        let response = self
            .http
            .post(format!("{}/evaluation/", self.base_url))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| VizevalError::from_reqwest(&e, self.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| VizevalError::from_reqwest(&e, self.timeout))?;

        if !status.is_success() {
            return Err(api_error(status, body));
        }

        serde_json::from_str::<EvaluationResponse>(&body)
            .map_err(|e| VizevalError::ResponseParseFailed(e.to_string()))
    }

    /// Lists the evaluations recorded for this api key.
    ///
    /// # Errors
    ///
    /// Same transport and status errors as [`Self::evaluate`].
    pub async fn user_evaluations(&self) -> Result<Vec<Value>, VizevalError> {
        let response = self
            .http
            .get(format!("{}/user/evaluations", self.base_url))
            .timeout(self.timeout)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| VizevalError::from_reqwest(&e, self.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| VizevalError::from_reqwest(&e, self.timeout))?;

        if status != StatusCode::OK {
            return Err(api_error(status, body));
        }

        serde_json::from_str(&body).map_err(|e| VizevalError::ResponseParseFailed(e.to_string()))
    }

    /// Returns `true` when `GET /health` answers 200. Never fails.
    pub async fn health_check(&self) -> bool {
        match self
            .http
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::debug!(event = "health_check_failed", error = %e, "health_check_failed");
                false
            }
        }
    }
}

fn api_error(status: StatusCode, body: String) -> VizevalError {
    let mut message = format!("status {}", status.as_u16());
    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(&body) {
        if let Some(detail) = fields.get("detail") {
            match detail {
                Value::String(text) => message = format!("{message} - {text}"),
                other => message = format!("{message} - {other}"),
            }
        }
    }

    VizevalError::Api {
        status: status.as_u16(),
        message,
        body,
    }
}
