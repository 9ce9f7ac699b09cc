use std::time::Duration;
use thiserror::Error;

/// Errors returned by the evaluation service client.
#[derive(Debug, Clone, Error)]
pub enum VizevalError {
    #[error("api_key is required")]
    MissingApiKey,

    #[error("Evaluator '{id}' is not available. Available: {available}")]
    UnknownEvaluator { id: String, available: String },

    #[error("Response text to evaluate is empty")]
    EmptyResponse,

    #[error("Invalid base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Connection to the Vizeval API failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Vizeval API error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        body: String,
    },

    #[error("Failed to parse API response: {0}")]
    ResponseParseFailed(String),
}

impl VizevalError {
    /// HTTP status carried by the error, if the service answered at all.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw response body carried by the error, if any.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Api { body, .. } => Some(body),
            _ => None,
        }
    }

    pub(crate) fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if err.is_decode() {
            Self::ResponseParseFailed(err.to_string())
        } else {
            Self::RequestFailed(err.to_string())
        }
    }
}
