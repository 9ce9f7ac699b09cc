//! Completion request and generation result types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named generation parameters (`temperature`, `top_p`, `max_tokens`, ...).
pub type GenerationParams = Map<String, Value>;

/// Returns `base` with every key of `overrides` applied on top.
#[must_use]
pub fn merge_params(base: &GenerationParams, overrides: &GenerationParams) -> GenerationParams {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model.
    System,
    /// End-user turn.
    User,
    /// Model turn.
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote the message.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// System message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A completion request as submitted to the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier understood by the provider.
    pub model: String,
    /// Ordered conversation.
    pub messages: Vec<ChatMessage>,
    /// Base generation parameters for the first attempt.
    #[serde(default)]
    pub params: GenerationParams,
}

impl CompletionRequest {
    /// Creates a request with no generation parameters.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            params: GenerationParams::new(),
        }
    }

    /// Sets one generation parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// The last system message, if any.
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.trim())
    }

    /// All user messages joined by newlines.
    #[must_use]
    pub fn user_prompt(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }

    /// A request can only be scored if it carries at least one user message.
    #[must_use]
    pub fn is_evaluable(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::User)
    }

    /// Base parameters with `overrides` applied.
    #[must_use]
    pub fn params_with(&self, overrides: &GenerationParams) -> GenerationParams {
        merge_params(&self.params, overrides)
    }

    pub(crate) fn prompt_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

/// Output of one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Provider response, opaque to the gate.
    pub raw: Value,
    /// Text extracted from the response; the subject of evaluation.
    pub text: String,
}

impl GenerationResult {
    /// Creates a result from raw provider output and its extracted text.
    pub fn new(raw: Value, text: impl Into<String>) -> Self {
        Self {
            raw,
            text: text.into(),
        }
    }
}
