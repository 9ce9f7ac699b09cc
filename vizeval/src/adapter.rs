//! Adapter exposing any Rig completion model as a [`CompletionProvider`].
//!
//! ```no_run
//! # use vizeval::prelude::*;
//! # async fn example<M: rig::completion::CompletionModel>(model: M) -> Result<(), vizeval::Error> {
//! let config = GateConfig::new("vz-key").with_threshold(0.8);
//! let gated = GatedProvider::with_config(RigProvider::new(model), config)?;
//!
//! let request = CompletionRequest::new(
//!     "gpt-4o",
//!     vec![ChatMessage::user("List three flu symptoms.")],
//! );
//! let result = gated.generate(&request, &request.params).await?;
//! println!("{}", result.text);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use rig::completion::message::{AssistantContent, Message};
use rig::completion::{CompletionError, CompletionModel};
use rig::OneOrMany;
use serde_json::{json, Value};
use vizeval_gate::{
    ChatMessage, CompletionProvider, CompletionRequest, GenerationError, GenerationParams,
    GenerationResult, Role,
};

/// A conversation reshaped for Rig's preamble / history / prompt model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RigTurns {
    /// System messages, joined by blank lines.
    pub preamble: Option<String>,
    /// User and assistant turns preceding the prompt.
    pub history: Vec<ChatMessage>,
    /// The turn the model answers.
    pub prompt: String,
}

impl RigTurns {
    /// Splits a conversation.
    ///
    /// System messages before the last user message become the preamble and
    /// that user message becomes the prompt. Rig has no mid-conversation
    /// system role, so when system messages follow the last user message
    /// (a retry critique), they form the prompt and everything before them
    /// goes to the history.
    ///
    /// # Errors
    ///
    /// `GenerationError::Request` if there is no user message, or if the
    /// conversation ends on an assistant turn.
    pub fn from_messages(messages: &[ChatMessage]) -> Result<Self, GenerationError> {
        let last_user = messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .ok_or_else(|| GenerationError::Request("conversation has no user message".into()))?;
        let (head, tail) = messages.split_at(last_user + 1);

        let preamble = join(head.iter().filter(|m| m.role == Role::System));
        let mut history: Vec<ChatMessage> =
            head.iter().filter(|m| m.role != Role::System).cloned().collect();

        if tail.is_empty() {
            let prompt = history.pop().map(|m| m.content).unwrap_or_default();
            return Ok(Self {
                preamble,
                history,
                prompt,
            });
        }

        let prompt = join(tail.iter().filter(|m| m.role == Role::System)).ok_or_else(|| {
            GenerationError::Request("conversation ends on an assistant turn".into())
        })?;
        history.extend(tail.iter().filter(|m| m.role != Role::System).cloned());

        Ok(Self {
            preamble,
            history,
            prompt,
        })
    }
}

fn join<'a>(messages: impl Iterator<Item = &'a ChatMessage>) -> Option<String> {
    let parts: Vec<&str> = messages.map(|m| m.content.trim()).filter(|c| !c.is_empty()).collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

fn to_rig_message(message: ChatMessage) -> Message {
    match message.role {
        Role::Assistant => Message::assistant(message.content),
        Role::User | Role::System => Message::user(message.content),
    }
}

/// Rig failures become provider errors so the gate records them as failed attempts.
fn provider_error(err: &CompletionError) -> GenerationError {
    GenerationError::Provider(err.to_string())
}

/// Concatenated text parts of a Rig response; tool calls and reasoning are skipped.
#[must_use]
pub fn response_text(choice: &OneOrMany<AssistantContent>) -> String {
    choice
        .iter()
        .filter_map(|content| match content {
            AssistantContent::Text(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect()
}

/// Wraps a Rig [`CompletionModel`].
///
/// `temperature` and `max_tokens` map to Rig's request fields; every other
/// parameter is sent as provider-specific `additional_params`.
#[derive(Debug, Clone)]
pub struct RigProvider<M> {
    model: M,
}

impl<M: CompletionModel> RigProvider<M> {
    /// Wraps `model`.
    pub const fn new(model: M) -> Self {
        Self { model }
    }

    /// The wrapped model.
    pub const fn model(&self) -> &M {
        &self.model
    }
}

#[async_trait]
impl<M: CompletionModel> CompletionProvider for RigProvider<M> {
    async fn generate(
        &self,
        request: &CompletionRequest,
        params: &GenerationParams,
    ) -> Result<GenerationResult, GenerationError> {
        let turns = RigTurns::from_messages(&request.messages)?;

        let mut builder = self
            .model
            .completion_request(Message::user(turns.prompt))
            .messages(turns.history.into_iter().map(to_rig_message).collect());
        if let Some(preamble) = turns.preamble {
            builder = builder.preamble(preamble);
        }

        let mut extra = params.clone();
        if let Some(temperature) = extra.remove("temperature").as_ref().and_then(Value::as_f64) {
            builder = builder.temperature(temperature);
        }
        if let Some(max_tokens) = extra.remove("max_tokens").as_ref().and_then(Value::as_u64) {
            builder = builder.max_tokens(max_tokens);
        }
        if !extra.is_empty() {
            builder = builder.additional_params(Value::Object(extra));
        }

        tracing::debug!(
            event = "rig_completion",
            model = %request.model,
            "rig_completion"
        );
        let response = builder
            .send()
            .await
            .map_err(|e| provider_error(&e))?;

        let text = response_text(&response.choice);
        let raw = json!({
            "choice": serde_json::to_value(&response.choice)
                .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?,
            "usage": {
                "input_tokens": response.usage.input_tokens,
                "output_tokens": response.usage.output_tokens,
                "total_tokens": response.usage.total_tokens,
            },
            "raw_response": serde_json::to_value(&response.raw_response).unwrap_or(Value::Null),
        });

        Ok(GenerationResult::new(raw, text))
    }
}
