//! Chat-completion request and response bodies.

use crate::error::RelayError;
use crate::llm::mode::SamplingMode;
use crate::messages::Message;
use serde::{Deserialize, Serialize};

/// Ceiling used by streaming calls when the host does not override it.
pub const DEFAULT_STREAM_MAX_TOKENS: u32 = 2000;

/// Request body for the chat completions endpoint.
///
/// Built once per call and not modified afterwards, except for the model
/// name which a hosted backend remaps to its deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model (or deployment) name
    pub model: String,
    /// Conversation history, oldest first
    pub messages: Vec<Message>,
    /// Ceiling on generated tokens
    pub max_tokens: u32,
    /// Sampling temperature from the selected mode
    pub temperature: f32,
    /// Nucleus sampling mass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Frequency penalty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    /// Presence penalty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    /// Number of choices to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    /// Whether the provider should stream deltas
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

impl ChatRequest {
    /// Returns a copy addressed to a different model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Builds [`ChatRequest`] bodies from a history and a sampling mode.
///
/// Two variants exist. The blocking variant pins `top_p = 1` and zero
/// penalties; the streaming variant leaves those to the provider's defaults
/// and asks for a single streamed choice.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestBuilder;

impl RequestBuilder {
    /// Builds a blocking completion request.
    #[must_use]
    pub fn build(
        history: &[Message],
        mode: SamplingMode,
        max_tokens: u32,
        model: &str,
    ) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: history.to_vec(),
            max_tokens,
            temperature: mode.temperature(),
            top_p: Some(1.0),
            frequency_penalty: Some(0.0),
            presence_penalty: Some(0.0),
            n: None,
            stream: false,
        }
    }

    /// Builds a streaming completion request.
    #[must_use]
    pub fn build_stream(
        history: &[Message],
        mode: SamplingMode,
        max_tokens: u32,
        model: &str,
    ) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: history.to_vec(),
            max_tokens,
            temperature: mode.temperature(),
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            n: Some(1),
            stream: true,
        }
    }
}

/// Response body of a blocking completion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatResponse {
    /// Response identifier
    #[serde(default)]
    pub id: String,
    /// Object type (`chat.completion`)
    #[serde(default)]
    pub object: String,
    /// Creation timestamp (seconds)
    #[serde(default)]
    pub created: i64,
    /// Model that produced the reply
    #[serde(default)]
    pub model: String,
    /// Generated choices; only the first is used
    #[serde(default)]
    pub choices: Vec<ChoiceItem>,
    /// Provider usage block, forwarded untouched
    #[serde(default)]
    pub usage: Option<serde_json::Map<String, serde_json::Value>>,
}

/// One generated choice of a blocking completion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChoiceItem {
    /// The generated message
    pub message: Message,
    /// Position in `choices`
    #[serde(default)]
    pub index: usize,
    /// Why generation stopped
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Error envelope returned by the provider.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub(crate) error: ApiErrorDetail,
}

/// Error detail from the provider.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorDetail {
    #[serde(default)]
    pub(crate) message: String,
    #[serde(rename = "type", default)]
    pub(crate) error_type: Option<String>,
    #[serde(default)]
    pub(crate) code: Option<serde_json::Value>,
}

impl ApiErrorDetail {
    /// Renders the detail as a single cause string.
    pub(crate) fn describe(&self) -> String {
        match (&self.error_type, &self.code) {
            (Some(kind), _) => format!("{} ({})", self.message, kind),
            (None, Some(code)) => format!("{} ({})", self.message, code),
            (None, None) => self.message.clone(),
        }
    }
}

/// Converts a non-success HTTP response into an upstream error.
pub(crate) async fn error_from_response(response: reqwest::Response) -> RelayError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let cause = match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(api_error) => api_error.error.describe(),
        Err(_) if body.trim().is_empty() => status.canonical_reason().unwrap_or("unknown error").to_string(),
        Err(_) => body,
    };

    tracing::error!(status = status.as_u16(), cause = %cause, "Provider returned an error status");
    RelayError::upstream_status(status.as_u16(), cause)
}
