//! Host-facing chat client.
//!
//! `ChatClient` is built once per process from configuration and shared by
//! every conversation. It holds no per-call state, so `completions` and
//! `stream_chat` may run concurrently from any number of tasks.

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::llm::backend::BackendProfile;
use crate::llm::mode::SamplingMode;
use crate::llm::proxy::{ProxyClientFactory, TransportClient};
use crate::llm::relay::{RelayHandle, StreamRelay};
use crate::llm::request::{error_from_response, ChatResponse, RequestBuilder};
use crate::messages::Message;
use crate::tokens::{completion_usage_suffix, TokenAccountant};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Queue depth used by [`ChatClient::spawn_stream`].
pub const DEFAULT_STREAM_BUFFER: usize = 32;

/// Chat-completion client with exact prompt token accounting.
///
/// # Example
///
/// ```rust,ignore
/// use gpt_relay::prelude::*;
///
/// let client = ChatClient::from_config(&config::load()?)?;
/// let reply = client
///     .completions(&[Message::user("Hello!")], SamplingMode::Balance)
///     .await?;
/// println!("{}", reply.content);
/// ```
#[derive(Debug, Clone)]
pub struct ChatClient {
    backend: BackendProfile,
    model: String,
    max_tokens: u32,
    stream_max_tokens: u32,
    transport: TransportClient,
    accountant: Arc<TokenAccountant>,
    relay: StreamRelay,
}

impl ChatClient {
    /// Creates a client with default ceilings and the default accountant.
    #[must_use]
    pub fn new(backend: BackendProfile, model: impl Into<String>, transport: TransportClient) -> Self {
        let accountant = Arc::new(TokenAccountant::default());
        Self {
            backend,
            model: model.into(),
            max_tokens: crate::config::DEFAULT_MAX_TOKENS,
            stream_max_tokens: crate::llm::request::DEFAULT_STREAM_MAX_TOKENS,
            transport,
            relay: StreamRelay::new(Arc::clone(&accountant)),
            accountant,
        }
    }

    /// Builds a client from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the platform lacks required fields and
    /// `InvalidProxy` if the proxy URL is rejected.
    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        let backend = config.backend_profile()?;

        let mut factory = ProxyClientFactory::new();
        if let Some(timeout) = config.connect_timeout() {
            factory = factory.with_connect_timeout(timeout);
        }
        let transport = factory.build(config.proxy_url())?;

        tracing::info!(
            platform = backend.platform_name(),
            model = %config.model,
            proxied = transport.is_proxied(),
            "Chat client configured"
        );

        Ok(Self::new(backend, config.model.clone(), transport)
            .with_max_tokens(config.max_tokens)
            .with_stream_max_tokens(config.stream_max_tokens))
    }

    /// Sets the ceiling for blocking completions.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the ceiling for streaming calls.
    #[must_use]
    pub fn with_stream_max_tokens(mut self, max_tokens: u32) -> Self {
        self.stream_max_tokens = max_tokens;
        self
    }

    /// Replaces the token accountant used for annotations.
    #[must_use]
    pub fn with_accountant(mut self, accountant: Arc<TokenAccountant>) -> Self {
        self.relay = StreamRelay::new(Arc::clone(&accountant));
        self.accountant = accountant;
        self
    }

    /// Returns the configured model.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the backend profile.
    #[must_use]
    pub fn backend(&self) -> &BackendProfile {
        &self.backend
    }

    /// Returns the token accountant.
    #[must_use]
    pub fn accountant(&self) -> &TokenAccountant {
        &self.accountant
    }

    /// Runs a blocking completion and returns the first choice.
    ///
    /// The reply content carries the prompt's token usage as a
    /// `" (N tokens used)"` suffix. If the model has no tokenizer support
    /// the reply is returned without it.
    ///
    /// # Errors
    ///
    /// - `Config` if the backend cannot produce an endpoint
    /// - `Upstream` on transport failure, a non-success status, an
    ///   unparseable body, or a response without choices
    pub async fn completions(
        &self,
        history: &[Message],
        mode: SamplingMode,
    ) -> Result<Message, RelayError> {
        let request = RequestBuilder::build(history, mode, self.max_tokens, &self.model);
        let url = self.backend.chat_completions_url()?;
        let outbound = self.backend.prepare(request.clone());
        let usage = self
            .accountant
            .spawn_count(&request.messages, &request.model);

        tracing::debug!(
            platform = self.backend.platform_name(),
            model = %outbound.model,
            mode = %mode,
            messages = history.len(),
            "Sending completion request"
        );

        let response = self
            .backend
            .authorize(self.transport.http().post(&url))
            .json(&outbound)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Completion request failed");
                RelayError::upstream_with_cause("request failed", e)
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "Completion response could not be parsed");
            RelayError::upstream_with_cause("request failed", e)
        })?;

        let Some(choice) = body.choices.into_iter().next() else {
            tracing::error!(id = %body.id, "Completion response contained no choices");
            return Err(RelayError::upstream_with_cause(
                "request failed",
                "response contained no choices",
            ));
        };

        let mut reply = choice.message;
        match usage.await {
            Ok(Ok(tokens)) => reply.content.push_str(&completion_usage_suffix(tokens)),
            Ok(Err(e)) => {
                tracing::warn!(model = %request.model, error = %e, "Returning completion without token usage");
            }
            Err(e) => {
                tracing::warn!(model = %request.model, error = %e, "Token count task failed");
            }
        }

        Ok(reply)
    }

    /// Streams a completion into `out`, one annotated chunk per delta.
    ///
    /// Returns once the provider ends the stream. Chunks already sent stay
    /// delivered on error.
    ///
    /// # Errors
    ///
    /// - `Config` if the backend cannot produce an endpoint
    /// - `Upstream` on transport, HTTP, or stream-format failure
    /// - `Cancelled` if `cancel` fires or `out` is closed by its receiver
    pub async fn stream_chat(
        &self,
        cancel: &CancellationToken,
        history: &[Message],
        mode: SamplingMode,
        out: &mpsc::Sender<String>,
    ) -> Result<(), RelayError> {
        let request =
            RequestBuilder::build_stream(history, mode, self.stream_max_tokens, &self.model);
        self.relay
            .run(cancel, request, &self.backend, &self.transport, out)
            .await
    }

    /// Starts a streaming completion on its own task.
    #[must_use]
    pub fn spawn_stream(
        &self,
        cancel: CancellationToken,
        history: &[Message],
        mode: SamplingMode,
    ) -> RelayHandle {
        let request =
            RequestBuilder::build_stream(history, mode, self.stream_max_tokens, &self.model);
        self.relay.spawn(
            cancel,
            request,
            self.backend.clone(),
            self.transport.clone(),
            DEFAULT_STREAM_BUFFER,
        )
    }
}
