//! # gpt-relay: token-accounted chat completions
//!
//! A thin client for OpenAI-style chat-completion backends that reports the
//! exact prompt token cost of every call and relays streamed replies to a
//! host application chunk by chunk.
//!
//! ## Architecture
//!
//! - **Tokens**: chat-format token arithmetic over per-model overheads
//! - **Backend**: direct or Azure-hosted addressing, chosen once at startup
//! - **Relay**: a cancellable state machine forwarding annotated deltas
//!   through a bounded channel
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gpt_relay::prelude::*;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RelayError> {
//!     let client = ChatClient::from_config(&gpt_relay::config::load()?)?;
//!     let history = [Message::system("Be brief."), Message::user("Hello!")];
//!
//!     let (tx, mut rx) = mpsc::channel(32);
//!     let cancel = CancellationToken::new();
//!     let printer = tokio::spawn(async move {
//!         while let Some(chunk) = rx.recv().await {
//!             println!("{chunk}");
//!         }
//!     });
//!
//!     client.stream_chat(&cancel, &history, SamplingMode::Balance, &tx).await?;
//!     drop(tx);
//!     printer.await.ok();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod messages;
pub mod tokens;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::RelayConfig;
    pub use crate::error::{RelayError, RelayErrorKind};
    pub use crate::llm::{
        BackendProfile, ChatClient, ChatRequest, ChatStream, ProxyClientFactory, RelayHandle,
        RelayState, RequestBuilder, SamplingMode, StreamDelta, StreamRelay, TransportClient,
    };
    pub use crate::messages::Message;
    pub use crate::tokens::{TokenAccountant, Tokenizer};

    pub use tokio_util::sync::CancellationToken;
}
