//! Chat-completion calls.
//!
//! Request construction, backend addressing, transport setup, and the
//! streaming relay that forwards annotated deltas to the host.

pub mod backend;
pub mod client;
pub mod mode;
pub mod proxy;
pub mod relay;
pub mod request;
pub mod sse;

pub use backend::{BackendProfile, DEFAULT_HOSTED_API_VERSION};
pub use client::{ChatClient, DEFAULT_STREAM_BUFFER};
pub use mode::SamplingMode;
pub use proxy::{ProxyClientFactory, TransportClient, DEFAULT_CONNECT_TIMEOUT};
pub use relay::{ChatStream, RelayHandle, RelayState, StreamDelta, StreamRelay};
pub use request::{
    ChatRequest, ChatResponse, ChoiceItem, RequestBuilder, DEFAULT_STREAM_MAX_TOKENS,
};
pub use sse::{parse_sse_line, SseChatStream};
