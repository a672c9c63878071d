//! Streaming relay.
//!
//! Drives one streaming completion from connection to close and forwards
//! each content delta, with the prompt's token usage appended, to a bounded
//! consumer channel.
//!
//! ```text
//! Idle -> Connecting -> Streaming -> Completed -> Closed
//!              |            |
//!              +-> Failed <-+-> Closed
//! ```
//!
//! The stream is released exactly once on every exit path, including
//! cancellation. Sends on the output channel are the backpressure point: a
//! slow consumer throttles reads from the network.

use crate::error::RelayError;
use crate::llm::backend::BackendProfile;
use crate::llm::proxy::TransportClient;
use crate::llm::request::ChatRequest;
use crate::llm::sse::SseChatStream;
use crate::tokens::{stream_usage_suffix, TokenAccountant};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// One item received from a streaming completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDelta {
    /// An incremental text fragment (may be empty)
    Content(String),
    /// The provider signalled the end of the stream
    End,
}

/// A source of stream deltas that owns a network resource.
#[async_trait]
pub trait ChatStream: Send {
    /// Waits for the next delta.
    ///
    /// # Errors
    ///
    /// Returns `Upstream` on transport failure or a malformed event.
    async fn recv(&mut self) -> Result<StreamDelta, RelayError>;

    /// Releases the underlying connection. Called exactly once by the relay.
    fn close(&mut self);
}

/// Lifecycle of a single relay call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Nothing has happened yet
    Idle,
    /// Resolving the endpoint and opening the request
    Connecting,
    /// Receiving deltas
    Streaming,
    /// The end-of-stream marker was received
    Completed,
    /// Connection, stream, or consumer failure, or cancellation
    Failed,
    /// The stream resource has been released
    Closed,
}

impl RelayState {
    /// Returns true if the state machine allows moving to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: RelayState) -> bool {
        use RelayState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Failed)
                | (Connecting, Streaming)
                | (Connecting, Failed)
                | (Streaming, Completed)
                | (Streaming, Failed)
                | (Completed, Closed)
                | (Failed, Closed)
        )
    }

    /// Returns true once the relay can make no further progress.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Per-call state tracker.
#[derive(Debug)]
struct Lifecycle {
    state: RelayState,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: RelayState::Idle,
        }
    }

    fn advance(&mut self, next: RelayState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid relay transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(from = %self.state, to = %next, "Relay state transition");
        self.state = next;
    }

    fn fail(&mut self, error: RelayError) -> RelayError {
        self.advance(RelayState::Failed);
        error
    }

    /// Fails before a stream exists; there is nothing to release.
    fn abort(&mut self, error: RelayError) -> RelayError {
        let error = self.fail(error);
        self.advance(RelayState::Closed);
        error
    }
}

/// Owns a stream and guarantees `close` runs exactly once.
struct StreamGuard<S: ChatStream> {
    stream: S,
    released: bool,
}

impl<S: ChatStream> StreamGuard<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            released: false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.stream.close();
        }
    }
}

impl<S: ChatStream> Drop for StreamGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Relays streaming completions to a consumer channel.
#[derive(Debug, Clone)]
pub struct StreamRelay {
    accountant: Arc<TokenAccountant>,
}

impl StreamRelay {
    /// Creates a relay that annotates chunks using `accountant`.
    #[must_use]
    pub fn new(accountant: Arc<TokenAccountant>) -> Self {
        Self { accountant }
    }

    /// Opens a streaming completion and relays it to `out`.
    ///
    /// Token usage is counted against `request` as given (before any
    /// hosted-model remapping).
    ///
    /// # Errors
    ///
    /// - `Config` if `backend` cannot produce an endpoint
    /// - `Upstream` on transport, HTTP, or stream-format failure
    /// - `Cancelled` if `cancel` fires or the consumer drops its receiver
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        request: ChatRequest,
        backend: &BackendProfile,
        client: &TransportClient,
        out: &mpsc::Sender<String>,
    ) -> Result<(), RelayError> {
        let mut lifecycle = Lifecycle::new();
        self.drive(&mut lifecycle, cancel, request, backend, client, out)
            .await
    }

    async fn drive(
        &self,
        lifecycle: &mut Lifecycle,
        cancel: &CancellationToken,
        request: ChatRequest,
        backend: &BackendProfile,
        client: &TransportClient,
        out: &mpsc::Sender<String>,
    ) -> Result<(), RelayError> {
        if cancel.is_cancelled() {
            return Err(lifecycle.abort(RelayError::cancelled("cancelled before connecting")));
        }
        lifecycle.advance(RelayState::Connecting);

        let url = backend
            .chat_completions_url()
            .map_err(|e| lifecycle.abort(e))?;
        let outbound = backend.prepare(request.clone());

        // Counting overlaps the connection; the first chunk waits only if
        // the encoding is still loading.
        let usage = self.count_usage(&request);

        tracing::debug!(
            platform = backend.platform_name(),
            model = %outbound.model,
            messages = outbound.messages.len(),
            "Opening completion stream"
        );

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RelayError::cancelled("cancelled while connecting")),
            result = SseChatStream::connect(client, backend, &url, &outbound) => result,
        };
        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "Failed to open completion stream");
                }
                return Err(lifecycle.abort(e));
            }
        };

        self.pump(lifecycle, cancel, stream, &request, usage, out)
            .await
    }

    /// Relays an already-open stream to `out`.
    ///
    /// # Errors
    ///
    /// - `Upstream` if the stream fails or yields a malformed event
    /// - `Cancelled` if `cancel` fires or the consumer drops its receiver
    pub async fn relay<S: ChatStream>(
        &self,
        cancel: &CancellationToken,
        stream: S,
        request: &ChatRequest,
        out: &mpsc::Sender<String>,
    ) -> Result<(), RelayError> {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(RelayState::Connecting);
        let usage = self.count_usage(request);
        self.pump(&mut lifecycle, cancel, stream, request, usage, out)
            .await
    }

    /// Runs [`run`](Self::run) on a new task with a bounded output queue.
    ///
    /// The returned handle separates "more data" (`recv`) from the terminal
    /// outcome (`finish`), so a closed channel is never the only signal.
    #[must_use]
    pub fn spawn(
        &self,
        cancel: CancellationToken,
        request: ChatRequest,
        backend: BackendProfile,
        client: TransportClient,
        capacity: usize,
    ) -> RelayHandle {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let relay = self.clone();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            relay
                .run(&task_cancel, request, &backend, &client, &tx)
                .await
        });

        RelayHandle {
            chunks: rx,
            task,
            cancel,
        }
    }

    async fn pump<S: ChatStream>(
        &self,
        lifecycle: &mut Lifecycle,
        cancel: &CancellationToken,
        stream: S,
        request: &ChatRequest,
        mut usage: UsageTask,
        out: &mpsc::Sender<String>,
    ) -> Result<(), RelayError> {
        let mut guard = StreamGuard::new(stream);
        lifecycle.advance(RelayState::Streaming);

        let result = self
            .stream_loop(cancel, &mut guard, request, &mut usage, out)
            .await;

        match result {
            Ok(chunks) => {
                lifecycle.advance(RelayState::Completed);
                tracing::debug!(chunks, "Completion stream finished");
            }
            Err(ref e) if e.is_cancelled() => {
                lifecycle.advance(RelayState::Failed);
                tracing::info!(reason = %e, "Completion stream cancelled");
            }
            Err(ref e) => {
                lifecycle.advance(RelayState::Failed);
                tracing::error!(error = %e, "Completion stream failed");
            }
        }

        guard.release();
        lifecycle.advance(RelayState::Closed);
        result.map(|_| ())
    }

    async fn stream_loop<S: ChatStream>(
        &self,
        cancel: &CancellationToken,
        guard: &mut StreamGuard<S>,
        request: &ChatRequest,
        usage: &mut UsageTask,
        out: &mpsc::Sender<String>,
    ) -> Result<usize, RelayError> {
        let mut annotation: Option<String> = None;
        let mut forwarded = 0usize;

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RelayError::cancelled("stream cancelled by caller"));
                }
                delta = guard.stream.recv() => delta?,
            };

            let text = match received {
                StreamDelta::End => return Ok(forwarded),
                StreamDelta::Content(text) => text,
            };

            if annotation.is_none() {
                let suffix = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(RelayError::cancelled("stream cancelled by caller"));
                    }
                    counted = &mut *usage => usage_suffix(request, counted),
                };
                annotation = Some(suffix);
            }
            let chunk = format!("{}{}", text, annotation.as_deref().unwrap_or_default());

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RelayError::cancelled("stream cancelled by caller"));
                }
                sent = out.send(chunk) => {
                    sent.map_err(|_| RelayError::cancelled("output receiver dropped"))?;
                }
            }
            forwarded += 1;
        }
    }

    fn count_usage(&self, request: &ChatRequest) -> UsageTask {
        self.accountant
            .spawn_count(&request.messages, &request.model)
    }
}

type UsageTask = JoinHandle<Result<usize, RelayError>>;

/// Counting failure never aborts a stream; chunks go out unannotated.
fn usage_suffix(
    request: &ChatRequest,
    counted: Result<Result<usize, RelayError>, JoinError>,
) -> String {
    match counted {
        Ok(Ok(tokens)) => stream_usage_suffix(tokens),
        Ok(Err(e)) => {
            tracing::warn!(model = %request.model, error = %e, "Relaying stream without token usage");
            String::new()
        }
        Err(e) => {
            tracing::warn!(model = %request.model, error = %e, "Token count task failed");
            String::new()
        }
    }
}

impl Default for StreamRelay {
    fn default() -> Self {
        Self::new(Arc::new(TokenAccountant::default()))
    }
}

/// Handle to a relay running on its own task.
#[derive(Debug)]
pub struct RelayHandle {
    chunks: mpsc::Receiver<String>,
    task: JoinHandle<Result<(), RelayError>>,
    cancel: CancellationToken,
}

impl RelayHandle {
    /// Receives the next chunk, or `None` once the relay has stopped sending.
    pub async fn recv(&mut self) -> Option<String> {
        self.chunks.recv().await
    }

    /// Asks the relay to stop. `finish` then reports `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the relay to finish and returns its outcome.
    ///
    /// Chunks still queued are discarded.
    ///
    /// # Errors
    ///
    /// Returns the relay's terminal error, or `Upstream` if the task panicked.
    pub async fn finish(self) -> Result<(), RelayError> {
        drop(self.chunks);
        self.task
            .await
            .map_err(|e| RelayError::upstream_with_cause("relay task failed", e))?
    }

    /// Drains every chunk, then pairs them with the relay's outcome.
    pub async fn collect(mut self) -> (Vec<String>, Result<(), RelayError>) {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.chunks.recv().await {
            chunks.push(chunk);
        }
        let outcome = self.finish().await;
        (chunks, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mode::SamplingMode;
    use crate::llm::request::RequestBuilder;
    use crate::messages::Message;
    use crate::tokens::{OverheadTable, Tokenizer};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replays scripted deltas; `None` in the script blocks forever.
    struct ScriptedStream {
        script: VecDeque<Option<Result<StreamDelta, RelayError>>>,
        closes: Arc<AtomicUsize>,
    }

    impl ScriptedStream {
        fn new(
            script: Vec<Option<Result<StreamDelta, RelayError>>>,
        ) -> (Self, Arc<AtomicUsize>) {
            let closes = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    script: script.into(),
                    closes: Arc::clone(&closes),
                },
                closes,
            )
        }
    }

    #[async_trait]
    impl ChatStream for ScriptedStream {
        async fn recv(&mut self) -> Result<StreamDelta, RelayError> {
            match self.script.pop_front() {
                Some(Some(item)) => item,
                Some(None) => std::future::pending().await,
                None => Ok(StreamDelta::End),
            }
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn content(text: &str) -> Option<Result<StreamDelta, RelayError>> {
        Some(Ok(StreamDelta::Content(text.to_string())))
    }

    fn request() -> ChatRequest {
        RequestBuilder::build_stream(
            &[Message::system("You are terse."), Message::user("Say hello")],
            SamplingMode::Balance,
            2000,
            "gpt-3.5-turbo",
        )
    }

    fn expected_suffix(request: &ChatRequest) -> String {
        let tokens = TokenAccountant::default()
            .count_tokens(&request.messages, &request.model)
            .unwrap();
        stream_usage_suffix(tokens)
    }

    #[test]
    fn state_machine_allows_documented_paths() {
        use RelayState::*;
        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(Completed));
        assert!(Streaming.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Closed));
        assert!(Failed.can_transition_to(Closed));
        assert!(Closed.is_terminal());
    }

    #[test]
    fn state_machine_rejects_shortcuts() {
        use RelayState::*;
        assert!(!Idle.can_transition_to(Streaming));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Closed.can_transition_to(Idle));
        assert!(!Connecting.can_transition_to(Completed));
    }

    /// Stands in for a cold BPE load: every encode holds the thread.
    #[derive(Debug)]
    struct SlowTokenizer;

    impl Tokenizer for SlowTokenizer {
        fn encode(&self, text: &str, _model: &str) -> Result<Vec<u32>, RelayError> {
            std::thread::sleep(Duration::from_millis(100));
            Ok(text.split_whitespace().map(|_| 0).collect())
        }
    }

    fn test_client() -> TransportClient {
        crate::llm::proxy::ProxyClientFactory::new().build(None).unwrap()
    }

    #[test]
    fn abort_closes_after_failing() {
        let mut lifecycle = Lifecycle::new();
        let error = lifecycle.abort(RelayError::cancelled("early"));
        assert!(error.is_cancelled());
        assert_eq!(lifecycle.state, RelayState::Closed);

        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(RelayState::Connecting);
        lifecycle.abort(RelayError::upstream("refused"));
        assert_eq!(lifecycle.state, RelayState::Closed);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn slow_counting_does_not_stall_the_runtime() {
        let accountant = TokenAccountant::new(OverheadTable::shared(), Arc::new(SlowTokenizer));
        let relay = StreamRelay::new(Arc::new(accountant));
        let (stream, _closes) = ScriptedStream::new(vec![content("one"), content("two")]);
        let (tx, mut rx) = mpsc::channel(4);

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        relay
            .relay(&CancellationToken::new(), stream, &request(), &tx)
            .await
            .unwrap();
        ticker.abort();
        drop(tx);

        // system + user contents and roles: 4 encodes of 100ms each
        assert!(ticks.load(Ordering::SeqCst) >= 10);
        let first = rx.recv().await.unwrap();
        assert!(first.starts_with("one ("));
        assert!(first.ends_with(" tokens)"));
    }

    #[tokio::test]
    async fn relays_in_order_with_usage_on_every_chunk() {
        let (stream, closes) = ScriptedStream::new(vec![
            content("Hel"),
            content("lo"),
            content("!"),
            Some(Ok(StreamDelta::End)),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        let request = request();

        let result = StreamRelay::default()
            .relay(&CancellationToken::new(), stream, &request, &tx)
            .await;
        drop(tx);

        assert!(result.is_ok());
        let suffix = expected_suffix(&request);
        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            received.push(chunk);
        }
        assert_eq!(
            received,
            vec![
                format!("Hel{}", suffix),
                format!("lo{}", suffix),
                format!("!{}", suffix)
            ]
        );
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stream_error_fails_and_releases_once() {
        let (stream, closes) = ScriptedStream::new(vec![
            content("partial"),
            Some(Err(RelayError::upstream("stream read error"))),
        ]);
        let (tx, mut rx) = mpsc::channel(8);

        let error = StreamRelay::default()
            .relay(&CancellationToken::new(), stream, &request(), &tx)
            .await
            .unwrap_err();

        assert!(error.is_upstream());
        assert!(rx.recv().await.unwrap().starts_with("partial"));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_blocked_receive() {
        let (stream, closes) = ScriptedStream::new(vec![content("first"), None]);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let relay = StreamRelay::default();
        let request = request();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { relay.relay(&cancel, stream, &request, &tx).await })
        };

        assert!(rx.recv().await.unwrap().starts_with("first"));
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("relay did not observe cancellation")
            .unwrap();
        assert!(outcome.unwrap_err().is_cancelled());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_blocked_send() {
        let (stream, closes) = ScriptedStream::new(vec![content("a"), content("b"), content("c")]);
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let relay = StreamRelay::default();
        let request = request();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { relay.relay(&cancel, stream, &request, &tx).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("relay did not observe cancellation")
            .unwrap();
        assert!(outcome.unwrap_err().is_cancelled());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_consumer_stops_the_relay() {
        let (stream, closes) = ScriptedStream::new(vec![content("a"), content("b")]);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let error = StreamRelay::default()
            .relay(&CancellationToken::new(), stream, &request(), &tx)
            .await
            .unwrap_err();

        assert!(error.is_cancelled());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsupported_model_relays_without_annotation() {
        let (stream, _closes) = ScriptedStream::new(vec![content("ok"), Some(Ok(StreamDelta::End))]);
        let (tx, mut rx) = mpsc::channel(4);
        let request = request().with_model("llama3");

        StreamRelay::default()
            .relay(&CancellationToken::new(), stream, &request, &tx)
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn run_is_cancelled_before_connecting() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = mpsc::channel(1);
        let backend = BackendProfile::direct("sk-test", "http://127.0.0.1:9");
        let mut lifecycle = Lifecycle::new();

        let error = StreamRelay::default()
            .drive(&mut lifecycle, &cancel, request(), &backend, &test_client(), &tx)
            .await
            .unwrap_err();
        assert!(error.is_cancelled());
        assert_eq!(lifecycle.state, RelayState::Closed);
    }

    #[tokio::test]
    async fn run_without_endpoint_is_config_error() {
        let (tx, _rx) = mpsc::channel(1);
        let backend = BackendProfile::direct("sk-test", "");
        let mut lifecycle = Lifecycle::new();

        let error = StreamRelay::default()
            .drive(
                &mut lifecycle,
                &CancellationToken::new(),
                request(),
                &backend,
                &test_client(),
                &tx,
            )
            .await
            .unwrap_err();
        assert!(error.is_config());
        assert_eq!(lifecycle.state, RelayState::Closed);
    }

    #[tokio::test]
    async fn refused_connection_ends_closed() {
        let (tx, _rx) = mpsc::channel(1);
        let backend = BackendProfile::direct("sk-test", "http://127.0.0.1:9");
        let mut lifecycle = Lifecycle::new();

        let error = StreamRelay::default()
            .drive(
                &mut lifecycle,
                &CancellationToken::new(),
                request(),
                &backend,
                &test_client(),
                &tx,
            )
            .await
            .unwrap_err();
        assert!(error.is_upstream());
        assert_eq!(lifecycle.state, RelayState::Closed);
    }
}
