//! Server-sent-event decoding of streaming completions.

use crate::error::RelayError;
use crate::llm::backend::BackendProfile;
use crate::llm::proxy::TransportClient;
use crate::llm::relay::{ChatStream, StreamDelta};
use crate::llm::request::{error_from_response, ApiErrorDetail, ChatRequest};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::Deserialize;

/// Marker the provider sends as the final event's data.
const DONE_MARKER: &str = "[DONE]";

/// One streamed completion chunk.
#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Parses one line of an event stream.
///
/// Returns `Ok(None)` for blank lines, comments, non-data fields, and chunks
/// without choices. Every other data line yields a delta; a chunk whose delta
/// has no content (role announcements, finish markers) yields empty content.
///
/// # Errors
///
/// Returns `Upstream` if the data is not a valid chunk or carries an error.
pub fn parse_sse_line(line: &str) -> Result<Option<StreamDelta>, RelayError> {
    let line = line.trim_end_matches('\r');
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.strip_prefix(' ').unwrap_or(data);

    if data.trim() == DONE_MARKER {
        return Ok(Some(StreamDelta::End));
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(data)
        .map_err(|e| RelayError::upstream_with_cause("failed to parse stream event", e))?;

    if let Some(error) = chunk.error {
        return Err(RelayError::upstream_with_cause(
            "provider reported an error mid-stream",
            error.describe(),
        ));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .map(|choice| StreamDelta::Content(choice.delta.content.unwrap_or_default())))
}

/// A streaming completion read from an HTTP response body.
///
/// Bytes are buffered until a full line is available, so events split
/// across network reads decode correctly.
pub struct SseChatStream {
    bytes: Option<BoxStream<'static, Result<Vec<u8>, RelayError>>>,
    buffer: Vec<u8>,
    finished: bool,
}

impl std::fmt::Debug for SseChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseChatStream")
            .field("open", &self.bytes.is_some())
            .field("buffered", &self.buffer.len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl SseChatStream {
    /// Wraps a stream of raw body bytes.
    pub fn from_byte_stream<S>(bytes: S) -> Self
    where
        S: Stream<Item = Result<Vec<u8>, RelayError>> + Send + 'static,
    {
        Self {
            bytes: Some(bytes.boxed()),
            buffer: Vec::new(),
            finished: false,
        }
    }

    /// Posts `request` to `url` and opens its event stream.
    ///
    /// # Errors
    ///
    /// Returns `Upstream` if the request cannot be sent or the provider
    /// answers with a non-success status.
    pub async fn connect(
        client: &TransportClient,
        backend: &BackendProfile,
        url: &str,
        request: &ChatRequest,
    ) -> Result<Self, RelayError> {
        let response = backend
            .authorize(client.http().post(url))
            .header("accept", "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(|e| RelayError::upstream_with_cause("request failed", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let bytes = response.bytes_stream().map(|chunk| {
            chunk
                .map(|b| b.to_vec())
                .map_err(|e| RelayError::upstream_with_cause("stream read error", e))
        });
        Ok(Self::from_byte_stream(bytes))
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line[..end]).into_owned())
    }

    fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[async_trait]
impl ChatStream for SseChatStream {
    async fn recv(&mut self) -> Result<StreamDelta, RelayError> {
        loop {
            if self.finished {
                return Ok(StreamDelta::End);
            }

            if let Some(line) = self.next_line() {
                match parse_sse_line(&line) {
                    Ok(Some(delta)) => {
                        if delta == StreamDelta::End {
                            self.finished = true;
                        }
                        return Ok(delta);
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        self.finished = true;
                        return Err(e);
                    }
                }
            }

            let Some(bytes) = self.bytes.as_mut() else {
                self.finished = true;
                continue;
            };

            let next = bytes.next().await;
            match next {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    self.finished = true;
                    return Err(e);
                }
                None => {
                    // Body ended without a done marker; flush the last line.
                    self.bytes = None;
                    self.finished = true;
                    if let Some(line) = self.take_remainder() {
                        if let Some(delta) = parse_sse_line(&line)? {
                            return Ok(delta);
                        }
                    }
                }
            }
        }
    }

    fn close(&mut self) {
        self.bytes = None;
        self.buffer.clear();
        self.finished = true;
    }
}
