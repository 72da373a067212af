//! Async consumer of the chat relay.
//!
//! [`decode_stream`] is the transport-independent core: it turns any stream
//! of byte chunks into content deltas. [`ChatClient`] wires it to reqwest.

use bytes::Bytes;
use futures_util::stream::{self, AbortHandle, Abortable, BoxStream, Stream, StreamExt};
use log::{debug, warn};
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::sse::{ChunkReassembler, EventStreamDecoder};
use crate::web::models::{ChatRequest, ChatResponse};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("stream interrupted: {0}")]
    Stream(String),
}

/// Counters describing how a stream was consumed.
#[derive(Debug, Default)]
pub struct StreamStats {
    skipped_frames: AtomicUsize,
    completed: AtomicBool,
    truncated: AtomicBool,
}

impl StreamStats {
    /// Malformed frames dropped by the decoder.
    pub fn skipped_frames(&self) -> usize {
        self.skipped_frames.load(Ordering::Relaxed)
    }

    /// The `[DONE]` terminator was received.
    pub fn completed(&self) -> bool {
        self.completed.load(Ordering::Relaxed)
    }

    /// The body ended without a terminator or with an unterminated line.
    pub fn truncated(&self) -> bool {
        self.truncated.load(Ordering::Relaxed)
    }
}

struct DecodeState<S> {
    source: S,
    reassembler: ChunkReassembler,
    decoder: EventStreamDecoder,
    pending: VecDeque<String>,
    stats: Arc<StreamStats>,
    finished: bool,
}

impl<S> DecodeState<S> {
    fn push_lines(&mut self, lines: Vec<String>) {
        for line in lines {
            if let Some(delta) = self.decoder.decode(&line) {
                self.pending.push_back(delta);
            }
        }
        self.stats
            .skipped_frames
            .store(self.decoder.skipped_frames(), Ordering::Relaxed);

        if self.decoder.is_done() {
            self.stats.completed.store(true, Ordering::Relaxed);
            self.finish();
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        let reassembler = std::mem::take(&mut self.reassembler);
        // Bytes after the terminator are not part of the answer.
        if !self.decoder.is_done() {
            reassembler.finish();
            self.stats.truncated.store(true, Ordering::Relaxed);
        }
    }
}

/// Decode a raw SSE body into the sequence of content deltas it carries.
///
/// Deltas come out in arrival order no matter how the body was chunked.
/// Reading stops at `[DONE]`; a transport error is yielded once and ends
/// the stream.
pub fn decode_stream<S, E>(
    source: S,
    stats: Arc<StreamStats>,
) -> BoxStream<'static, Result<String, ClientError>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = DecodeState {
        source: Box::pin(source),
        reassembler: ChunkReassembler::new(),
        decoder: EventStreamDecoder::new(),
        pending: VecDeque::new(),
        stats,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(delta) = state.pending.pop_front() {
                return Some((Ok(delta), state));
            }
            if state.finished {
                return None;
            }

            match state.source.next().await {
                Some(Ok(chunk)) => {
                    let lines = state.reassembler.feed_bytes(&chunk);
                    state.push_lines(lines);
                }
                Some(Err(e)) => {
                    state.finish();
                    return Some((Err(ClientError::Stream(e.to_string())), state));
                }
                None => {
                    state.finish();
                    if !state.stats.completed() {
                        warn!("stream ended before the completion marker");
                    }
                }
            }
        }
    })
    .boxed()
}

/// A live stream of content deltas that can be cancelled from elsewhere.
///
/// [`DeltaStream::abort`] drops the body and the reassembly buffer at once.
/// Cancelling through an [`AbortHandle`] from another task stops further
/// deltas immediately; the buffer is released when the stream is dropped.
pub struct DeltaStream {
    inner: Option<Abortable<BoxStream<'static, Result<String, ClientError>>>>,
    handle: AbortHandle,
    stats: Arc<StreamStats>,
}

impl fmt::Debug for DeltaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaStream")
            .field("aborted", &self.handle.is_aborted())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl DeltaStream {
    pub fn new<S, E>(source: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let stats = Arc::new(StreamStats::default());
        let (inner, handle) = stream::abortable(decode_stream(source, stats.clone()));
        Self {
            inner: Some(inner),
            handle,
            stats,
        }
    }

    pub fn abort(&mut self) {
        debug!("aborting delta stream");
        self.handle.abort();
        self.inner = None;
    }

    /// Handle for cancelling the stream from another task.
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    /// Drain the stream, appending every delta to one display buffer.
    pub async fn collect_text(mut self) -> Result<String, ClientError> {
        let mut text = String::new();
        while let Some(delta) = self.next().await {
            text.push_str(&delta?);
        }
        Ok(text)
    }
}

impl Stream for DeltaStream {
    type Item = Result<String, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_next(cx),
            None => Poll::Ready(None),
        }
    }
}

/// HTTP client for `/api/chat`.
#[derive(Debug, Clone)]
pub struct ChatClient {
    base_url: String,
    http: reqwest::Client,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    /// Single-shot chat. The `stream` flag on `request` is ignored.
    pub async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError> {
        let request = ChatRequest {
            stream: false,
            ..request.clone()
        };
        let response = self.http.post(self.chat_url()).json(&request).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Streaming chat. Resolves once the server has accepted the request.
    pub async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream, ClientError> {
        let request = ChatRequest {
            stream: true,
            ..request.clone()
        };
        let response = self.http.post(self.chat_url()).json(&request).send().await?;
        let response = check_status(response).await?;
        Ok(DeltaStream::new(response.bytes_stream()))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body: serde_json::Value = response.json().await.unwrap_or_default();
    let message = body
        .get("error")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("request failed")
        .to_string();
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}
