//! Dispatch of validated chat requests and pass-through of SSE frames.

use bytes::Bytes;
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::config::Config;
use crate::error::RelayError;
use crate::sse::{data_frame, ChunkReassembler, DONE_FRAME};
use crate::upstream::{ByteStream, CompletionRequest, UpstreamClient};
use crate::web::models::{ChatMessage, ChatRequest, ChatResponse, Role};

/// Frames buffered between the upstream reader and a slow client.
pub const RELAY_CHANNEL_CAPACITY: usize = 32;

pub enum RelayOutcome {
    Complete(ChatResponse),
    Stream(ReceiverStream<Bytes>),
}

/// Build the upstream request: server system message first, then the
/// caller's conversation with any caller-supplied system messages removed.
pub fn build_completion(config: &Config, request: ChatRequest, request_id: Uuid) -> CompletionRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(ChatMessage::new(Role::System, config.system_prompt.clone()));

    let before = request.messages.len();
    messages.extend(
        request
            .messages
            .into_iter()
            .filter(|message| message.role != Role::System),
    );
    let dropped = before + 1 - messages.len();
    if dropped > 0 {
        warn!("[{request_id}] dropped {dropped} caller-supplied system message(s)");
    }

    CompletionRequest {
        model: request.model.unwrap_or_else(|| config.default_model.clone()),
        messages,
        temperature: request.temperature.unwrap_or(config.default_temperature),
        max_tokens: request.max_tokens.unwrap_or(config.default_max_tokens),
        stream: request.stream,
    }
}

/// Make the single upstream call for a request.
pub async fn dispatch(
    upstream: &dyn UpstreamClient,
    completion: &CompletionRequest,
    request_id: Uuid,
) -> Result<RelayOutcome, RelayError> {
    if completion.stream {
        let body = upstream.stream(completion).await?;
        info!("[{request_id}] upstream stream opened");
        return Ok(RelayOutcome::Stream(relay_frames(body, request_id)));
    }

    let response = upstream.complete(completion).await?.into_chat_response();
    info!(
        "[{request_id}] completion received ({} characters, {} total tokens)",
        response.message.len(),
        response.usage.total_tokens
    );
    Ok(RelayOutcome::Complete(response))
}

/// Forward an upstream SSE body as it arrives.
///
/// Reading happens on its own task feeding a bounded channel, so memory
/// stays bounded and a slow client slows the upstream read. Dropping the
/// returned stream (client gone) stops the task and releases the upstream
/// body.
pub fn relay_frames(upstream: ByteStream, request_id: Uuid) -> ReceiverStream<Bytes> {
    let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
    tokio::spawn(forward_frames(upstream, tx, request_id));
    ReceiverStream::new(rx)
}

enum Forward {
    Skipped,
    Sent,
    Done,
    Closed,
}

async fn forward_line(line: &str, tx: &mpsc::Sender<Bytes>) -> Forward {
    let Some((frame, is_done)) = data_frame(line) else {
        return Forward::Skipped;
    };
    if tx.send(Bytes::from(frame)).await.is_err() {
        return Forward::Closed;
    }
    if is_done {
        Forward::Done
    } else {
        Forward::Sent
    }
}

async fn forward_frames(mut upstream: ByteStream, tx: mpsc::Sender<Bytes>, request_id: Uuid) {
    let mut reassembler = ChunkReassembler::new();
    let mut frames = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => {
                info!("[{request_id}] client disconnected after {frames} frames; closing upstream");
                return;
            }
            next = upstream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                for line in reassembler.feed_bytes(&chunk) {
                    match forward_line(&line, &tx).await {
                        Forward::Skipped => {}
                        Forward::Sent => frames += 1,
                        Forward::Done => {
                            info!("[{request_id}] stream complete after {frames} frames");
                            return;
                        }
                        Forward::Closed => {
                            info!("[{request_id}] client disconnected after {frames} frames; closing upstream");
                            return;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                // Headers are already sent; all that is left is to stop.
                warn!("[{request_id}] upstream stream failed after {frames} frames: {e}");
                return;
            }
            None => break,
        }
    }

    // The upstream body ended cleanly, so a trailing line without a newline
    // is still a whole frame.
    if let Some(residual) = reassembler.finish() {
        match forward_line(&residual, &tx).await {
            Forward::Skipped => {}
            Forward::Sent => frames += 1,
            Forward::Done => {
                info!("[{request_id}] stream complete after {frames} frames");
                return;
            }
            Forward::Closed => return,
        }
    }

    debug!("[{request_id}] upstream ended without [DONE]; appending terminator");
    if tx.send(Bytes::from_static(DONE_FRAME.as_bytes())).await.is_ok() {
        info!("[{request_id}] stream complete after {frames} frames");
    }
}
