use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use log::{debug, info};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::error::{RelayError, GENERIC_UPSTREAM_ERROR};
use crate::web::models::{ChatMessage, ChatResponse, Usage};

/// Raw body of a streaming completion, chunked however the network delivers it.
pub type ByteStream = BoxStream<'static, Result<Bytes, RelayError>>;

/// Request sent to the upstream chat-completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stream: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub message: Option<CompletionMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl CompletionResponse {
    /// Reduce to the browser-facing shape. A missing first choice or content
    /// becomes an empty message.
    pub fn into_chat_response(self) -> ChatResponse {
        let message = self
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default();
        ChatResponse {
            message,
            model: self.model,
            usage: self.usage,
        }
    }
}

/// Access to the third-party completion provider.
///
/// Handlers only see this trait so tests can substitute the network.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Single-shot completion.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, RelayError>;

    /// Streaming completion. Resolves once the upstream has accepted the
    /// request; the body is then read lazily.
    async fn stream(&self, request: &CompletionRequest) -> Result<ByteStream, RelayError>;

    /// The provider's model listing, as returned.
    async fn list_models(&self) -> Result<Value, RelayError>;
}

/// `UpstreamClient` over HTTP with reqwest.
pub struct HttpUpstream {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpUpstream {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        info!("Using upstream completion API at: {}", config.upstream_base_url);

        let client = Client::builder()
            .connect_timeout(config.upstream_timeout)
            .build()?;

        Ok(Self {
            base_url: config.upstream_base_url.clone(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn post_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<reqwest::Response, RelayError> {
        let url = format!("{}/chat/completions", self.base_url);

        info!(
            "Sending request to upstream (model: {}, messages: {}, stream: {})",
            request.model,
            request.messages.len(),
            request.stream
        );

        let response = self
            .authorized(self.client.post(&url))
            .json(request)
            .send()
            .await
            .map_err(network_error)?;

        ensure_success(response).await
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, RelayError> {
        let response = self.post_completion(request).await?;
        let body = response.bytes().await.map_err(network_error)?;
        debug!("Upstream completion body: {} bytes", body.len());

        serde_json::from_slice(&body)
            .map_err(|e| RelayError::Internal(format!("invalid completion body: {e}")))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ByteStream, RelayError> {
        let response = self.post_completion(request).await?;
        Ok(response.bytes_stream().map(|chunk| chunk.map_err(network_error)).boxed())
    }

    async fn list_models(&self) -> Result<Value, RelayError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(network_error)?;
        let response = ensure_success(response).await?;

        response
            .json()
            .await
            .map_err(|e| RelayError::Internal(format!("invalid model listing: {e}")))
    }
}

fn network_error(err: reqwest::Error) -> RelayError {
    RelayError::UpstreamUnreachable(err.to_string())
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RelayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(upstream_error(status, &body))
}

/// Convert a non-success upstream reply into an error, keeping its status
/// and pulling the message out of the structured error body when there is one.
pub fn upstream_error(status: StatusCode, body: &str) -> RelayError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|error| {
            error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
        })
        .filter(|message| !message.trim().is_empty())
        .unwrap_or(GENERIC_UPSTREAM_ERROR)
        .to_string();

    RelayError::UpstreamError {
        status: status.as_u16(),
        message,
    }
}
