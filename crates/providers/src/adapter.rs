use eventsource_stream::Eventsource;
use futures::{StreamExt, stream::Stream};
use reqwest::Client as HttpClient;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::types::*;
use parley_core::{CompleteMessage, ConnectionConfig, Error, Result, StreamChunk};

/// Ordered, finite sequence of merge units; an `Err` item ends the response
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// What a provider hands back for one request
pub enum CompletionResponse {
    /// Single-shot reply
    Complete(CompleteMessage),
    /// Incremental reply
    Stream(ChunkStream),
}

impl std::fmt::Debug for CompletionResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionResponse::Complete(message) => f.debug_tuple("Complete").field(message).finish(),
            CompletionResponse::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Transport seam between the session and a chat-completions backend
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Issue a completion request.
    ///
    /// `cancel` is tripped when the caller gives up on this request; implementations
    /// should stop work and may return [`Error::Cancelled`].
    async fn create_completion(
        &self, request: ChatCompletionRequest, cancel: CancellationToken,
    ) -> Result<CompletionResponse>;
}

/// Any server speaking the OpenAI chat-completions protocol
pub struct OpenAiProvider {
    client: HttpClient,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: HttpClient::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| parley_core::config::DEFAULT_BASE_URL.to_string()),
        }
    }

    pub fn from_config(connection: &ConnectionConfig) -> Result<Self> {
        let mut builder = HttpClient::builder().connect_timeout(Duration::from_secs(10));
        if let Some(secs) = connection.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(|e| Error::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, api_key: connection.api_key.clone(), base_url: connection.base_url.clone() })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Decode one SSE `data:` payload. `None` marks the end of the stream.
    fn decode_event(data: &str) -> Result<Option<Vec<StreamChunk>>> {
        let data = data.trim();
        if data == "[DONE]" {
            return Ok(None);
        }
        if data.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let chunk: ChatCompletionChunk = serde_json::from_str(data)
            .map_err(|e| Error::Transport(format!("failed to decode stream event: {} ({})", e, data)))?;
        Ok(Some(chunk.into_chunks()))
    }
}

#[async_trait::async_trait]
impl Provider for OpenAiProvider {
    async fn create_completion(
        &self, request: ChatCompletionRequest, cancel: CancellationToken,
    ) -> Result<CompletionResponse> {
        let url = self.endpoint();
        let streaming = request.stream;
        tracing::debug!(%url, model = %request.model, messages = request.messages.len(), streaming, "sending completion request");

        let mut http_request = self.client.post(&url).header("Content-Type", "application/json").json(&request);
        if !self.api_key.is_empty() {
            http_request = http_request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = http_request.send() => result.map_err(|e| Error::Transport(format!("request failed: {}", e)))?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("{} - {}", status, body)));
        }

        if !streaming {
            let completion = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                body = response.json::<ChatCompletion>() => {
                    body.map_err(|e| Error::Transport(format!("failed to decode completion: {}", e)))?
                }
            };
            return Ok(CompletionResponse::Complete(completion.into_message()?));
        }

        let stream = async_stream::stream! {
            let eventsource = response.bytes_stream().eventsource();
            tokio::pin!(eventsource);

            while let Some(event_result) = eventsource.next().await {
                if cancel.is_cancelled() {
                    yield Err(Error::Cancelled);
                    return;
                }

                let event = match event_result {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(Error::Transport(format!("SSE error: {}", e)));
                        return;
                    }
                };

                match OpenAiProvider::decode_event(&event.data) {
                    Ok(Some(chunks)) => {
                        for chunk in chunks {
                            yield Ok(chunk);
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            tracing::debug!("event stream closed without [DONE]");
        };

        Ok(CompletionResponse::Stream(Box::pin(stream)))
    }
}
