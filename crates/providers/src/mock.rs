use crate::adapter::{CompletionResponse, Provider};
use crate::types::ChatCompletionRequest;
use parley_core::{CompleteMessage, Error, Result, StreamChunk, ToolCall};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Scripted reply for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MockResponse {
    /// Single-shot message
    Complete {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        tool_calls: Vec<MockToolCall>,
    },
    /// Streamed reply, one chunk per `text`/`tool_call` event
    Stream { events: Vec<MockEvent> },
    /// Transport failure before any output
    Error { message: String },
    /// The request never gets an answer; only cancellation ends it
    Hang,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MockEvent {
    Text {
        text: String,
    },
    /// With `id` and `name` this opens a call; without them it continues the last one
    ToolCall {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        arguments: String,
    },
    /// Pause before the next event
    Delay {
        ms: u64,
    },
    /// Stop producing events without ending the stream
    Stall,
    /// Fail the stream mid-flight
    Error {
        message: String,
    },
}

/// Mock configuration from TOML file
#[derive(Debug, Deserialize)]
struct MockConfig {
    responses: Vec<MockResponse>,
}

/// Provider that plays back scripted responses in order, for tests and offline demos
#[derive(Debug)]
pub struct MockProvider {
    responses: Vec<MockResponse>,
    current: AtomicUsize,
    requests: Mutex<Vec<ChatCompletionRequest>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self { responses, current: AtomicUsize::new(0), requests: Mutex::new(Vec::new()) }
    }

    /// Single streamed reply made of text deltas
    pub fn streaming_text<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let events = deltas.into_iter().map(|text| MockEvent::Text { text: text.into() }).collect();
        Self::new(vec![MockResponse::Stream { events }])
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: MockConfig =
            toml::from_str(toml_str).map_err(|e| Error::Parse(format!("Failed to parse mock responses: {}", e)))?;
        Ok(Self::new(config.responses))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn next_response(&self) -> Option<MockResponse> {
        let index = self.current.fetch_add(1, Ordering::SeqCst);
        self.responses.get(index).cloned()
    }

    fn event_chunk(event: MockEvent) -> Option<StreamChunk> {
        match event {
            MockEvent::Text { text } => Some(StreamChunk::TextDelta { text }),
            MockEvent::ToolCall { id, name, arguments } => Some(StreamChunk::ToolCallDelta {
                index: None,
                kind: id.as_ref().map(|_| parley_core::ToolCallKind::Function),
                id,
                function_name: name,
                arguments_fragment: Some(arguments),
            }),
            MockEvent::Delay { .. } | MockEvent::Stall | MockEvent::Error { .. } => None,
        }
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    async fn create_completion(
        &self, request: ChatCompletionRequest, cancel: CancellationToken,
    ) -> Result<CompletionResponse> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).push(request);

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let Some(response) = self.next_response() else {
            return Err(Error::Transport(format!(
                "No more mock responses configured (available: {})",
                self.responses.len()
            )));
        };

        match response {
            MockResponse::Complete { content, tool_calls } => Ok(CompletionResponse::Complete(CompleteMessage {
                content,
                tool_calls: tool_calls.into_iter().map(|c| ToolCall::new(c.id, c.name, c.arguments)).collect(),
                finish_reason: Some("stop".to_string()),
            })),
            MockResponse::Error { message } => Err(Error::Transport(message)),
            MockResponse::Hang => {
                cancel.cancelled().await;
                Err(Error::Cancelled)
            }
            MockResponse::Stream { events } => {
                let stream = async_stream::stream! {
                    for event in events {
                        match event {
                            MockEvent::Delay { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
                            MockEvent::Stall => std::future::pending::<()>().await,
                            MockEvent::Error { message } => {
                                yield Err(Error::Transport(message));
                                return;
                            }
                            other => {
                                if let Some(chunk) = MockProvider::event_chunk(other) {
                                    yield Ok(chunk);
                                }
                            }
                        }
                    }
                };
                Ok(CompletionResponse::Stream(Box::pin(stream)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{Config, Turn};
    use tokio_stream::StreamExt;

    fn request() -> ChatCompletionRequest {
        crate::build_request(&[Turn::user("hi")], &Config::default())
    }

    async fn collect(provider: &MockProvider) -> Vec<Result<StreamChunk>> {
        match provider.create_completion(request(), CancellationToken::new()).await.unwrap() {
            CompletionResponse::Stream(stream) => stream.collect().await,
            CompletionResponse::Complete(message) => panic!("Expected stream, got {:?}", message),
        }
    }

    #[test]
    fn test_mock_response_parsing() {
        let toml = r#"
[[responses]]
type = "complete"
content = "Paris."

[[responses]]
type = "complete"
tool_calls = [{ id = "c1", name = "get_capital", arguments = '{"country":"France"}' }]

[[responses]]
type = "stream"
events = [
    { event = "text", text = "Par" },
    { event = "delay", ms = 5 },
    { event = "text", text = "is" },
]

[[responses]]
type = "error"
message = "502 Bad Gateway"

[[responses]]
type = "hang"
"#;

        let provider = MockProvider::from_toml_str(toml).unwrap();
        assert_eq!(provider.responses.len(), 5);
        assert!(matches!(provider.responses[0], MockResponse::Complete { .. }));
        assert!(matches!(provider.responses[2], MockResponse::Stream { .. }));
        assert_eq!(provider.responses[4], MockResponse::Hang);
    }

    #[test]
    fn test_mock_event_parsing() {
        let toml = r#"
[[responses]]
type = "stream"
events = [
    { event = "tool_call", id = "c1", name = "get_capital", arguments = '{"coun' },
    { event = "tool_call", arguments = 'try":"France"}' },
    { event = "stall" },
    { event = "error", message = "reset" },
]
"#;
        let provider = MockProvider::from_toml_str(toml).unwrap();
        if let MockResponse::Stream { events } = &provider.responses[0] {
            assert_eq!(events.len(), 4);
            assert!(matches!(&events[1], MockEvent::ToolCall { id: None, name: None, .. }));
            assert_eq!(events[2], MockEvent::Stall);
        } else {
            panic!("Expected Stream response");
        }
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        assert!(matches!(MockProvider::from_toml_str("[[responses]]\ntype = \"bogus\""), Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn test_stream_playback() {
        let provider = MockProvider::new(vec![MockResponse::Stream {
            events: vec![
                MockEvent::Text { text: "a".to_string() },
                MockEvent::Delay { ms: 1 },
                MockEvent::ToolCall { id: Some("c1".to_string()), name: Some("f".to_string()), arguments: "{".to_string() },
                MockEvent::ToolCall { id: None, name: None, arguments: "}".to_string() },
            ],
        }]);

        let chunks: Vec<StreamChunk> = collect(&provider).await.into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(
            chunks,
            vec![StreamChunk::text("a"), StreamChunk::open_tool_call("c1", "f", "{"), StreamChunk::tool_arguments("}")]
        );
    }

    #[tokio::test]
    async fn test_stream_error_event_ends_stream() {
        let provider = MockProvider::new(vec![MockResponse::Stream {
            events: vec![
                MockEvent::Text { text: "partial".to_string() },
                MockEvent::Error { message: "connection reset".to_string() },
                MockEvent::Text { text: "never".to_string() },
            ],
        }]);

        let items = collect(&provider).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1], Err(Error::Transport(msg)) if msg == "connection reset"));
    }

    #[tokio::test]
    async fn test_complete_and_exhaustion() {
        let provider = MockProvider::new(vec![MockResponse::Complete { content: Some("Paris.".to_string()), tool_calls: vec![] }]);

        match provider.create_completion(request(), CancellationToken::new()).await.unwrap() {
            CompletionResponse::Complete(message) => assert_eq!(message.content.as_deref(), Some("Paris.")),
            CompletionResponse::Stream(_) => panic!("Expected complete message"),
        }

        let second = provider.create_completion(request(), CancellationToken::new()).await;
        assert!(matches!(second, Err(Error::Transport(_))));
        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_hang_ends_on_cancel() {
        let provider = MockProvider::new(vec![MockResponse::Hang]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = provider.create_completion(request(), cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_streaming_text_helper() {
        let provider = MockProvider::streaming_text(["a", "b"]);
        assert_eq!(
            provider.responses,
            vec![MockResponse::Stream {
                events: vec![MockEvent::Text { text: "a".to_string() }, MockEvent::Text { text: "b".to_string() }]
            }]
        );
    }
}
