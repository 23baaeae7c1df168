pub mod adapter;
pub mod mock;
pub mod request;
pub mod types;

pub use adapter::{ChunkStream, CompletionResponse, OpenAiProvider, Provider};
pub use mock::{MockEvent, MockProvider, MockResponse, MockToolCall};
pub use request::build_request;
pub use types::{
    ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, FunctionSpec, ResponseFormat, ToolChoiceOption,
    ToolSpec,
};

pub use parley_core::{Error, Result};
