pub mod config;
pub mod error;
pub mod logging;
pub mod merge;
pub mod share;
pub mod store;
pub mod telemetry;
pub mod transcript;

pub use config::{
    Config, ConfigError, ConnectionConfig, LoggingConfig, SamplingSettings, ToolChoice, ToolDefinition, ToolsConfig,
};
pub use error::{Error, MalformedChunkError, Result, TranscriptError};
pub use merge::{CompleteMessage, StreamChunk, apply_chunk, apply_complete};
pub use share::ShareState;
pub use store::{SubscriptionId, TranscriptListener, TranscriptStore};
pub use telemetry::{
    Clock, ManualClock, SystemClock, TelemetryHandle, TelemetryListener, TelemetryRecorder, TelemetrySample,
};
pub use transcript::{Content, ContentPart, ImageUrl, Role, ToolCall, ToolCallKind, Turn, TurnState};
