use thiserror::Error;

/// Result type alias for parley-core
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Parley playground engine
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error for file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A streamed tool-call delta violated the protocol
    #[error("malformed chunk: {0}")]
    MalformedChunk(#[from] MalformedChunkError),

    /// Transcript invariant violation
    #[error("transcript error: {0}")]
    Transcript(#[from] TranscriptError),

    /// Failure reported by the transport collaborator (network, server, wire decoding)
    #[error("transport error: {0}")]
    Transport(String),

    /// The in-flight request was cancelled
    #[error("request cancelled")]
    Cancelled,

    /// A request is already in flight for this session
    #[error("a request is already in flight")]
    RequestInFlight,

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Parse/serialization errors
    #[error("parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Whether this error is the expected result of a cancellation rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

/// Protocol violations in a tool-call delta. Fatal to the current request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedChunkError {
    /// A chunk opened a new tool call without naming the function
    #[error("tool call '{id}' opened without a function name")]
    MissingFunctionName { id: String },

    /// A continuation chunk arrived while the turn has no tool call to continue
    #[error("tool call continuation with no open tool call")]
    NoOpenToolCall,
}

/// Transcript store errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranscriptError {
    /// The operation needs a last turn but the transcript is empty
    #[error("transcript is empty")]
    Empty,

    /// Index outside the transcript (or turn) bounds
    #[error("index {index} out of bounds (len {len})")]
    OutOfBounds { index: usize, len: usize },
}

impl TranscriptError {
    pub fn out_of_bounds(index: usize, len: usize) -> Self {
        Self::OutOfBounds { index, len }
    }
}
