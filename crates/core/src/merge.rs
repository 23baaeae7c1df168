//! Delta merger: folds one incoming unit of a response into the turn being assembled.
//!
//! Everything here is pure. The functions take the current turn by reference and
//! return the next one, so the stream consumer can hand them to
//! [`TranscriptStore::update_last`](crate::store::TranscriptStore::update_last).

use serde::{Deserialize, Serialize};

use crate::error::MalformedChunkError;
use crate::transcript::{Content, Role, ToolCall, ToolCallKind, Turn};

/// One incremental unit of a streamed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "chunk", rename_all = "snake_case")]
pub enum StreamChunk {
    TextDelta {
        text: String,
    },
    /// Partial update to a tool call.
    ///
    /// A previously unseen `id` opens a new call; no `id` continues the last call.
    /// `index` is advisory only: calls stream sequentially, never interleaved.
    ToolCallDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<ToolCallKind>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        function_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments_fragment: Option<String>,
    },
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    /// Chunk that opens a tool call
    pub fn open_tool_call(id: impl Into<String>, function_name: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self::ToolCallDelta {
            index: None,
            id: Some(id.into()),
            kind: Some(ToolCallKind::Function),
            function_name: Some(function_name.into()),
            arguments_fragment: Some(fragment.into()),
        }
    }

    /// Chunk that appends argument text to the last open tool call
    pub fn tool_arguments(fragment: impl Into<String>) -> Self {
        Self::ToolCallDelta {
            index: None,
            id: None,
            kind: None,
            function_name: None,
            arguments_fragment: Some(fragment.into()),
        }
    }
}

/// A full, non-streamed assistant message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Fold one chunk into `turn`, producing the next version of the turn
pub fn apply_chunk(turn: &Turn, chunk: &StreamChunk) -> Result<Turn, MalformedChunkError> {
    match chunk {
        StreamChunk::TextDelta { text } => Ok(apply_text(turn, text)),
        StreamChunk::ToolCallDelta { id, kind, function_name, arguments_fragment, .. } => apply_tool_call(
            turn,
            id.as_deref(),
            *kind,
            function_name.as_deref(),
            arguments_fragment.as_deref(),
        ),
    }
}

fn apply_text(turn: &Turn, text: &str) -> Turn {
    let mut next = turn.clone();
    match &mut next.content {
        None => next.content = Some(Content::Text(text.to_string())),
        Some(Content::Text(existing)) => existing.push_str(text),
        Some(Content::Parts(_)) => {
            tracing::warn!(
                role = %turn.role,
                fragment_len = text.len(),
                "text delta targeted a multi-part turn; ignoring"
            );
        }
    }
    next
}

fn apply_tool_call(
    turn: &Turn, id: Option<&str>, kind: Option<ToolCallKind>, function_name: Option<&str>, fragment: Option<&str>,
) -> Result<Turn, MalformedChunkError> {
    let mut next = turn.clone();
    let calls = next.tool_calls.get_or_insert_with(Vec::new);

    if let Some(id) = id {
        let known = calls.iter().any(|call| call.id == id);
        if !known {
            let name = function_name.ok_or_else(|| MalformedChunkError::MissingFunctionName { id: id.to_string() })?;
            calls.push(ToolCall {
                id: id.to_string(),
                kind: kind.unwrap_or_default(),
                function_name: name.to_string(),
                arguments_text: fragment.unwrap_or_default().to_string(),
            });
            return Ok(next);
        }

        if function_name.is_some() {
            tracing::debug!(id, "re-delivered tool call open event; ignoring");
            return Ok(turn.clone());
        }
    }

    let last = calls.last_mut().ok_or(MalformedChunkError::NoOpenToolCall)?;
    last.arguments_text.push_str(fragment.unwrap_or_default());
    Ok(next)
}

/// Replace the pending turn with a complete, non-streamed message
pub fn apply_complete(turn: &Turn, message: CompleteMessage) -> Turn {
    if !turn.is_pending() {
        tracing::debug!(state = ?turn.state(), "single-shot response replaces a non-pending turn");
    }
    Turn {
        role: Role::Assistant,
        content: message.content.filter(|text| !text.is_empty()).map(Content::Text),
        tool_calls: Some(message.tool_calls).filter(|calls| !calls.is_empty()),
    }
}
