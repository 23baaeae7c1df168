//! Conversation data model.
//!
//! Types serialize to the chat-completions wire shape, so a transcript can be
//! shipped to a server or embedded in a share link as-is.

use serde::{Deserialize, Serialize};

use crate::error::TranscriptError;

/// The role of a turn's author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub const VALUES: &[Role] = &[Role::System, Role::User, Role::Assistant];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Next role in the system → user → assistant → system cycle
    pub fn next(self) -> Self {
        match self {
            Role::System => Role::User,
            Role::User => Role::Assistant,
            Role::Assistant => Role::System,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(crate::Error::Parse(format!("unknown role: {}", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One element of a multi-part (user-authored) content sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    #[serde(rename = "image_url")]
    Image { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::Image { image_url: ImageUrl { url: url.into() } }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ContentPart::Image { .. })
    }
}

/// Turn content: a plain string or an ordered list of parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Plain text view; parts are joined by newlines and images are skipped
    pub fn to_text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

/// Kind of a tool call. Only functions exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallKind {
    #[default]
    Function,
}

impl ToolCallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCallKind::Function => "function",
        }
    }
}

/// A function invocation requested by the assistant.
///
/// `id` is fixed once assigned; `arguments_text` only grows while the turn streams
/// and is not guaranteed to be valid JSON until the stream ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireToolCall", into = "WireToolCall")]
pub struct ToolCall {
    pub id: String,
    pub kind: ToolCallKind,
    pub function_name: String,
    pub arguments_text: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, function_name: impl Into<String>, arguments_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ToolCallKind::Function,
            function_name: function_name.into(),
            arguments_text: arguments_text.into(),
        }
    }

    /// Parse the accumulated argument text, once the turn is complete
    pub fn parsed_arguments(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.arguments_text)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default)]
    kind: ToolCallKind,
    function: WireFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

impl From<WireToolCall> for ToolCall {
    fn from(wire: WireToolCall) -> Self {
        Self { id: wire.id, kind: wire.kind, function_name: wire.function.name, arguments_text: wire.function.arguments }
    }
}

impl From<ToolCall> for WireToolCall {
    fn from(call: ToolCall) -> Self {
        Self {
            id: call.id,
            kind: call.kind,
            function: WireFunction { name: call.function_name, arguments: call.arguments_text },
        }
    }
}

/// Which state a turn is in while a response is being assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Neither content nor tool calls yet (placeholder awaiting output)
    Pending,
    Content,
    ToolCalls,
    /// Text and tool calls both present; some servers narrate before calling
    Mixed,
}

/// One conversation entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<Content>) -> Self {
        Self { role, content: Some(content.into()), tool_calls: None }
    }

    pub fn system(content: impl Into<Content>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<Content>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Placeholder assistant turn appended when a request is sent
    pub fn pending() -> Self {
        Self { role: Role::Assistant, content: None, tool_calls: None }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    pub fn text(&self) -> Option<String> {
        self.content.as_ref().map(Content::to_text)
    }

    pub fn state(&self) -> TurnState {
        match (self.content.is_some(), self.has_tool_calls()) {
            (false, false) => TurnState::Pending,
            (true, false) => TurnState::Content,
            (false, true) => TurnState::ToolCalls,
            (true, true) => TurnState::Mixed,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == TurnState::Pending
    }

    pub fn cycle_role(&mut self) {
        self.role = self.role.next();
    }

    /// Append an empty tool call for the user to fill in, returning its index
    pub fn add_tool_call(&mut self) -> usize {
        let calls = self.tool_calls.get_or_insert_with(Vec::new);
        let index = calls.len();
        calls.push(ToolCall::new(format!("tool_call_{}", index), "", ""));
        index
    }

    pub fn remove_tool_call(&mut self, index: usize) -> Result<ToolCall, TranscriptError> {
        let calls = self.tool_calls.get_or_insert_with(Vec::new);
        if index >= calls.len() {
            return Err(TranscriptError::out_of_bounds(index, calls.len()));
        }
        Ok(calls.remove(index))
    }

    pub fn set_tool_call_name(&mut self, index: usize, name: impl Into<String>) -> Result<(), TranscriptError> {
        self.tool_call_mut(index)?.function_name = name.into();
        Ok(())
    }

    pub fn set_tool_call_arguments(&mut self, index: usize, arguments: impl Into<String>) -> Result<(), TranscriptError> {
        self.tool_call_mut(index)?.arguments_text = arguments.into();
        Ok(())
    }

    fn tool_call_mut(&mut self, index: usize) -> Result<&mut ToolCall, TranscriptError> {
        let calls = self.tool_calls.get_or_insert_with(Vec::new);
        let len = calls.len();
        calls.get_mut(index).ok_or(TranscriptError::out_of_bounds(index, len))
    }

    /// Attach an empty image part, converting text content into parts.
    ///
    /// Returns false when the turn already carries an image.
    pub fn add_image_part(&mut self) -> bool {
        match self.content.take() {
            Some(Content::Parts(mut parts)) => {
                let added = !parts.iter().any(ContentPart::is_image);
                if added {
                    parts.push(ContentPart::image(""));
                }
                self.content = Some(Content::Parts(parts));
                added
            }
            Some(Content::Text(text)) => {
                self.content = Some(Content::Parts(vec![ContentPart::text(text), ContentPart::image("")]));
                true
            }
            None => {
                self.content = Some(Content::Parts(vec![ContentPart::text(""), ContentPart::image("")]));
                true
            }
        }
    }

    pub fn set_part_text(&mut self, index: usize, value: impl Into<String>) -> Result<(), TranscriptError> {
        if let ContentPart::Text { text } = self.part_mut(index)? {
            *text = value.into();
        }
        Ok(())
    }

    pub fn set_part_image_url(&mut self, index: usize, value: impl Into<String>) -> Result<(), TranscriptError> {
        if let ContentPart::Image { image_url } = self.part_mut(index)? {
            image_url.url = value.into();
        }
        Ok(())
    }

    pub fn remove_part(&mut self, index: usize) -> Result<ContentPart, TranscriptError> {
        match &mut self.content {
            Some(Content::Parts(parts)) if index < parts.len() => Ok(parts.remove(index)),
            Some(Content::Parts(parts)) => Err(TranscriptError::out_of_bounds(index, parts.len())),
            _ => Err(TranscriptError::out_of_bounds(index, 0)),
        }
    }

    fn part_mut(&mut self, index: usize) -> Result<&mut ContentPart, TranscriptError> {
        match &mut self.content {
            Some(Content::Parts(parts)) => {
                let len = parts.len();
                parts.get_mut(index).ok_or(TranscriptError::out_of_bounds(index, len))
            }
            _ => Err(TranscriptError::out_of_bounds(index, 0)),
        }
    }
}
