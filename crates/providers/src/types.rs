use parley_core::{CompleteMessage, Error, Result, StreamChunk, ToolCall, ToolCallKind, ToolChoice, ToolDefinition, Turn};
use serde::{Deserialize, Serialize};

/// Body of a `POST /chat/completions` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Turn>,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoiceOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

/// Tool entry in the request's `tools` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: ToolCallKind,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

impl From<&ToolDefinition> for ToolSpec {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            kind: ToolCallKind::Function,
            function: FunctionSpec {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.parameters.clone(),
            },
        }
    }
}

/// Wire form of `tool_choice`: a mode string or a named function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoiceOption {
    Mode(String),
    Function {
        #[serde(rename = "type")]
        kind: ToolCallKind,
        function: FunctionName,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionName {
    pub name: String,
}

impl From<&ToolChoice> for ToolChoiceOption {
    fn from(choice: &ToolChoice) -> Self {
        match choice {
            ToolChoice::Auto => ToolChoiceOption::Mode("auto".to_string()),
            ToolChoice::None => ToolChoiceOption::Mode("none".to_string()),
            ToolChoice::Function(name) => ToolChoiceOption::Function {
                kind: ToolCallKind::Function,
                function: FunctionName { name: name.clone() },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self { kind: "json_object".to_string() }
    }
}

/// Non-streamed response body
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatCompletion {
    /// Take the first choice as the assistant's message
    pub fn into_message(self) -> Result<CompleteMessage> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Transport("completion response has no choices".to_string()))?;

        Ok(CompleteMessage {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
            finish_reason: choice.finish_reason,
        })
    }
}

/// One SSE `data:` payload of a streamed response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallFragment {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<ToolCallKind>,
    #[serde(default)]
    pub function: Option<FunctionFragment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionFragment {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

impl ChatCompletionChunk {
    /// Split the first choice's delta into merge units.
    ///
    /// Text comes first, then one unit per tool-call entry. Role-only and
    /// finish-only deltas yield nothing.
    pub fn into_chunks(self) -> Vec<StreamChunk> {
        let Some(choice) = self.choices.into_iter().next() else {
            return Vec::new();
        };
        let delta = choice.delta;
        let mut chunks = Vec::new();

        if let Some(text) = delta.content
            && !text.is_empty()
        {
            chunks.push(StreamChunk::TextDelta { text });
        }

        for fragment in delta.tool_calls.unwrap_or_default() {
            let (function_name, arguments_fragment) = match fragment.function {
                Some(function) => (function.name, function.arguments),
                None => (None, None),
            };
            chunks.push(StreamChunk::ToolCallDelta {
                index: fragment.index,
                id: fragment.id,
                kind: fragment.kind,
                function_name,
                arguments_fragment,
            });
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_spec_from_definition() {
        let def = ToolDefinition::new("get_capital", "Look up a capital", serde_json::json!({"type": "object"}));
        let json = serde_json::to_value(ToolSpec::from(&def)).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "get_capital");
        assert_eq!(json["function"]["description"], "Look up a capital");
        assert_eq!(json["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_tool_choice_wire_forms() {
        let none = serde_json::to_value(ToolChoiceOption::from(&ToolChoice::None)).unwrap();
        assert_eq!(none, serde_json::json!("none"));

        let named = serde_json::to_value(ToolChoiceOption::from(&ToolChoice::Function("f".to_string()))).unwrap();
        assert_eq!(named, serde_json::json!({"type": "function", "function": {"name": "f"}}));
    }

    #[test]
    fn test_completion_into_message() {
        let body = r#"{
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{"id": "c1", "type": "function", "function": {"name": "get_capital", "arguments": "{\"country\":\"France\"}"}}]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let message = serde_json::from_str::<ChatCompletion>(body).unwrap().into_message().unwrap();
        assert!(message.content.is_none());
        assert_eq!(message.tool_calls, vec![ToolCall::new("c1", "get_capital", r#"{"country":"France"}"#)]);
        assert_eq!(message.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_completion_without_choices() {
        let completion: ChatCompletion = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(completion.into_message(), Err(Error::Transport(_))));
    }

    #[test]
    fn test_chunk_with_text() {
        let chunk: ChatCompletionChunk = serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap();
        assert_eq!(chunk.into_chunks(), vec![StreamChunk::text("Hel")]);
    }

    #[test]
    fn test_role_only_and_finish_only_chunks_are_empty() {
        let role: ChatCompletionChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#).unwrap();
        assert!(role.into_chunks().is_empty());

        let finish: ChatCompletionChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#).unwrap();
        assert!(finish.into_chunks().is_empty());

        let usage: ChatCompletionChunk = serde_json::from_str(r#"{"choices":[],"usage":{"total_tokens":9}}"#).unwrap();
        assert!(usage.into_chunks().is_empty());
    }

    #[test]
    fn test_every_tool_call_entry_becomes_a_chunk() {
        let body = r#"{"choices":[{"delta":{"tool_calls":[
            {"index":0,"id":"c1","type":"function","function":{"name":"a","arguments":""}},
            {"index":1,"id":"c2","type":"function","function":{"name":"b","arguments":"{}"}}
        ]}}]}"#;
        let chunks = serde_json::from_str::<ChatCompletionChunk>(body).unwrap().into_chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[1],
            StreamChunk::ToolCallDelta {
                index: Some(1),
                id: Some("c2".to_string()),
                kind: Some(ToolCallKind::Function),
                function_name: Some("b".to_string()),
                arguments_fragment: Some("{}".to_string()),
            }
        );
    }

    #[test]
    fn test_continuation_fragment() {
        let body = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"try\":"}}]}}]}"#;
        let chunks = serde_json::from_str::<ChatCompletionChunk>(body).unwrap().into_chunks();
        assert_eq!(
            chunks,
            vec![StreamChunk::ToolCallDelta {
                index: Some(0),
                id: None,
                kind: None,
                function_name: None,
                arguments_fragment: Some("try\":".to_string()),
            }]
        );
    }

    #[test]
    fn test_request_omits_unset_fields() {
        let request = ChatCompletionRequest {
            model: "m".to_string(),
            messages: vec![Turn::user("hi")],
            temperature: 0.5,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            seed: None,
            max_tokens: None,
            stop: None,
            stream: true,
            tools: None,
            tool_choice: None,
            response_format: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        let object = json.as_object().unwrap();
        for key in ["seed", "max_tokens", "stop", "tools", "tool_choice", "response_format"] {
            assert!(!object.contains_key(key), "{} should be omitted", key);
        }
        assert_eq!(json["messages"][0], serde_json::json!({"role": "user", "content": "hi"}));
    }
}
