//! Share links.
//!
//! A playground state (transcript, tools, tool choice and sampling settings) is
//! exported as URL query parameters holding JSON. Only values that differ from
//! the defaults are written, so a fresh state produces a bare link.
//!
//! The JSON follows the web playground's link format: settings use camelCase
//! keys with `-1` for an unset `seed`/`maxTokens`, and tools and tool choice use
//! the chat-completions wire shapes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
pub use url::Url;

use crate::Error;
use crate::config::{SamplingSettings, ToolChoice, ToolDefinition, default_tool_parameters};
use crate::error::Result;
use crate::transcript::Turn;

const MESSAGES_PARAM: &str = "messages";
const TOOLS_PARAM: &str = "tools";
const TOOL_CHOICE_PARAM: &str = "tool_choice";
const SETTINGS_PARAM: &str = "settings";

/// Stands in for "not set" in numeric link settings
const UNSET: i64 = -1;

/// Everything a share link carries
#[derive(Debug, Clone, PartialEq)]
pub struct ShareState {
    pub messages: Vec<Turn>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub settings: SamplingSettings,
}

impl ShareState {
    /// The starting transcript of a new playground: a system prompt and an empty user turn
    pub fn default_messages() -> Vec<Turn> {
        vec![Turn::system("You are a helpful assistant"), Turn::user("")]
    }
}

impl Default for ShareState {
    fn default() -> Self {
        Self {
            messages: Self::default_messages(),
            tools: Vec::new(),
            tool_choice: ToolChoice::default(),
            settings: SamplingSettings::default(),
        }
    }
}

/// Build a share link by appending the non-default parts of `state` to `base`.
///
/// Any existing query on `base` is replaced.
pub fn encode(base: &Url, state: &ShareState) -> Result<Url> {
    let defaults = ShareState::default();
    let mut url = base.clone();
    url.set_query(None);

    let mut params = Vec::new();
    if state.messages != defaults.messages {
        params.push((MESSAGES_PARAM, serde_json::to_string(&state.messages)?));
    }
    if state.tools != defaults.tools {
        let tools: Vec<LinkTool> = state.tools.iter().map(LinkTool::from).collect();
        params.push((TOOLS_PARAM, serde_json::to_string(&tools)?));
    }
    if state.tool_choice != defaults.tool_choice {
        params.push((TOOL_CHOICE_PARAM, serde_json::to_string(&LinkToolChoice::from(&state.tool_choice))?));
    }
    if state.settings != defaults.settings {
        params.push((SETTINGS_PARAM, serde_json::to_string(&LinkSettings::from(&state.settings))?));
    }

    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
    Ok(url)
}

/// Restore a state from a share link.
///
/// Fails only when `link` is not a URL. A parameter that is missing or does not
/// parse falls back to its default; `settings` may be partial and is merged over
/// the default settings.
pub fn decode(link: &str) -> Result<ShareState> {
    let url = Url::parse(link.trim()).map_err(|e| Error::Parse(format!("invalid share link: {}", e)))?;
    Ok(decode_url(&url))
}

pub fn decode_url(url: &Url) -> ShareState {
    let defaults = ShareState::default();
    let param = |name: &str| url.query_pairs().find(|(key, _)| key == name).map(|(_, value)| value.into_owned());

    let tools: Option<Vec<LinkTool>> = parse_param(TOOLS_PARAM, param(TOOLS_PARAM));
    let tool_choice: Option<LinkToolChoice> = parse_param(TOOL_CHOICE_PARAM, param(TOOL_CHOICE_PARAM));
    let settings: Option<LinkSettings> = parse_param(SETTINGS_PARAM, param(SETTINGS_PARAM));

    ShareState {
        messages: parse_param(MESSAGES_PARAM, param(MESSAGES_PARAM)).unwrap_or(defaults.messages),
        tools: tools.map(|tools| tools.into_iter().map(ToolDefinition::from).collect()).unwrap_or(defaults.tools),
        tool_choice: tool_choice.map(ToolChoice::from).unwrap_or(defaults.tool_choice),
        settings: settings.map(SamplingSettings::from).unwrap_or(defaults.settings),
    }
}

fn parse_param<T: DeserializeOwned>(name: &str, raw: Option<String>) -> Option<T> {
    match serde_json::from_str(&raw?) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(param = name, error = %e, "ignoring unparseable share link parameter");
            None
        }
    }
}

/// `settings` as the web playground writes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LinkSettings {
    model: String,
    seed: i64,
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    max_tokens: i64,
    stop: Vec<String>,
    json_mode: bool,
    stream: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self::from(&SamplingSettings::default())
    }
}

impl From<&SamplingSettings> for LinkSettings {
    fn from(settings: &SamplingSettings) -> Self {
        Self {
            model: settings.model.clone(),
            seed: settings.seed.unwrap_or(UNSET),
            temperature: settings.temperature,
            top_p: settings.top_p,
            frequency_penalty: settings.frequency_penalty,
            presence_penalty: settings.presence_penalty,
            max_tokens: settings.max_tokens.map(i64::from).unwrap_or(UNSET),
            stop: settings.stop.clone(),
            json_mode: settings.json_mode,
            stream: settings.stream,
        }
    }
}

impl From<LinkSettings> for SamplingSettings {
    fn from(link: LinkSettings) -> Self {
        Self {
            model: link.model,
            seed: (link.seed >= 0).then_some(link.seed),
            temperature: link.temperature,
            top_p: link.top_p,
            frequency_penalty: link.frequency_penalty,
            presence_penalty: link.presence_penalty,
            max_tokens: u32::try_from(link.max_tokens).ok(),
            stop: link.stop,
            json_mode: link.json_mode,
            stream: link.stream,
        }
    }
}

/// `{"type":"function","function":{...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinkTool {
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: LinkFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinkFunction {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<&ToolDefinition> for LinkTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            kind: function_type(),
            function: LinkFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: Some(tool.parameters.clone()),
            },
        }
    }
}

impl From<LinkTool> for ToolDefinition {
    fn from(tool: LinkTool) -> Self {
        Self {
            name: tool.function.name,
            description: tool.function.description,
            parameters: tool.function.parameters.unwrap_or_else(default_tool_parameters),
        }
    }
}

/// `"auto"`, `"none"` or `{"type":"function","function":{"name":..}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum LinkToolChoice {
    Mode(String),
    Function {
        #[serde(rename = "type", default = "function_type")]
        kind: String,
        function: LinkFunctionName,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinkFunctionName {
    name: String,
}

impl From<&ToolChoice> for LinkToolChoice {
    fn from(choice: &ToolChoice) -> Self {
        match choice {
            ToolChoice::Auto => Self::Mode("auto".to_string()),
            ToolChoice::None => Self::Mode("none".to_string()),
            ToolChoice::Function(name) => {
                Self::Function { kind: function_type(), function: LinkFunctionName { name: name.clone() } }
            }
        }
    }
}

impl From<LinkToolChoice> for ToolChoice {
    fn from(choice: LinkToolChoice) -> Self {
        match choice {
            LinkToolChoice::Mode(mode) if mode == "none" => ToolChoice::None,
            LinkToolChoice::Mode(mode) => {
                if mode != "auto" {
                    tracing::warn!(%mode, "unsupported tool choice in share link; using auto");
                }
                ToolChoice::Auto
            }
            LinkToolChoice::Function { function, .. } => ToolChoice::Function(function.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{ContentPart, ToolCall};

    fn base() -> Url {
        Url::parse("https://playground.example.com/").unwrap()
    }

    #[test]
    fn test_default_state_has_no_query() {
        let url = encode(&base(), &ShareState::default()).unwrap();
        assert_eq!(url.query(), None);
        assert_eq!(decode(url.as_str()).unwrap(), ShareState::default());
    }

    #[test]
    fn test_only_changed_params_are_written() {
        let mut state = ShareState::default();
        state.settings.temperature = 1.2;

        let url = encode(&base(), &state).unwrap();
        let keys: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        assert_eq!(keys, vec!["settings".to_string()]);
    }

    #[test]
    fn test_full_state_survives_link() {
        let state = ShareState {
            messages: vec![
                Turn::system("Be terse"),
                Turn::user(crate::transcript::Content::Parts(vec![
                    ContentPart::text("What does this say?"),
                    ContentPart::image("https://example.com/a.png?x=1&y=2"),
                ])),
                Turn::pending().with_tool_calls(vec![ToolCall::new("c1", "ocr", r#"{"lang":"en"}"#)]),
            ],
            tools: vec![ToolDefinition::new("ocr", "Read text", serde_json::json!({"type": "object"}))],
            tool_choice: ToolChoice::Function("ocr".to_string()),
            settings: SamplingSettings { seed: Some(11), stream: false, ..Default::default() },
        };

        let url = encode(&base(), &state).unwrap();
        assert_eq!(decode(url.as_str()).unwrap(), state);
    }

    #[test]
    fn test_existing_query_is_replaced() {
        let base = Url::parse("https://playground.example.com/?messages=stale").unwrap();
        let url = encode(&base, &ShareState::default()).unwrap();
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_bad_param_falls_back_to_default() {
        let link = "https://playground.example.com/?messages=%5Bnot-json&tool_choice=%22none%22";
        let state = decode(link).unwrap();
        assert_eq!(state.messages, ShareState::default_messages());
        assert_eq!(state.tool_choice, ToolChoice::None);
    }

    #[test]
    fn test_partial_settings_merge_over_defaults() {
        let mut url = base();
        url.query_pairs_mut().append_pair("settings", r#"{"model":"llama-3","maxTokens":64,"topP":0.3}"#);

        let state = decode_url(&url);
        assert_eq!(state.settings.model, "llama-3");
        assert_eq!(state.settings.max_tokens, Some(64));
        assert_eq!(state.settings.top_p, 0.3);
        assert_eq!(state.settings.temperature, 0.5);
        assert!(state.settings.stream);
    }

    #[test]
    fn test_web_playground_link() {
        let mut url = base();
        url.query_pairs_mut()
            .append_pair(
                "settings",
                r#"{"model":"gpt-4","seed":-1,"temperature":0.9,"topP":1,"frequencyPenalty":0,"presencePenalty":0.5,"maxTokens":-1,"stop":["END"],"jsonMode":true,"stream":false}"#,
            )
            .append_pair(
                "tools",
                r#"[{"type":"function","function":{"name":"get_capital","description":"Look up a capital","parameters":{"type":"object","properties":{"country":{"type":"string"}}}}}]"#,
            )
            .append_pair("tool_choice", r#"{"type":"function","function":{"name":"get_capital"}}"#);

        let state = decode_url(&url);
        assert_eq!(state.settings.model, "gpt-4");
        assert_eq!(state.settings.temperature, 0.9);
        assert_eq!(state.settings.presence_penalty, 0.5);
        assert_eq!(state.settings.seed, None);
        assert_eq!(state.settings.max_tokens, None);
        assert_eq!(state.settings.stop, vec!["END".to_string()]);
        assert!(state.settings.json_mode);
        assert!(!state.settings.stream);

        assert_eq!(state.tools.len(), 1);
        assert_eq!(state.tools[0].name, "get_capital");
        assert_eq!(state.tools[0].description.as_deref(), Some("Look up a capital"));
        assert_eq!(state.tools[0].parameters["properties"]["country"]["type"], "string");
        assert_eq!(state.tool_choice, ToolChoice::Function("get_capital".to_string()));
    }

    #[test]
    fn test_link_uses_web_playground_shapes() {
        let state = ShareState {
            tools: vec![ToolDefinition::new("f", "does f", serde_json::json!({"type": "object"}))],
            tool_choice: ToolChoice::None,
            settings: SamplingSettings { max_tokens: Some(64), ..Default::default() },
            ..Default::default()
        };
        let url = encode(&base(), &state).unwrap();
        let param = |name: &str| {
            let raw = url.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v.into_owned()).unwrap();
            serde_json::from_str::<serde_json::Value>(&raw).unwrap()
        };

        let settings = param("settings");
        assert_eq!(settings["maxTokens"], 64);
        assert_eq!(settings["seed"], -1);
        assert_eq!(settings["topP"], 1.0);
        assert_eq!(param("tools")[0]["type"], "function");
        assert_eq!(param("tools")[0]["function"]["name"], "f");
        assert_eq!(param("tool_choice"), "none");
    }

    #[test]
    fn test_not_a_url() {
        assert!(matches!(decode("definitely not a link"), Err(Error::Parse(_))));
    }
}
