//! Request builder: maps a transcript snapshot and configuration onto the wire request.

use parley_core::{Config, ToolChoice, Turn};

use crate::types::{ChatCompletionRequest, ResponseFormat, ToolChoiceOption, ToolSpec};

/// Build a chat-completions request from `turns` and `config`.
///
/// Pending placeholder turns are dropped. Optional parameters are left out
/// unless they carry information: `tools` when none are defined, `tool_choice`
/// when it is `auto` or there are no tools, `seed`/`max_tokens` when unset and
/// `stop` when empty.
pub fn build_request(turns: &[Turn], config: &Config) -> ChatCompletionRequest {
    let settings = &config.sampling;
    let tools = &config.tools;

    let messages: Vec<Turn> = turns.iter().filter(|turn| !turn.is_pending()).cloned().collect();

    let tool_specs = (!tools.definitions.is_empty()).then(|| tools.definitions.iter().map(ToolSpec::from).collect());
    let tool_choice = match &tools.tool_choice {
        ToolChoice::Auto => None,
        _ if tools.definitions.is_empty() => None,
        choice => Some(ToolChoiceOption::from(choice)),
    };

    ChatCompletionRequest {
        model: settings.model.clone(),
        messages,
        temperature: settings.temperature,
        top_p: settings.top_p,
        frequency_penalty: settings.frequency_penalty,
        presence_penalty: settings.presence_penalty,
        seed: settings.seed,
        max_tokens: settings.max_tokens,
        stop: (!settings.stop.is_empty()).then(|| settings.stop.clone()),
        stream: settings.stream,
        tools: tool_specs,
        tool_choice,
        response_format: settings.json_mode.then(ResponseFormat::json_object),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{ToolCall, ToolDefinition};

    fn with_tool(mut config: Config) -> Config {
        config.tools.definitions.push(ToolDefinition::new(
            "get_capital",
            "Look up a capital",
            serde_json::json!({"type": "object", "properties": {"country": {"type": "string"}}}),
        ));
        config
    }

    #[test]
    fn test_defaults() {
        let turns = vec![Turn::system("You are a helpful assistant"), Turn::user("Capital of France?")];
        let request = build_request(&turns, &Config::default());

        assert_eq!(request.model, "gpt-3.5-turbo");
        assert_eq!(request.messages, turns);
        assert_eq!(request.temperature, 0.5);
        assert_eq!(request.top_p, 1.0);
        assert!(request.stream);
        assert!(request.seed.is_none());
        assert!(request.max_tokens.is_none());
        assert!(request.stop.is_none());
        assert!(request.tools.is_none());
        assert!(request.tool_choice.is_none());
        assert!(request.response_format.is_none());
    }

    #[test]
    fn test_pending_turn_is_not_sent() {
        let turns = vec![Turn::user("hi"), Turn::pending()];
        let request = build_request(&turns, &Config::default());
        assert_eq!(request.messages, vec![Turn::user("hi")]);
    }

    #[test]
    fn test_assistant_tool_call_turn_is_sent() {
        let call_turn = Turn::pending().with_tool_calls(vec![ToolCall::new("c1", "f", "{}")]);
        let request = build_request(&[Turn::user("go"), call_turn.clone()], &Config::default());
        assert_eq!(request.messages[1], call_turn);
    }

    #[test]
    fn test_tools_and_choice() {
        let mut config = with_tool(Config::default());
        let request = build_request(&[], &config);
        assert_eq!(request.tools.as_ref().map(Vec::len), Some(1));
        assert!(request.tool_choice.is_none());

        config.tools.tool_choice = ToolChoice::Function("get_capital".to_string());
        let request = build_request(&[], &config);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["tool_choice"]["function"]["name"], "get_capital");

        config.tools.tool_choice = ToolChoice::None;
        let request = build_request(&[], &config);
        assert_eq!(request.tool_choice, Some(ToolChoiceOption::Mode("none".to_string())));
    }

    #[test]
    fn test_tool_choice_dropped_without_tools() {
        let mut config = Config::default();
        config.tools.tool_choice = ToolChoice::None;
        assert!(build_request(&[], &config).tool_choice.is_none());
    }

    #[test]
    fn test_optional_sampling_fields() {
        let mut config = Config::default();
        config.sampling.seed = Some(42);
        config.sampling.max_tokens = Some(100);
        config.sampling.stop = vec!["END".to_string()];
        config.sampling.json_mode = true;
        config.sampling.stream = false;

        let json = serde_json::to_value(build_request(&[Turn::user("x")], &config)).unwrap();
        assert_eq!(json["seed"], 42);
        assert_eq!(json["max_tokens"], 100);
        assert_eq!(json["stop"], serde_json::json!(["END"]));
        assert_eq!(json["response_format"], serde_json::json!({"type": "json_object"}));
        assert_eq!(json["stream"], false);
    }
}
