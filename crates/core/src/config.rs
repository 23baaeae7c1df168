use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Default chat-completions endpoint root
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Environment variable that overrides `connection.api_key`
pub const API_KEY_ENV: &str = "PARLEY_API_KEY";

/// Environment variable that overrides `connection.base_url`
pub const BASE_URL_ENV: &str = "PARLEY_BASE_URL";

/// Where requests go and how they authenticate
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`)
    pub base_url: String,
    /// Bearer token; may be empty for local servers
    pub api_key: String,
    /// Whole-request timeout enforced by the transport
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { base_url: DEFAULT_BASE_URL.to_string(), api_key: String::new(), timeout_secs: None }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &crate::logging::mask_secret(&self.api_key))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Sampling parameters sent with every request.
///
/// Missing fields take their defaults, so a partial table is merged over the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingSettings {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
    /// Ask for a JSON object response (`response_format = json_object`)
    pub json_mode: bool,
    /// Request incremental deltas instead of one complete message
    pub stream: bool,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            seed: None,
            temperature: 0.5,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_tokens: None,
            stop: Vec::new(),
            json_mode: false,
            stream: true,
        }
    }
}

/// A function the model may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the arguments object
    #[serde(default = "default_tool_parameters")]
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self { name: name.into(), description: Some(description.into()), parameters }
    }
}

pub(crate) fn default_tool_parameters() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// How the model should pick among the defined tools
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// Model decides (server default, never sent explicitly)
    #[default]
    Auto,
    /// Model must not call tools
    None,
    /// Model must call the named function
    Function(String),
}

impl std::fmt::Display for ToolChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolChoice::Auto => write!(f, "auto"),
            ToolChoice::None => write!(f, "none"),
            ToolChoice::Function(name) => write!(f, "tool:{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub tool_choice: ToolChoice,
    pub definitions: Vec<ToolDefinition>,
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive for stderr output
    pub level: String,
    /// `pretty`, `json` or `compact`
    pub format: String,
    pub file: FileLoggingConfig,
    pub privacy: PrivacySettings,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "pretty".to_string(),
            file: FileLoggingConfig::default(),
            privacy: PrivacySettings::default(),
        }
    }
}

/// `[logging.file]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    pub level: String,
    /// Overrides `~/.parley/logs`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self { enabled: false, level: "debug".to_string(), directory: None }
    }
}

/// `[logging.privacy]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrivacySettings {
    /// How streamed content is echoed in trace logs: `none`, `truncate` or `full`
    pub log_content: String,
    pub truncate_length: usize,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self { log_content: "none".to_string(), truncate_length: 200 }
    }
}

/// Root configuration structure for parley.toml
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub sampling: SamplingSettings,
    pub tools: ToolsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str)
            .map_err(|e| crate::Error::Config(ConfigError::TomlParse(e.to_string()).to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::Error::Config(format!("TOML serialize error: {}", e)))
    }

    /// Persist to `path`, creating parent directories as needed
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Apply `PARLEY_API_KEY` / `PARLEY_BASE_URL` overrides
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(std::env::var(API_KEY_ENV).ok(), std::env::var(BASE_URL_ENV).ok())
    }

    fn apply_overrides(&mut self, api_key: Option<String>, base_url: Option<String>) -> Result<()> {
        if let Some(key) = api_key {
            self.connection.api_key = key;
        }
        if let Some(url) = base_url {
            self.connection.base_url = url;
            self.validate()?;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        use crate::Error;

        let base_url = self.connection.base_url.trim();
        match url::Url::parse(base_url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => return Err(Error::Config(ConfigError::InvalidBaseUrl(base_url.to_string()).to_string())),
        }

        let sampling = &self.sampling;
        if sampling.model.trim().is_empty() {
            return Err(Error::Config(ConfigError::EmptyModel.to_string()));
        }
        check_range("temperature", sampling.temperature, 0.0, 2.0)?;
        check_range("top_p", sampling.top_p, 0.0, 1.0)?;
        check_range("frequency_penalty", sampling.frequency_penalty, -2.0, 2.0)?;
        check_range("presence_penalty", sampling.presence_penalty, -2.0, 2.0)?;

        let mut names = HashSet::new();
        for tool in &self.tools.definitions {
            if tool.name.trim().is_empty() {
                return Err(Error::Config(ConfigError::UnnamedTool.to_string()));
            }
            if !names.insert(tool.name.as_str()) {
                return Err(Error::Config(ConfigError::DuplicateTool(tool.name.clone()).to_string()));
            }
        }

        if let ToolChoice::Function(name) = &self.tools.tool_choice
            && !names.contains(name.as_str())
        {
            return Err(Error::Config(ConfigError::UnknownToolChoice(name.clone()).to_string()));
        }

        Ok(())
    }

    /// Get example configuration (as a string)
    pub fn example() -> &'static str {
        r#"# Parley Configuration Example
# Copy this file to parley.toml and customize as needed

[connection]
# Any OpenAI-compatible endpoint root (llama.cpp, vLLM, Ollama, ...)
base_url = "https://api.openai.com/v1"
# Bearer token; PARLEY_API_KEY overrides this value
api_key = ""
# timeout_secs = 120

[sampling]
model = "gpt-3.5-turbo"
temperature = 0.5
top_p = 1.0
frequency_penalty = 0.0
presence_penalty = 0.0
# seed = 42
# max_tokens = 512
stop = []
json_mode = false
stream = true

[tools]
# "auto", "none", or { function = "name" }
tool_choice = "auto"

# [[tools.definitions]]
# name = "get_capital"
# description = "Look up the capital city of a country"
# parameters = { type = "object", properties = { country = { type = "string" } }, required = ["country"] }

[logging]
level = "warn"
format = "pretty"

[logging.file]
enabled = false
level = "debug"

[logging.privacy]
# "none", "truncate" or "full"
log_content = "none"
truncate_length = 200
"#
    }
}

fn check_range(field: &'static str, value: f32, min: f32, max: f32) -> Result<()> {
    if value.is_nan() || value < min || value > max {
        return Err(crate::Error::Config(ConfigError::OutOfRange { field, value, min, max }.to_string()));
    }
    Ok(())
}

/// Configuration-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Base URL is not an http(s) URL
    #[error("invalid base URL: '{0}'")]
    InvalidBaseUrl(String),

    /// Model name missing
    #[error("model name must not be empty")]
    EmptyModel,

    /// Sampling parameter outside its accepted range
    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange { field: &'static str, value: f32, min: f32, max: f32 },

    /// Tool definition without a name
    #[error("tool definitions must have a name")]
    UnnamedTool,

    /// Two tools share a name
    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),

    /// tool_choice names a tool that is not defined
    #[error("tool_choice names an undefined tool: {0}")]
    UnknownToolChoice(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlParse(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlParse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.connection.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.sampling.model, "gpt-3.5-turbo");
        assert_eq!(config.sampling.temperature, 0.5);
        assert!(config.sampling.stream);
        assert!(config.sampling.seed.is_none());
        assert!(config.sampling.max_tokens.is_none());
        assert_eq!(config.tools.tool_choice, ToolChoice::Auto);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_parses() {
        let config = Config::from_toml_str(Config::example()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_from_toml_str() {
        let toml = r#"
[connection]
base_url = "http://localhost:8080/v1"
api_key = "sk-test"

[sampling]
model = "llama-3"
temperature = 0.2
seed = 7
max_tokens = 256
stop = ["\n\n"]
stream = false

[tools]
tool_choice = { function = "get_capital" }

[[tools.definitions]]
name = "get_capital"
description = "Look up a capital"
parameters = { type = "object", properties = { country = { type = "string" } } }
"#;

        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.connection.base_url, "http://localhost:8080/v1");
        assert_eq!(config.sampling.model, "llama-3");
        assert_eq!(config.sampling.seed, Some(7));
        assert_eq!(config.sampling.max_tokens, Some(256));
        assert_eq!(config.sampling.stop, vec!["\n\n".to_string()]);
        assert_eq!(config.sampling.top_p, 1.0);
        assert!(!config.sampling.stream);
        assert_eq!(config.tools.tool_choice, ToolChoice::Function("get_capital".to_string()));
        assert_eq!(config.tools.definitions[0].parameters["properties"]["country"]["type"], "string");
    }

    #[test]
    fn test_partial_sampling_merges_over_defaults() {
        let config = Config::from_toml_str("[sampling]\ntemperature = 1.1\n").unwrap();
        assert_eq!(config.sampling.temperature, 1.1);
        assert_eq!(config.sampling.model, "gpt-3.5-turbo");
        assert!(config.sampling.stream);
    }

    #[test]
    fn test_tool_parameters_default() {
        let config = Config::from_toml_str("[[tools.definitions]]\nname = \"ping\"\n").unwrap();
        assert_eq!(config.tools.definitions[0].parameters, default_tool_parameters());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = Config::from_toml_str("[sampling]\ntemprature = 0.1\n");
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("TOML parse error")));
    }

    #[test]
    fn test_validation_ranges() {
        let mut config = Config::default();
        config.sampling.temperature = 2.5;
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "configuration error: temperature = 2.5 is outside 0..=2");

        let mut config = Config::default();
        config.sampling.top_p = -0.1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sampling.presence_penalty = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_base_url() {
        let mut config = Config::default();
        config.connection.base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        config.connection.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_tools() {
        let mut config = Config::default();
        config.tools.definitions = vec![
            ToolDefinition::new("a", "first", default_tool_parameters()),
            ToolDefinition::new("a", "again", default_tool_parameters()),
        ];
        assert!(config.validate().unwrap_err().to_string().contains("duplicate tool name: a"));

        config.tools.definitions.pop();
        config.tools.tool_choice = ToolChoice::Function("b".to_string());
        assert!(config.validate().unwrap_err().to_string().contains("undefined tool: b"));

        config.tools.tool_choice = ToolChoice::Function("a".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_empty_model() {
        let mut config = Config::default();
        config.sampling.model = "  ".to_string();
        assert_eq!(config.validate().unwrap_err().to_string(), "configuration error: model name must not be empty");
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(Some("sk-env".to_string()), Some("http://127.0.0.1:11434/v1".to_string()))
            .unwrap();
        assert_eq!(config.connection.api_key, "sk-env");
        assert_eq!(config.connection.base_url, "http://127.0.0.1:11434/v1");

        assert!(config.apply_overrides(None, Some("nope".to_string())).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("parley.toml");

        let mut config = Config::default();
        config.sampling.seed = Some(3);
        config.tools.definitions.push(ToolDefinition::new(
            "get_capital",
            "Look up a capital",
            serde_json::json!({"type": "object", "properties": {"country": {"type": "string"}}}),
        ));
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = Config::from_file(Path::new("/definitely/not/here/parley.toml"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_connection_debug_masks_key() {
        let connection = ConnectionConfig { api_key: "sk-1234567890abcdef".to_string(), ..Default::default() };
        let debug = format!("{:?}", connection);
        assert!(!debug.contains("1234567890abcdef"));
    }

    #[test]
    fn test_tool_choice_display() {
        assert_eq!(ToolChoice::Auto.to_string(), "auto");
        assert_eq!(ToolChoice::None.to_string(), "none");
        assert_eq!(ToolChoice::Function("f".to_string()).to_string(), "tool:f");
    }

    #[test]
    fn test_config_error_display() {
        assert_eq!(ConfigError::DuplicateTool("x".to_string()).to_string(), "duplicate tool name: x");
        assert_eq!(ConfigError::InvalidBaseUrl("x".to_string()).to_string(), "invalid base URL: 'x'");
    }
}
