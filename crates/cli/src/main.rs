use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use owo_colors::OwoColorize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use parley_core::logging::{self, LoggingConfig, mask_secret};
use parley_core::{Config, Role, ShareState, TelemetrySample, Turn, share};
use parley_providers::{MockProvider, OpenAiProvider, Provider};
use parley_session::{SendOutcome, Session};

const DEFAULT_CONFIG: &str = "parley.toml";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant";

/// Parley - a terminal playground for OpenAI-compatible chat completion APIs
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Stream chat completions from any OpenAI-compatible server", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to parley.toml (default: ./parley.toml when present)
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a prompt and stream the reply
    Chat {
        /// User message to send
        #[arg(value_name = "PROMPT")]
        prompt: Option<String>,

        /// System prompt for a new conversation
        #[arg(short, long, value_name = "TEXT")]
        system: Option<String>,

        /// Override the configured model
        #[arg(short, long, value_name = "MODEL")]
        model: Option<String>,

        /// Ask for a single complete message instead of a stream
        #[arg(long)]
        no_stream: bool,

        /// Play back scripted responses from a TOML file instead of calling a server
        #[arg(long, value_name = "FILE")]
        mock: Option<PathBuf>,

        /// Start from the conversation and settings in a share link
        #[arg(long, value_name = "URL")]
        from_url: Option<String>,

        /// Print the final transcript as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a share link for a conversation
    Share {
        /// User message to include
        #[arg(value_name = "PROMPT")]
        prompt: Option<String>,

        /// System prompt
        #[arg(short, long, value_name = "TEXT")]
        system: Option<String>,

        /// Playground address the link points at
        #[arg(long, value_name = "URL", default_value = "http://localhost:3000/")]
        base_url: String,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write the example configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { action: ConfigAction::Init { force } } => {
            cmd_config_init(&cli.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)), force)
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "parley", &mut std::io::stdout());
            Ok(())
        }
        command => {
            let config = load_config(cli.config.as_deref(), cli.verbose)?;
            let mut logging_config = LoggingConfig::from(config.logging.clone());
            if cli.verbose {
                logging_config = logging_config.with_level("debug");
            }
            let _guard = logging::init_logging(Some(logging_config)).context("Failed to initialize logging")?;

            match command {
                Commands::Chat { prompt, system, model, no_stream, mock, from_url, json } => {
                    let options = ChatOptions { prompt, system, model, no_stream, mock, from_url, json };
                    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
                    runtime.block_on(cmd_chat(config, options)).map(|_| ())
                }
                Commands::Share { prompt, system, base_url } => cmd_share(&config, prompt, system, &base_url),
                Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config),
                Commands::Config { .. } | Commands::Completions { .. } => Ok(()),
            }
        }
    }
}

/// Load config from an explicit path, `./parley.toml`, or defaults, then apply env overrides
fn load_config(path: Option<&Path>, verbose: bool) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path).with_context(|| format!("Failed to load config from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => {
            Config::from_file(Path::new(DEFAULT_CONFIG)).context("Failed to load config from parley.toml")?
        }
        None => {
            if verbose {
                eprintln!(
                    "{} No {} found, using defaults (run `parley config init` to create one)",
                    "Info:".blue().bold(),
                    DEFAULT_CONFIG
                );
            }
            Config::default()
        }
    };
    config.apply_env().context("Invalid environment override")?;
    Ok(config)
}

fn cmd_config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::write(path, Config::example()).context("Failed to write config")?;
    println!("{} Created config at {}", "Success:".green().bold(), path.display());
    Ok(())
}

fn cmd_config_show(config: &Config) -> Result<()> {
    let mut shown = config.clone();
    shown.connection.api_key = mask_secret(&shown.connection.api_key);
    print!("{}", shown.to_toml_string()?);
    Ok(())
}

#[derive(Debug, Default)]
struct ChatOptions {
    prompt: Option<String>,
    system: Option<String>,
    model: Option<String>,
    no_stream: bool,
    mock: Option<PathBuf>,
    from_url: Option<String>,
    json: bool,
}

/// Assemble the starting transcript and effective config for a chat
fn prepare_chat(mut config: Config, options: &ChatOptions) -> Result<(Config, Vec<Turn>)> {
    let mut turns = match &options.from_url {
        Some(link) => {
            let state = share::decode(link)?;
            config.sampling = state.settings;
            config.tools.definitions = state.tools;
            config.tools.tool_choice = state.tool_choice;
            config.validate().context("Share link carries invalid settings")?;
            state.messages
        }
        None => vec![Turn::system(options.system.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT))],
    };

    if let Some(prompt) = &options.prompt {
        let blank_user = matches!(turns.last(), Some(last) if last.role == Role::User && last.text().unwrap_or_default().is_empty());
        if blank_user {
            turns.pop();
        }
        turns.push(Turn::user(prompt.as_str()));
    }
    if !turns.iter().any(|turn| turn.role == Role::User) {
        anyhow::bail!("Nothing to send: pass a PROMPT or --from-url");
    }

    if let Some(model) = &options.model {
        config.sampling.model = model.clone();
    }
    if options.no_stream {
        config.sampling.stream = false;
    }
    Ok((config, turns))
}

fn make_provider(config: &Config, mock: Option<&Path>) -> Result<Arc<dyn Provider>> {
    match mock {
        Some(path) => Ok(Arc::new(
            MockProvider::from_file(path).with_context(|| format!("Failed to load mock responses from {}", path.display()))?,
        )),
        None => Ok(Arc::new(OpenAiProvider::from_config(&config.connection)?)),
    }
}

async fn cmd_chat(config: Config, options: ChatOptions) -> Result<Vec<Turn>> {
    let (config, turns) = prepare_chat(config, &options)?;
    let provider = make_provider(&config, options.mock.as_deref())?;
    let session = Session::new(provider, config).with_turns(turns);

    if !options.json {
        let printed = Arc::new(Mutex::new(LiveText::default()));
        session.on_transcript_changed(move |turns| {
            let mut live = printed.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(delta) = live.advance(turns) {
                print!("{}", delta);
                let _ = std::io::stdout().flush();
            }
        });
    }

    let handle = session.handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let result = session.send().await;
    ctrl_c.abort();
    let outcome = result.context("Chat request failed")?;
    let transcript = session.transcript();

    if options.json {
        println!("{}", serde_json::to_string_pretty(&transcript)?);
        return Ok(transcript);
    }

    if let Some(last) = transcript.last() {
        if last.content.is_some() {
            println!();
        }
        for call in last.tool_calls() {
            println!("{} {}({})", "Tool call:".magenta().bold(), call.function_name.cyan(), call.arguments_text);
        }
    }
    if let SendOutcome::Cancelled { .. } = outcome {
        eprintln!("{} Cancelled; partial reply kept", "Info:".yellow().bold());
    }
    if let Some(sample) = session.telemetry() {
        eprintln!("{}", format_telemetry(&sample).dimmed());
    }

    Ok(transcript)
}

/// Tracks how much of the streaming assistant turn has been printed
#[derive(Debug, Default)]
struct LiveText {
    turn_count: usize,
    printed: usize,
}

impl LiveText {
    /// New text of the last assistant turn since the previous call
    fn advance(&mut self, turns: &[Turn]) -> Option<String> {
        if turns.len() != self.turn_count {
            self.turn_count = turns.len();
            self.printed = 0;
        }
        let last = turns.last().filter(|turn| turn.role == Role::Assistant)?;
        let text = last.text()?;
        if text.len() <= self.printed || !text.is_char_boundary(self.printed) {
            return None;
        }
        let delta = text[self.printed..].to_string();
        self.printed = text.len();
        Some(delta)
    }
}

fn format_telemetry(sample: &TelemetrySample) -> String {
    let ttft = match sample.time_to_first_unit() {
        Some(delta) => format!("{} ms", delta.num_milliseconds()),
        None => "-".to_string(),
    };
    let rate = match sample.units_per_second() {
        Some(rate) => format!("{:.1}/s", rate),
        None => "-".to_string(),
    };
    format!("TTFT {} | {} chunks | {}", ttft, sample.unit_count, rate)
}

fn cmd_share(config: &Config, prompt: Option<String>, system: Option<String>, base_url: &str) -> Result<()> {
    let base = url_base(base_url)?;
    let mut state = ShareState {
        settings: config.sampling.clone(),
        tools: config.tools.definitions.clone(),
        tool_choice: config.tools.tool_choice.clone(),
        ..Default::default()
    };
    if let Some(system) = system {
        state.messages[0] = Turn::system(system);
    }
    if let Some(prompt) = prompt {
        state.messages[1] = Turn::user(prompt);
    }

    println!("{}", share::encode(&base, &state)?);
    Ok(())
}

fn url_base(base_url: &str) -> Result<share::Url> {
    share::Url::parse(base_url).with_context(|| format!("Invalid base URL: {}", base_url))
}
