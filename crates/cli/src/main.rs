//! agentloop CLI: the composition root.
//!
//! Commands:
//! - `run`     Run the tool-calling agent on a task
//! - `chat`    Ask the model once, without tools
//! - `tools`   List the built-in tools
//! - `config`  Show the resolved configuration

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use agentloop_config::{AppConfig, DEFAULT_PROFILE};
use agentloop_core::provider::ToolChoice;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "agentloop",
    about = "agentloop: a ReAct tool-calling agent for the terminal",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.agentloop/config.toml)
    #[arg(short, long, global = true, env = "AGENTLOOP_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent until it terminates or runs out of steps
    Run(RunArgs),

    /// Send one message to the model and print the reply
    Chat(ChatArgs),

    /// List the built-in tools
    Tools {
        /// Print the full JSON schema sent to the model
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved configuration with secrets masked
    Config {
        /// Print the built-in defaults instead
        #[arg(long)]
        default: bool,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// The task for the agent
    pub prompt: String,

    /// Model profile to use
    #[arg(short, long, default_value = DEFAULT_PROFILE)]
    pub profile: String,

    /// Override the step budget
    #[arg(long)]
    pub max_steps: Option<u32>,

    /// Tool selection policy: none, auto or required
    #[arg(long, default_value = "auto")]
    pub tool_choice: ToolChoice,

    /// Suppress per-step progress on stderr
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// The message to send
    pub prompt: String,

    /// Model profile to use
    #[arg(short, long, default_value = DEFAULT_PROFILE)]
    pub profile: String,

    /// Optional system prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Stream the reply
    #[arg(long)]
    pub stream: bool,

    /// Override the profile temperature
    #[arg(short, long)]
    pub temperature: Option<f32>,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let Some(path) = path else {
        return AppConfig::load().context("Failed to load config");
    };
    let mut config = AppConfig::load_from(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_tracing(config: &AppConfig, verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { config.log.filter.as_str() };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json || config.log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config, cli.verbose, cli.log_json);

    match cli.command {
        Commands::Run(args) => commands::run::run(&config, args).await?,
        Commands::Chat(args) => commands::chat::run(&config, args).await?,
        Commands::Tools { json } => commands::tools::run(&config, json)?,
        Commands::Config { default } => commands::config_cmd::show(&config, default)?,
    }

    Ok(())
}
