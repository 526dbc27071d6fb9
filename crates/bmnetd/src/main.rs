//! bmnetd entry point.
//!
//! Runs one network operation for one node and prints its result as JSON
//! on stdout. Logs go to stderr.

use anyhow::Context;
use bmnetd::{init_logging, Agent, AgentConfig, Command, LogFormat, DEFAULT_CONFIG_PATH};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Bare-metal network attachment agent
#[derive(Parser, Debug)]
#[command(name = "bmnetd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Log output format; overrides the config file
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Controller token of the caller, used instead of the agent's credentials
    #[arg(long, env = "BMNET_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = AgentConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(level) = args.log_level {
        config.agent.log_level = level;
    }
    if let Some(format) = args.log_format {
        config.agent.log_format = format;
    }

    init_logging(&config.agent.log_level, config.agent.log_format)
        .context("installing log subscriber")?;
    config.validate().context("invalid configuration")?;

    info!(
        interface = %config.network.interface,
        inventory = %config.agent.inventory.display(),
        command = args.command.name(),
        "Starting bmnetd"
    );

    let agent = Agent::from_config(&config).await?;
    let output = agent
        .execute(&args.command, args.auth_token.as_deref())
        .await
        .with_context(|| format!("{} failed for node {}", args.command.name(), args.command.node_id()))?;

    if !output.is_null() {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("bmnetd: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
