//! tiklive - record live broadcasts from the command line
//!
//! Subcommands:
//! - `tiklive record --user <name>[,<name>...]` - record one or more accounts
//! - `tiklive record --mode followers` - record every followed account that goes live
//! - `tiklive config` - print the effective configuration

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tikconf::TikConfig;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "tiklive")]
#[command(about = "Watch live broadcasts and record them to disk")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record live sessions
    Record(commands::RecordArgs),

    /// Show the effective configuration and where it came from
    Config {
        /// Config file replacing ./tiklive.toml
        #[arg(long, env = "TIKLIVE_CONFIG")]
        config: Option<PathBuf>,
    },
}

impl Commands {
    fn config_path(&self) -> Option<&PathBuf> {
        match self {
            Commands::Record(args) => args.config.as_ref(),
            Commands::Config { config } => config.as_ref(),
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = TikConfig::load_with_sources_from(cli.command.config_path().map(|p| p.as_path()))
        .context("loading configuration");
    let level = loaded
        .as_ref()
        .map(|(config, _)| config.telemetry.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_tracing(&level);

    match run(cli.command, loaded).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, loaded: Result<(TikConfig, tikconf::ConfigSources)>) -> Result<()> {
    let (config, sources) = loaded?;

    match command {
        Commands::Record(args) => commands::record(args, config).await,
        Commands::Config { .. } => {
            commands::show_config(&config, &sources);
            Ok(())
        }
    }
}
