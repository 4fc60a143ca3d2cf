// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # labfleet
//!
//! Runs one operation against many computer-lab machines at once.
//!
//! ## Commands
//!
//! - `labfleet fleet list|add|remove|refresh|wake|watch` - Manage the target list
//! - `labfleet send <FILE>...` - Copy files to every target
//! - `labfleet collect [--preview]` - Collect files from every target
//! - `labfleet run <SCRIPT>...` - Run scripts on every target
//! - `labfleet scripts` - List the script catalog
//! - `labfleet internet on|off|status` - Toggle internet access
//! - `labfleet config show|validate|generate` - Configuration management
//!
//! Every operation command accepts `-t/--target` (repeatable) to narrow the
//! selection; Ctrl-C cancels the running operation.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use labfleet::commands::{
    self, CollectCommand, ConfigCommand, FleetCommand, InternetCommand, RunCommand, SendCommand,
};

/// labfleet - fleet operations for a school computer lab
#[derive(Parser)]
#[command(name = "labfleet")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "LABFLEET_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LABFLEET_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the fleet of target machines
    #[command(name = "fleet")]
    Fleet {
        #[command(subcommand)]
        command: FleetCommand,
    },

    /// Copy files to targets
    #[command(name = "send")]
    Send(SendCommand),

    /// Collect files from targets
    #[command(name = "collect")]
    Collect(CollectCommand),

    /// Run scripts on targets
    #[command(name = "run")]
    Run(RunCommand),

    /// List available scripts
    #[command(name = "scripts")]
    Scripts,

    /// Switch targets' internet access
    #[command(name = "internet")]
    Internet {
        #[command(subcommand)]
        command: InternetCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Fleet { command }) => {
            commands::fleet::handle_command(command, cli.config).await
        }
        Some(Commands::Send(command)) => commands::send::handle_command(command, cli.config).await,
        Some(Commands::Collect(command)) => {
            commands::collect::handle_command(command, cli.config).await
        }
        Some(Commands::Run(command)) => commands::run::handle_command(command, cli.config).await,
        Some(Commands::Scripts) => commands::run::list_scripts(cli.config).await,
        Some(Commands::Internet { command }) => {
            commands::internet::handle_command(command, cli.config).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    Ok(())
}
