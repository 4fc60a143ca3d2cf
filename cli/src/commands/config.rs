// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `labfleet config`: inspect, check and scaffold the lab configuration file

use anyhow::{Context as _, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use labfleet_core::domain::config::{FleetConfig, CONFIG_PATH_ENV};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration after discovery and env overrides
    Show {
        /// Also list the locations searched for a config file
        #[arg(long)]
        paths: bool,
    },

    /// Check a config file without running anything
    Validate {
        /// File to check (default: the discovered one)
        #[arg(value_name = "PATH")]
        file: Option<PathBuf>,
    },

    /// Write a starter config file
    Generate {
        /// Output path (default: ./labfleet-config.yaml)
        #[arg(short, long, default_value = "./labfleet-config.yaml")]
        output: PathBuf,

        /// Use the commented template with every section spelled out
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_path, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_path)),
        ConfigCommand::Generate { output, examples } => generate(&output, examples),
    }
}

fn show(config_path: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = FleetConfig::load_or_default(config_path.clone())
        .context("Could not load the lab configuration")?;

    if show_paths {
        println!("{}", "Searched, first match wins:".bold());
        let flag = config_path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  1. --config: {}", flag.dimmed());
        println!(
            "  2. {}: {}",
            CONFIG_PATH_ENV,
            std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| "-".to_string())
                .dimmed()
        );
        println!("  3. ./labfleet-config.yaml");
        println!("  4. ~/.labfleet/config.yaml");
        println!("  5. /etc/labfleet/config.yaml");
        println!();
    }

    println!("{}", "Remote:".bold());
    let username = &config.remote.credentials.username;
    println!(
        "  User: {}",
        if username.is_empty() { "(not set)" } else { username.as_str() }
    );
    println!("  Port: {}", config.remote.port);
    println!("  Max sessions: {}", config.remote.max_concurrent_sessions);
    println!(
        "  Launcher: {} {}",
        config.remote.launcher.program,
        config.remote.launcher.args.join(" ")
    );
    println!(
        "  Timeouts: open {} ms, operation {} ms, idle {} ms",
        config.remote.timeouts.open_ms,
        config.remote.timeouts.operation_ms,
        config.remote.timeouts.idle_ms
    );
    println!();

    println!("{}", "Transfers:".bold());
    println!("  Send to: {}", config.send.destination_template);
    println!("  Collect from: {}", config.collect.source_template);
    println!(
        "  Collect into: {} (pattern {}, recurse {})",
        config.collect.destination.display(),
        config.collect.pattern,
        config.collect.recurse
    );
    println!();

    println!("{}", "Network:".bold());
    println!(
        "  Default gateway: {}",
        if config.network.default_gateway.is_empty() {
            "(not set)"
        } else {
            config.network.default_gateway.as_str()
        }
    );
    println!("  Interface pattern: {}", config.network.interface_pattern);
    println!(
        "  Probe: port {} within {} ms",
        config.network.probe_port, config.network.probe_timeout_ms
    );
    println!("  Wake broadcast: {}", config.network.wake_broadcast);
    println!();

    println!("{}", "Fleet:".bold());
    println!("  Fleet file: {}", config.fleet.fleet_file.display());
    println!("  Scripts: {}", config.fleet.scripts_dir.display());
    println!("  MAC cache: {}", config.fleet.mac_cache_dir.display());
    println!("  Refresh every {}s", config.fleet.refresh_interval_secs);

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    let config = FleetConfig::load_or_default(config_path)
        .context("Could not load the lab configuration")?;
    config.validate().context("Invalid lab configuration")?;
    println!("{}", "✓ Lab configuration OK".green());

    Ok(())
}

fn generate(output: &Path, commented: bool) -> Result<()> {
    let template = if commented {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    if output.exists() {
        anyhow::bail!("{} already exists; remove it first", output.display());
    }
    std::fs::write(output, template)
        .with_context(|| format!("Could not write {}", output.display()))?;
    println!("{} {}", "✓ Wrote".green(), output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_templates_parse_and_validate() {
        for sample in [
            include_str!("../../templates/config-minimal.yaml"),
            include_str!("../../templates/config-with-examples.yaml"),
        ] {
            let config = labfleet_core::domain::config::FleetConfig::from_yaml_str(sample).unwrap();
            config.validate().unwrap();
        }
    }
}
