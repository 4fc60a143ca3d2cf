// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Access-Toggle: switch targets' internet access
//!
//! Commands: on, off, status

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use futures::future::join_all;
use std::path::PathBuf;

use crate::services::FleetServices;

#[derive(Subcommand)]
pub enum InternetCommand {
    /// Restore the default route
    On {
        /// Targets (default: all)
        #[arg(value_name = "TARGET")]
        targets: Vec<String>,
    },

    /// Remove the default route
    Off {
        /// Targets (default: all)
        #[arg(value_name = "TARGET")]
        targets: Vec<String>,
    },

    /// Check the current access level
    Status {
        /// Targets (default: all)
        #[arg(value_name = "TARGET")]
        targets: Vec<String>,
    },
}

pub async fn handle_command(command: InternetCommand, config_path: Option<PathBuf>) -> Result<()> {
    let services = FleetServices::new(config_path).await?;
    match command {
        InternetCommand::On { targets } => toggle(&services, &targets, true).await,
        InternetCommand::Off { targets } => toggle(&services, &targets, false).await,
        InternetCommand::Status { targets } => status(&services, &targets).await,
    }
}

async fn toggle(services: &FleetServices, queries: &[String], enabled: bool) -> Result<()> {
    if enabled && services.config.network.default_gateway.is_empty() {
        bail!("network.default_gateway must be configured to restore internet access");
    }
    let targets = services.registry.select(queries)?;
    let results = services
        .orchestrator
        .set_internet_access(&targets, enabled)
        .await;

    let mut failures = 0;
    for (target, result) in &results {
        let details = services
            .registry
            .find(&target.address.to_string())
            .map(|t| t.snapshot().access_details())
            .unwrap_or_default();
        match result {
            Ok(()) => println!("{:<16} {} {}", target.name, "✓".green(), details),
            Err(e) => {
                failures += 1;
                println!("{:<16} {} {}", target.name, "✗".red(), e.to_string().red());
            }
        }
    }
    if failures > 0 {
        bail!("{failures} target(s) could not be switched");
    }
    Ok(())
}

async fn status(services: &FleetServices, queries: &[String]) -> Result<()> {
    let targets = services.registry.select(queries)?;
    let access = services.orchestrator.access();
    join_all(targets.iter().map(|target| access.recheck(target))).await;
    for target in &targets {
        println!("{:<16} {}", target.name(), target.snapshot().access_details());
    }
    Ok(())
}
