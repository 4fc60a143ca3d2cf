// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Fleet management commands
//!
//! Commands: list, add, remove, refresh, wake, watch

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use labfleet_core::domain::events::FleetEvent;
use labfleet_core::domain::target::{Target, TargetIdentity, TargetState};

use crate::services::FleetServices;

#[derive(Subcommand)]
pub enum FleetCommand {
    /// List targets with their current state
    List {
        /// Skip probing and show stored targets only
        #[arg(long)]
        no_probe: bool,

        /// Print the fleet as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add a target
    Add {
        /// Network address of the machine
        #[arg(value_name = "ADDRESS")]
        address: IpAddr,

        /// Display name
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Remove a target by name or address
    Remove {
        #[arg(value_name = "TARGET")]
        target: String,
    },

    /// Probe targets and print the result
    Refresh {
        /// Targets to refresh (default: all)
        #[arg(value_name = "TARGET")]
        targets: Vec<String>,
    },

    /// Send Wake-on-LAN packets
    Wake {
        /// Targets to wake (default: all)
        #[arg(value_name = "TARGET")]
        targets: Vec<String>,
    },

    /// Keep refreshing the fleet and print state changes until Ctrl-C
    Watch,
}

pub async fn handle_command(command: FleetCommand, config_path: Option<PathBuf>) -> Result<()> {
    let services = FleetServices::new(config_path).await?;
    match command {
        FleetCommand::List { no_probe, json } => list(&services, no_probe, json).await,
        FleetCommand::Add { address, name } => add(&services, address, name).await,
        FleetCommand::Remove { target } => remove(&services, &target).await,
        FleetCommand::Refresh { targets } => refresh(&services, &targets).await,
        FleetCommand::Wake { targets } => wake(&services, &targets).await,
        FleetCommand::Watch => watch(&services).await,
    }
}

#[derive(Serialize)]
struct TargetListing {
    #[serde(flatten)]
    identity: TargetIdentity,
    #[serde(flatten)]
    state: TargetState,
}

async fn list(services: &FleetServices, no_probe: bool, json: bool) -> Result<()> {
    if !no_probe {
        services.registry.refresh_all(Duration::ZERO).await;
    }
    if json {
        let listing: Vec<_> = services
            .registry
            .targets()
            .iter()
            .map(|target| TargetListing {
                identity: target.identity().clone(),
                state: target.snapshot(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }
    if services.registry.is_empty() {
        println!("{}", "No targets. Add one with `labfleet fleet add <ADDRESS> <NAME>`.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{:<16} {:<15} {:<8} {:<17} {}",
            "NAME", "ADDRESS", "STATE", "MAC", "INTERNET"
        )
        .bold()
    );
    for target in services.registry.targets() {
        print_target(&target);
    }
    Ok(())
}

fn print_target(target: &Target) {
    let state = target.snapshot();
    let online = if state.online {
        "online".green()
    } else {
        "offline".red()
    };
    let mac = state
        .hardware_address
        .map(|mac| mac.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:<16} {:<15} {:<8} {:<17} {}",
        target.name(),
        target.address(),
        online,
        mac,
        state.access_details()
    );
    if let Some(host) = &state.host_name {
        if !host.eq_ignore_ascii_case(target.name()) {
            println!("  {} {}", "host name:".dimmed(), host);
        }
    }
    if !state.probe_status.is_empty() {
        println!("  {}", state.probe_status.dimmed());
    }
    if let Some(error) = &state.probe_error {
        println!("  {}", error.red());
    }
}

async fn add(services: &FleetServices, address: IpAddr, name: String) -> Result<()> {
    let target = services.registry.insert(TargetIdentity::new(address, name))?;
    services.registry.save().await.context("Failed to save fleet")?;
    println!("{}", format!("✓ Added {}", target.identity()).green());

    services.registry.refresh_target(&target, Duration::ZERO).await;
    print_target(&target);
    Ok(())
}

async fn remove(services: &FleetServices, query: &str) -> Result<()> {
    let removed = services
        .registry
        .remove(query)
        .with_context(|| format!("No target matches '{query}'"))?;
    services.registry.save().await.context("Failed to save fleet")?;
    println!("{}", format!("✓ Removed {}", removed.identity()).green());
    Ok(())
}

async fn refresh(services: &FleetServices, queries: &[String]) -> Result<()> {
    let targets = services.registry.select(queries)?;
    let probes = targets
        .iter()
        .map(|target| services.registry.refresh_target(target, Duration::ZERO));
    futures::future::join_all(probes).await;
    for target in &targets {
        print_target(target);
    }
    Ok(())
}

async fn wake(services: &FleetServices, queries: &[String]) -> Result<()> {
    let targets = services.registry.select(queries)?;
    let mut failures = 0;
    for target in &targets {
        match services.registry.wake(target).await {
            Ok(()) => println!("{} {}", "✓ Wake sent to".green(), target.identity()),
            Err(e) => {
                failures += 1;
                println!("{} {}: {}", "✗".red(), target.identity(), e);
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} target(s) could not be woken");
    }
    Ok(())
}

async fn watch(services: &FleetServices) -> Result<()> {
    let interval = services.config.fleet.refresh_interval();
    println!(
        "Refreshing {} target(s) every {}s. Press Ctrl-C to stop.",
        services.registry.len(),
        interval.as_secs()
    );

    let shutdown = CancellationToken::new();
    let mut events = services.events.subscribe();
    let refresher = services.registry.spawn_refresh_loop(interval, shutdown.clone());

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            event = events.recv() => {
                if let Ok(FleetEvent::TargetUpdated { target, state }) = event {
                    let online = if state.online { "online".green() } else { "offline".red() };
                    println!("{:<16} {:<8} {}", target.name, online, state.access_details());
                }
            }
        }
    }

    shutdown.cancel();
    refresher.await.context("Refresh loop failed")?;
    Ok(())
}
