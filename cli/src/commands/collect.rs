// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Copy-In: collect files from targets into per-target folders

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use labfleet_core::domain::events::OperationKind;
use labfleet_core::domain::progress::format_bytes;
use labfleet_core::domain::target::Target;

use super::output::{drive, print_report};
use crate::services::FleetServices;

#[derive(Args)]
pub struct CollectCommand {
    /// Target name or address (repeatable, default: all)
    #[arg(short, long = "target", value_name = "TARGET")]
    pub targets: Vec<String>,

    /// List the files that would be collected without copying
    #[arg(long)]
    pub preview: bool,
}

pub async fn handle_command(command: CollectCommand, config_path: Option<PathBuf>) -> Result<()> {
    let services = FleetServices::new(config_path).await?;
    let targets = services.registry.select(&command.targets)?;
    if targets.is_empty() {
        bail!("No targets selected");
    }

    if command.preview {
        return preview(&services, &targets).await;
    }

    println!(
        "Collecting into {}",
        services.config.collect.destination.display()
    );
    let report = drive(
        &services,
        OperationKind::CopyIn,
        services.orchestrator.collect_files(&targets),
    )
    .await?;
    print_report(&report)
}

async fn preview(services: &FleetServices, targets: &[Arc<Target>]) -> Result<()> {
    let previews = services.orchestrator.preview_collection(targets).await?;
    for preview in previews {
        let total: u64 = preview.files.iter().map(|f| f.size).sum();
        println!(
            "{} {} ({} file(s), {})",
            preview.target.name.bold(),
            preview.root.display().to_string().dimmed(),
            preview.files.len(),
            format_bytes(total)
        );
        if let Some(error) = &preview.error {
            println!("  {}", error.red());
        }
        for file in &preview.files {
            println!("  {:<60} {:>10}", file.relative.display(), format_bytes(file.size));
        }
    }
    Ok(())
}
