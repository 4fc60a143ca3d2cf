// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Copy-Out: distribute local files to targets

use anyhow::{bail, Result};
use clap::Args;
use std::path::PathBuf;

use labfleet_core::domain::events::OperationKind;

use super::output::{drive, print_report};
use crate::services::FleetServices;

#[derive(Args)]
pub struct SendCommand {
    /// Files to send
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Target name or address (repeatable, default: all)
    #[arg(short, long = "target", value_name = "TARGET")]
    pub targets: Vec<String>,
}

pub async fn handle_command(command: SendCommand, config_path: Option<PathBuf>) -> Result<()> {
    for file in &command.files {
        if !file.is_file() {
            bail!("{} is not a readable file", file.display());
        }
    }

    let services = FleetServices::new(config_path).await?;
    let targets = services.registry.select(&command.targets)?;
    if targets.is_empty() {
        bail!("No targets selected");
    }

    let report = drive(
        &services,
        OperationKind::CopyOut,
        services.orchestrator.send_files(&targets, &command.files),
    )
    .await?;
    print_report(&report)
}
