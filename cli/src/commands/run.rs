// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Script-Run: execute scripts on targets, and list the script catalog

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};

use labfleet_core::application::jobs::FleetJob;
use labfleet_core::application::ScriptCatalog;
use labfleet_core::domain::events::OperationKind;
use labfleet_core::domain::script_log::LogEntry;

use super::output::{drive, print_report};
use crate::services::FleetServices;

#[derive(Args)]
pub struct RunCommand {
    /// Catalog script names or script file paths, run in order
    #[arg(value_name = "SCRIPT", required = true)]
    pub scripts: Vec<String>,

    /// Target name or address (repeatable, default: all)
    #[arg(short, long = "target", value_name = "TARGET")]
    pub targets: Vec<String>,

    /// Print each target's full log after the run
    #[arg(long)]
    pub show_log: bool,
}

pub async fn handle_command(command: RunCommand, config_path: Option<PathBuf>) -> Result<()> {
    let services = FleetServices::new(config_path).await?;
    let catalog = services.script_catalog()?;
    let scripts = command
        .scripts
        .iter()
        .map(|query| resolve_script(&catalog, query))
        .collect::<Result<Vec<_>>>()?;

    let targets = services.registry.select(&command.targets)?;
    if targets.is_empty() {
        bail!("No targets selected");
    }

    let report = drive(
        &services,
        OperationKind::ScriptRun,
        services.orchestrator.run_scripts(&targets, scripts),
    )
    .await?;

    if command.show_log {
        print_logs(&services);
    }
    print_report(&report)
}

/// Catalog entries win over file paths of the same name.
pub fn resolve_script(catalog: &ScriptCatalog, query: &str) -> Result<String> {
    if let Some(entry) = catalog.find(query) {
        return entry
            .read()
            .with_context(|| format!("Failed to read script {}", entry.path.display()));
    }
    let path = Path::new(query);
    if path.is_file() {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()));
    }
    bail!("No script named '{query}' in the catalog and no such file")
}

fn print_logs(services: &FleetServices) {
    for job in services.orchestrator.scripts().jobs() {
        println!();
        println!(
            "{} ({} error(s), {} warning(s))",
            job.target().name().bold(),
            job.error_count(),
            job.warning_count()
        );
        for entry in job.log_entries() {
            match entry {
                LogEntry::Message { level, text } => println!("  {level:?}: {text}"),
                LogEntry::Progress(progress) if progress.visible => println!(
                    "  {} {}% {}",
                    progress.activity, progress.percent_complete, progress.status
                ),
                LogEntry::Progress(_) => {}
            }
        }
    }
}

pub async fn list_scripts(config_path: Option<PathBuf>) -> Result<()> {
    let services = FleetServices::new(config_path).await?;
    let catalog = services.script_catalog()?;
    if catalog.is_empty() {
        println!(
            "{}",
            format!(
                "No scripts in {}",
                services.config.fleet.scripts_dir.display()
            )
            .yellow()
        );
        return Ok(());
    }
    for entry in catalog.entries() {
        println!("{:<40} {}", entry.name.bold(), entry.path.display().to_string().dimmed());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_script_prefers_catalog() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clean.ps1"), "# Clean up\nRemove-Item x").unwrap();
        let loose = dir.path().join("loose.ps1");
        std::fs::write(&loose, "Get-Date").unwrap();
        let catalog = ScriptCatalog::load(dir.path()).unwrap();

        assert!(resolve_script(&catalog, "clean up").unwrap().contains("Remove-Item"));
        assert_eq!(resolve_script(&catalog, loose.to_str().unwrap()).unwrap(), "Get-Date");
        assert!(resolve_script(&catalog, "nothing").is_err());
    }
}
