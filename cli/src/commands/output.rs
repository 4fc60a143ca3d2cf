// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Terminal rendering shared by the operation commands
//!
//! Drives an operation future while a progress bar follows the event bus,
//! turns Ctrl-C into a cooperative cancel and prints the final report.

use anyhow::{bail, Result};
use colored::{ColoredString, Colorize};
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;

use labfleet_core::application::{OperationReport, OrchestratorError};
use labfleet_core::domain::events::{FleetEvent, OperationKind};
use labfleet_core::domain::job::{Outcome, ScriptStatus, TransferStatus};
use labfleet_core::domain::progress::format_bytes;
use labfleet_core::domain::script_log::{LogEntry, LogLevel};
use labfleet_core::infrastructure::EventBusError;

use crate::services::FleetServices;

/// Runs `operation` to completion with live progress. The first Ctrl-C
/// requests cancellation; the operation still runs until every job settles.
pub async fn drive<F>(
    services: &FleetServices,
    kind: OperationKind,
    operation: F,
) -> Result<OperationReport>
where
    F: Future<Output = Result<OperationReport, OrchestratorError>>,
{
    let bar = progress_bar(kind);
    let mut events = services.events.subscribe();
    let printer_bar = bar.clone();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => render_event(&printer_bar, kind, &event),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });

    tokio::pin!(operation);
    let mut cancelling = false;
    let result = loop {
        tokio::select! {
            result = &mut operation => break result,
            signal = tokio::signal::ctrl_c(), if !cancelling => {
                signal?;
                cancelling = true;
                bar.println(format!("{}", "Cancelling, waiting for running jobs...".yellow()));
                services.orchestrator.cancel(kind);
            }
        }
    };

    printer.abort();
    bar.finish_and_clear();
    Ok(result?)
}

fn progress_bar(kind: OperationKind) -> ProgressBar {
    let template = match kind {
        OperationKind::CopyOut | OperationKind::CopyIn => {
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})"
        }
        _ => "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} targets",
    };
    let style = ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    let bar = ProgressBar::new(0);
    bar.set_style(style);
    bar
}

fn render_event(bar: &ProgressBar, kind: OperationKind, event: &FleetEvent) {
    let transfer = matches!(kind, OperationKind::CopyOut | OperationKind::CopyIn);
    match event {
        FleetEvent::OperationStarted {
            kind: k,
            target_count,
            ..
        } if *k == kind && !transfer => bar.set_length(*target_count as u64),
        FleetEvent::ProgressUpdated {
            kind: k,
            transferred,
            total,
            ..
        } if *k == kind && transfer => {
            bar.set_length(*total);
            bar.set_position(*transferred);
        }
        FleetEvent::JobStatusChanged {
            kind: k,
            target,
            status,
            failure,
            ..
        } if *k == kind => {
            if !transfer && is_terminal_label(status) {
                bar.inc(1);
            }
            let mut line = format!("{:<16} {}", target.name.bold(), colorize_status(status));
            if let Some(failure) = failure {
                line.push_str(&format!("  {}", failure.to_string().red()));
            }
            bar.println(line);
        }
        FleetEvent::LogAppended { target, entry, .. } if kind == OperationKind::ScriptRun => {
            if let LogEntry::Message { level, text } = entry {
                let tag = match level {
                    LogLevel::Error => "ERROR".red(),
                    LogLevel::Warning => "WARNING".yellow(),
                    LogLevel::Verbose => "VERBOSE".dimmed(),
                    LogLevel::Debug => "DEBUG".dimmed(),
                };
                bar.println(format!("[{}] {}: {}", target.name, tag, text));
            }
        }
        FleetEvent::Alert {
            target, message, ..
        } => {
            let who = target.as_ref().map(|t| t.name.as_str()).unwrap_or("fleet");
            bar.println(format!("{} {}: {}", "!".red().bold(), who, message));
        }
        _ => {}
    }
}

fn is_terminal_label(label: &str) -> bool {
    let transfer = [
        TransferStatus::Success,
        TransferStatus::Failed,
        TransferStatus::Cancelled,
    ];
    let script = [
        ScriptStatus::Completed,
        ScriptStatus::Failed,
        ScriptStatus::CouldntConnect,
        ScriptStatus::Cancelled,
    ];
    transfer.iter().any(|s| s.to_string() == label) || script.iter().any(|s| s.to_string() == label)
}

pub fn colorize_status(label: &str) -> ColoredString {
    match label {
        "success" | "completed" => label.green(),
        "failed" | "couldn't connect" => label.red(),
        "cancelled" | "cancelling" => label.yellow(),
        _ => label.normal(),
    }
}

/// Prints one line per target and a summary. Fails when any target failed.
pub fn print_report(report: &OperationReport) -> Result<()> {
    println!();
    println!("{}", format!("{} {}", report.kind, report.operation_id).bold());
    for target in &report.targets {
        let detail = match &target.outcome {
            Some(Outcome::Failed(failure)) => failure.to_string(),
            _ if target.progress.total > 0 => format!(
                "{} / {}",
                format_bytes(target.progress.transferred),
                format_bytes(target.progress.total)
            ),
            _ => String::new(),
        };
        println!(
            "  {:<16} {:<15} {:<18} {}",
            target.target.name,
            target.target.address,
            colorize_status(&target.status),
            detail.dimmed()
        );
    }

    let failed = report.failed();
    println!();
    println!(
        "{} succeeded, {} failed, {} cancelled",
        report.succeeded().to_string().green(),
        failed.to_string().red(),
        report.cancelled_count().to_string().yellow()
    );
    if failed > 0 {
        bail!("{failed} target(s) failed");
    }
    Ok(())
}
