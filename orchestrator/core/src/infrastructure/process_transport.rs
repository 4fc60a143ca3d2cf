// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Process-backed remote transport
//!
//! Opening a session checks that the target's management port answers
//! within the open timeout. Each invocation then launches the configured
//! program (arguments rendered per target), pipes the scripts to its stdin
//! and turns every output line into a [`RemoteRecord`]:
//!
//! | stdout line                                   | record     |
//! |-----------------------------------------------|------------|
//! | `ERROR: text`                                 | `Error`    |
//! | `WARNING: text`                               | `Warning`  |
//! | `VERBOSE: text`                               | `Verbose`  |
//! | `DEBUG: text`                                 | `Debug`    |
//! | `PROGRESS: id\|percent\|activity\|status[\|op]` | `Progress` |
//! | anything else                                 | `Output`   |
//!
//! Every stderr line is an `Error` record. Credentials reach the program
//! through the `LABFLEET_REMOTE_USERNAME` / `LABFLEET_REMOTE_PASSWORD`
//! environment variables, never through its arguments; the per-operation
//! timeout in milliseconds is exported as `LABFLEET_OPERATION_TIMEOUT_MS`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements the [`RemoteTransport`] port over child processes

use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::config::{render_template, LauncherConfig};
use crate::domain::remote::{
    Credentials, InvocationState, ProgressRecord, RecordSink, RemoteError, RemoteRecord,
    RemoteSession, RemoteTransport, SessionTimeouts,
};
use crate::domain::target::TargetIdentity;

pub const USERNAME_ENV: &str = "LABFLEET_REMOTE_USERNAME";
pub const PASSWORD_ENV: &str = "LABFLEET_REMOTE_PASSWORD";
pub const OPERATION_TIMEOUT_ENV: &str = "LABFLEET_OPERATION_TIMEOUT_MS";

pub struct ProcessTransport {
    launcher: LauncherConfig,
    port: u16,
}

impl ProcessTransport {
    pub fn new(launcher: LauncherConfig, port: u16) -> Self {
        Self { launcher, port }
    }
}

#[async_trait]
impl RemoteTransport for ProcessTransport {
    async fn open_session(
        &self,
        target: &TargetIdentity,
        credentials: &Credentials,
        timeouts: &SessionTimeouts,
    ) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let args = self
            .launcher
            .args
            .iter()
            .map(|arg| render_template(arg, target))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let endpoint = SocketAddr::new(target.address, self.port);
        match tokio::time::timeout(timeouts.open(), TcpStream::connect(endpoint)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(RemoteError::Transport(format!(
                    "cannot connect to {endpoint}: {e}"
                )))
            }
            Err(_) => {
                return Err(RemoteError::Transport(format!(
                    "connecting to {endpoint} timed out after {} ms",
                    timeouts.open().as_millis()
                )))
            }
        }

        debug!(target = %target, "Remote session opened");
        Ok(Box::new(ProcessSession {
            target: target.clone(),
            program: self.launcher.program.clone(),
            args,
            credentials: credentials.clone(),
            operation_timeout_ms: timeouts.operation_ms,
            open: AtomicBool::new(true),
            stop_requested: AtomicBool::new(false),
            running: Mutex::new(None),
        }))
    }
}

pub struct ProcessSession {
    target: TargetIdentity,
    program: String,
    args: Vec<String>,
    credentials: Credentials,
    operation_timeout_ms: u64,
    open: AtomicBool,
    /// Set by a stop that found no running invocation; the next one honors it.
    stop_requested: AtomicBool,
    running: Mutex<Option<CancellationToken>>,
}

enum Pumped {
    Drained,
    Stopped,
}

impl ProcessSession {
    fn spawn(&self) -> std::io::Result<tokio::process::Child> {
        Command::new(&self.program)
            .args(&self.args)
            .env(USERNAME_ENV, &self.credentials.username)
            .env(PASSWORD_ENV, &self.credentials.password)
            .env(OPERATION_TIMEOUT_ENV, self.operation_timeout_ms.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

#[async_trait]
impl RemoteSession for ProcessSession {
    fn target(&self) -> &TargetIdentity {
        &self.target
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn invoke(
        &self,
        scripts: &[String],
        sink: &dyn RecordSink,
    ) -> Result<InvocationState, RemoteError> {
        if !self.is_open() {
            return Err(RemoteError::Transport("session is closed".to_string()));
        }

        let mut child = self.spawn().map_err(|e| {
            self.open.store(false, Ordering::SeqCst);
            RemoteError::Transport(format!("failed to launch {}: {e}", self.program))
        })?;

        let stop = CancellationToken::new();
        {
            let mut running = self.running.lock();
            if self.stop_requested.swap(false, Ordering::SeqCst) {
                debug!(target = %self.target, "Stop requested before launch");
                stop.cancel();
            }
            *running = Some(stop.clone());
        }
        let _running = scopeguard::guard((), |()| {
            let mut running = self.running.lock();
            self.stop_requested.store(false, Ordering::SeqCst);
            *running = None;
        });

        if let Some(mut stdin) = child.stdin.take() {
            let mut input = scripts.join("\n");
            input.push('\n');
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!("Launcher closed stdin early: {}", e);
                }
            });
        }

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(RemoteError::Execution("launcher output is not captured".to_string()));
        };
        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let (mut out_done, mut err_done) = (false, false);

        let pumped = loop {
            if out_done && err_done {
                break Pumped::Drained;
            }
            tokio::select! {
                _ = stop.cancelled() => break Pumped::Stopped,
                line = out_lines.next_line(), if !out_done => match line {
                    Ok(Some(line)) => sink.emit(classify_line(&line)),
                    Ok(None) => out_done = true,
                    Err(e) => {
                        warn!(target = %self.target, "Failed to read launcher stdout: {}", e);
                        out_done = true;
                    }
                },
                line = err_lines.next_line(), if !err_done => match line {
                    Ok(Some(line)) if !line.trim().is_empty() => sink.emit(RemoteRecord::Error(line)),
                    Ok(Some(_)) => {}
                    Ok(None) => err_done = true,
                    Err(e) => {
                        warn!(target = %self.target, "Failed to read launcher stderr: {}", e);
                        err_done = true;
                    }
                },
            }
        };

        let exited: Option<std::io::Result<ExitStatus>> = match pumped {
            Pumped::Stopped => None,
            Pumped::Drained => tokio::select! {
                status = child.wait() => Some(status),
                _ = stop.cancelled() => None,
            },
        };

        match exited {
            None => {
                if let Err(e) = child.kill().await {
                    debug!(target = %self.target, "Launcher already gone: {}", e);
                }
                info!(target = %self.target, "Invocation stopped");
                Ok(InvocationState::Stopped)
            }
            Some(Ok(status)) if status.success() => Ok(InvocationState::Completed),
            Some(Ok(status)) => {
                debug!(target = %self.target, %status, "Launcher exited unsuccessfully");
                Ok(InvocationState::Failed)
            }
            Some(Err(e)) => Err(RemoteError::Execution(e.to_string())),
        }
    }

    async fn stop(&self) {
        let running = self.running.lock();
        match running.as_ref() {
            Some(token) => token.cancel(),
            None => self.stop_requested.store(true, Ordering::SeqCst),
        }
    }
}

/// Maps one launcher stdout line to a record.
pub fn classify_line(line: &str) -> RemoteRecord {
    let tagged = |prefix: &str| line.strip_prefix(prefix).map(str::to_string);

    if let Some(text) = tagged("ERROR: ") {
        RemoteRecord::Error(text)
    } else if let Some(text) = tagged("WARNING: ") {
        RemoteRecord::Warning(text)
    } else if let Some(text) = tagged("VERBOSE: ") {
        RemoteRecord::Verbose(text)
    } else if let Some(text) = tagged("DEBUG: ") {
        RemoteRecord::Debug(text)
    } else if let Some(progress) = line.strip_prefix("PROGRESS: ").and_then(parse_progress) {
        RemoteRecord::Progress(progress)
    } else {
        RemoteRecord::Output(line.to_string())
    }
}

fn parse_progress(body: &str) -> Option<ProgressRecord> {
    let mut fields = body.splitn(5, '|');
    let activity_id = fields.next()?.trim().parse().ok()?;
    let percent_complete = fields.next()?.trim().parse().ok()?;
    let activity = fields.next()?.to_string();
    let status = fields.next().unwrap_or_default().to_string();
    let current_operation = fields.next().map(str::to_string).filter(|op| !op.is_empty());
    Some(ProgressRecord {
        activity_id,
        activity,
        status,
        current_operation,
        percent_complete,
    })
}
