// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Job state machines
//!
//! Status enums for each operation family and the [`StatusCell`] that makes
//! their transitions monotonic: a job never moves back to an earlier
//! non-terminal state and never leaves a terminal one.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Per-target job status, captured failures and outcomes

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Common behaviour of the per-family status enums.
pub trait JobStatus: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Position in the state machine. Terminal states share the highest rank.
    fn rank(self) -> u8;

    fn is_terminal(self) -> bool;

    /// The state a pending job settles to when its operation is cancelled.
    fn cancelled() -> Self;

    /// The state a job settles to on an internal failure.
    fn failed() -> Self;

    fn initial() -> Self;

    fn is_success(self) -> bool;

    fn is_cancelled(self) -> bool {
        self == Self::cancelled()
    }
}

/// Copy-Out / Copy-In job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Waiting,
    Copying,
    Success,
    Failed,
    Cancelled,
}

impl JobStatus for TransferStatus {
    fn rank(self) -> u8 {
        match self {
            TransferStatus::Waiting => 0,
            TransferStatus::Copying => 1,
            TransferStatus::Success | TransferStatus::Failed | TransferStatus::Cancelled => 2,
        }
    }

    fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    fn cancelled() -> Self {
        TransferStatus::Cancelled
    }

    fn failed() -> Self {
        TransferStatus::Failed
    }

    fn initial() -> Self {
        TransferStatus::Waiting
    }

    fn is_success(self) -> bool {
        self == TransferStatus::Success
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransferStatus::Waiting => "waiting",
            TransferStatus::Copying => "copying",
            TransferStatus::Success => "success",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Script-Run job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStatus {
    Waiting,
    Connecting,
    Invoking,
    /// A stop was requested and the remote side has not acknowledged it yet.
    Cancelling,
    Completed,
    Failed,
    CouldntConnect,
    Cancelled,
}

impl JobStatus for ScriptStatus {
    fn rank(self) -> u8 {
        match self {
            ScriptStatus::Waiting => 0,
            ScriptStatus::Connecting => 1,
            ScriptStatus::Invoking => 2,
            ScriptStatus::Cancelling => 3,
            ScriptStatus::Completed
            | ScriptStatus::Failed
            | ScriptStatus::CouldntConnect
            | ScriptStatus::Cancelled => 4,
        }
    }

    fn is_terminal(self) -> bool {
        self.rank() == 4
    }

    fn cancelled() -> Self {
        ScriptStatus::Cancelled
    }

    fn failed() -> Self {
        ScriptStatus::Failed
    }

    fn initial() -> Self {
        ScriptStatus::Waiting
    }

    fn is_success(self) -> bool {
        self == ScriptStatus::Completed
    }
}

impl fmt::Display for ScriptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScriptStatus::Waiting => "waiting",
            ScriptStatus::Connecting => "connecting",
            ScriptStatus::Invoking => "invoking",
            ScriptStatus::Cancelling => "cancelling",
            ScriptStatus::Completed => "completed",
            ScriptStatus::Failed => "failed",
            ScriptStatus::CouldntConnect => "couldn't connect",
            ScriptStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("illegal status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: String,
    pub to: String,
}

/// Holds a job's status and enforces monotonic transitions.
#[derive(Debug)]
pub struct StatusCell<S> {
    current: Mutex<S>,
}

impl<S: JobStatus> Default for StatusCell<S> {
    fn default() -> Self {
        Self::new(S::initial())
    }
}

impl<S: JobStatus> StatusCell<S> {
    pub fn new(initial: S) -> Self {
        Self {
            current: Mutex::new(initial),
        }
    }

    pub fn get(&self) -> S {
        *self.current.lock()
    }

    /// Moves to `next`. Returns `Ok(true)` when the status changed and
    /// `Ok(false)` when `next` equals the current non-terminal status.
    pub fn advance(&self, next: S) -> Result<bool, TransitionError> {
        let mut current = self.current.lock();
        if *current == next && !current.is_terminal() {
            return Ok(false);
        }
        if current.is_terminal() || next.rank() < current.rank() {
            return Err(TransitionError {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        *current = next;
        Ok(true)
    }

    /// Settles a non-terminal job to the cancelled state. Returns whether it did.
    pub fn cancel_if_pending(&self) -> bool {
        let mut current = self.current.lock();
        if current.is_terminal() {
            return false;
        }
        *current = S::cancelled();
        true
    }

    /// Settles a non-terminal job to the failed state. Returns whether it did.
    pub fn fail_if_pending(&self) -> bool {
        let mut current = self.current.lock();
        if current.is_terminal() {
            return false;
        }
        *current = S::failed();
        true
    }
}

/// Classification of a captured job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Session could not be opened or was severed.
    Transport,
    /// The script raised an error or the remote process failed.
    RemoteExecution,
    /// Local or destination filesystem failure.
    Io,
    /// Anything the job did not anticipate.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    /// OS error code, when the failure came from the OS.
    pub os_code: Option<i32>,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            os_code: None,
        }
    }

    pub fn io(message: impl Into<String>, os_code: Option<i32>) -> Self {
        Self {
            kind: FailureKind::Io,
            message: message.into(),
            os_code,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.os_code {
            Some(code) => write!(f, "{} (os error {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Terminal result of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed(JobFailure),
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }
}
