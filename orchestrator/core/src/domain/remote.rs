// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Remote execution port
//!
//! The core only sees an opaque transport: open a session to a target, invoke
//! script text on it while records stream back, stop it. The wire protocol
//! lives behind [`RemoteTransport`].
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Outbound port for remote script execution

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::target::TargetIdentity;

/// Opaque credentials passed through to the transport.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTimeouts {
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
    #[serde(default = "default_operation_ms")]
    pub operation_ms: u64,
    #[serde(default = "default_open_ms")]
    pub open_ms: u64,
}

fn default_idle_ms() -> u64 {
    60_000
}

fn default_operation_ms() -> u64 {
    1_000
}

fn default_open_ms() -> u64 {
    1_000
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            idle_ms: default_idle_ms(),
            operation_ms: default_operation_ms(),
            open_ms: default_open_ms(),
        }
    }
}

impl SessionTimeouts {
    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    pub fn operation(&self) -> Duration {
        Duration::from_millis(self.operation_ms)
    }

    pub fn open(&self) -> Duration {
        Duration::from_millis(self.open_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub activity_id: i32,
    pub activity: String,
    pub status: String,
    pub current_operation: Option<String>,
    /// Negative when the remote side does not know the percentage.
    pub percent_complete: i32,
}

/// One record streamed back during an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RemoteRecord {
    Error(String),
    Warning(String),
    Verbose(String),
    Debug(String),
    Progress(ProgressRecord),
    /// Pipeline output rendered as text.
    Output(String),
}

/// Receives records while an invocation is running.
pub trait RecordSink: Send + Sync {
    fn emit(&self, record: RemoteRecord);
}

/// Final state reported by the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Completed,
    Failed,
    Stopped,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The session could not be opened or was severed.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("remote execution failed: {0}")]
    Execution(String),

    #[error("the pipeline has been stopped")]
    Stopped,
}

#[async_trait]
pub trait RemoteSession: Send + Sync {
    fn target(&self) -> &TargetIdentity;

    /// Health flag. A closed session is never handed out again.
    fn is_open(&self) -> bool;

    async fn invoke(
        &self,
        scripts: &[String],
        sink: &dyn RecordSink,
    ) -> Result<InvocationState, RemoteError>;

    /// Requests an in-band stop of the running invocation, if any.
    async fn stop(&self);
}

#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn open_session(
        &self,
        target: &TargetIdentity,
        credentials: &Credentials,
        timeouts: &SessionTimeouts,
    ) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// Sink that keeps every record, used for short queries such as the access check.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: parking_lot::Mutex<Vec<RemoteRecord>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_records(self) -> Vec<RemoteRecord> {
        self.records.into_inner()
    }
}

impl RecordSink for CollectingSink {
    fn emit(&self, record: RemoteRecord) {
        self.records.lock().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials {
            username: "labadmin".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("labadmin"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = SessionTimeouts::default();
        assert_eq!(timeouts.idle(), Duration::from_secs(60));
        assert_eq!(timeouts.open(), Duration::from_secs(1));
        assert_eq!(timeouts.operation(), Duration::from_secs(1));
    }

    #[test]
    fn test_collecting_sink_keeps_order() {
        let sink = CollectingSink::new();
        sink.emit(RemoteRecord::Output("1".into()));
        sink.emit(RemoteRecord::Warning("careful".into()));
        assert_eq!(
            sink.into_records(),
            vec![
                RemoteRecord::Output("1".into()),
                RemoteRecord::Warning("careful".into())
            ]
        );
    }
}
