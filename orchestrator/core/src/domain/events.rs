// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::job::JobFailure;
use crate::domain::script_log::LogEntry;
use crate::domain::target::{TargetIdentity, TargetState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CopyOut,
    CopyIn,
    ScriptRun,
    AccessToggle,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationKind::CopyOut => "copy-out",
            OperationKind::CopyIn => "copy-in",
            OperationKind::ScriptRun => "script-run",
            OperationKind::AccessToggle => "access-toggle",
        };
        f.write_str(label)
    }
}

/// Everything observers can subscribe to. Emitted on the event bus; no UI
/// framework is involved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FleetEvent {
    TargetAdded {
        target: TargetIdentity,
    },
    TargetRemoved {
        target: TargetIdentity,
    },
    TargetUpdated {
        target: TargetIdentity,
        state: TargetState,
    },
    OperationStarted {
        operation_id: OperationId,
        kind: OperationKind,
        target_count: usize,
        started_at: DateTime<Utc>,
    },
    JobStatusChanged {
        operation_id: OperationId,
        kind: OperationKind,
        target: TargetIdentity,
        status: String,
        failure: Option<JobFailure>,
    },
    ProgressUpdated {
        operation_id: OperationId,
        kind: OperationKind,
        transferred: u64,
        total: u64,
        fraction: f64,
    },
    LogAppended {
        operation_id: OperationId,
        target: TargetIdentity,
        index: usize,
        entry: LogEntry,
    },
    LogUpdated {
        operation_id: OperationId,
        target: TargetIdentity,
        index: usize,
        entry: LogEntry,
    },
    OperationFinished {
        operation_id: OperationId,
        kind: OperationKind,
        cancelled: bool,
        finished_at: DateTime<Utc>,
    },
    /// Non-fatal problem the operator should see.
    Alert {
        operation_id: Option<OperationId>,
        target: Option<TargetIdentity>,
        message: String,
        raised_at: DateTime<Utc>,
    },
}

impl FleetEvent {
    pub fn operation_id(&self) -> Option<OperationId> {
        match self {
            FleetEvent::OperationStarted { operation_id, .. }
            | FleetEvent::JobStatusChanged { operation_id, .. }
            | FleetEvent::ProgressUpdated { operation_id, .. }
            | FleetEvent::LogAppended { operation_id, .. }
            | FleetEvent::LogUpdated { operation_id, .. }
            | FleetEvent::OperationFinished { operation_id, .. } => Some(*operation_id),
            FleetEvent::Alert { operation_id, .. } => *operation_id,
            FleetEvent::TargetAdded { .. }
            | FleetEvent::TargetRemoved { .. }
            | FleetEvent::TargetUpdated { .. } => None,
        }
    }

    /// The target an event concerns, if it concerns exactly one.
    pub fn target(&self) -> Option<&TargetIdentity> {
        match self {
            FleetEvent::TargetAdded { target }
            | FleetEvent::TargetRemoved { target }
            | FleetEvent::TargetUpdated { target, .. }
            | FleetEvent::JobStatusChanged { target, .. }
            | FleetEvent::LogAppended { target, .. }
            | FleetEvent::LogUpdated { target, .. } => Some(target),
            FleetEvent::Alert { target, .. } => target.as_ref(),
            FleetEvent::OperationStarted { .. }
            | FleetEvent::ProgressUpdated { .. }
            | FleetEvent::OperationFinished { .. } => None,
        }
    }

    pub fn alert(
        operation_id: Option<OperationId>,
        target: Option<TargetIdentity>,
        message: impl Into<String>,
    ) -> Self {
        FleetEvent::Alert {
            operation_id,
            target,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}
