// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-target jobs
//!
//! A job is one operation's worth of work against a single target. It owns
//! its status cell, its captured failure and any progress or log state, and
//! is the only writer of those during an invocation.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Job trait and the context shared by jobs of one invocation

pub mod script;
pub mod transfer;

pub use script::ScriptJob;
pub use transfer::{CollectSource, TransferJob, TransferPlan};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::events::{FleetEvent, OperationId, OperationKind};
use crate::domain::job::{JobFailure, JobStatus, Outcome, StatusCell};
use crate::domain::progress::ProgressTotals;
use crate::domain::target::{Target, TargetIdentity};
use crate::infrastructure::event_bus::EventBus;

/// Notified after every individual progress update.
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self);
}

/// Context handed to every job of one invocation.
#[derive(Clone)]
pub struct JobEnv {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub events: EventBus,
    pub progress: Weak<dyn ProgressListener>,
}

impl JobEnv {
    pub fn detached(kind: OperationKind, events: EventBus) -> Self {
        Self {
            operation_id: OperationId::new(),
            kind,
            events,
            progress: Weak::<NoProgress>::new(),
        }
    }

    pub fn notify_progress(&self) {
        if let Some(listener) = self.progress.upgrade() {
            listener.on_progress();
        }
    }

    /// Advances `status` and publishes the change. Illegal transitions are
    /// ignored, which keeps terminal states final.
    pub fn advance<S: JobStatus>(
        &self,
        target: &TargetIdentity,
        status: &StatusCell<S>,
        next: S,
        failure: Option<JobFailure>,
    ) -> bool {
        match status.advance(next) {
            Ok(true) => {
                self.publish_status(target, next, failure);
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!(target = %target, "Ignoring status change: {}", e);
                false
            }
        }
    }

    pub fn publish_status<S: JobStatus>(
        &self,
        target: &TargetIdentity,
        status: S,
        failure: Option<JobFailure>,
    ) {
        self.events.publish(FleetEvent::JobStatusChanged {
            operation_id: self.operation_id,
            kind: self.kind,
            target: target.clone(),
            status: status.to_string(),
            failure,
        });
    }

    pub fn alert(&self, target: &TargetIdentity, message: impl Into<String>) {
        self.events.publish(FleetEvent::alert(
            Some(self.operation_id),
            Some(target.clone()),
            message,
        ));
    }
}

struct NoProgress;

impl ProgressListener for NoProgress {
    fn on_progress(&self) {}
}

/// One target's part of an operation.
#[async_trait]
pub trait FleetJob: Send + Sync + 'static {
    type Status: JobStatus + Serialize;

    fn target(&self) -> &Arc<Target>;

    fn status(&self) -> Self::Status;

    fn failure(&self) -> Option<JobFailure>;

    /// Runs to a terminal state. Job-scoped failures are captured on the job,
    /// never returned.
    async fn run(&self, cancel: CancellationToken) -> Outcome;

    fn progress_totals(&self) -> ProgressTotals {
        ProgressTotals::default()
    }

    /// Settles a non-terminal job to its cancelled state.
    fn settle_cancelled(&self) -> bool;

    /// Records an unexpected failure raised outside the job's own handling.
    fn fail_internal(&self, failure: JobFailure);

    fn outcome(&self) -> Option<Outcome> {
        let status = self.status();
        if !status.is_terminal() {
            None
        } else if status.is_success() {
            Some(Outcome::Success)
        } else if status.is_cancelled() {
            Some(Outcome::Cancelled)
        } else {
            Some(Outcome::Failed(self.failure().unwrap_or_else(|| {
                JobFailure::new(
                    crate::domain::job::FailureKind::Internal,
                    format!("job ended as {status}"),
                )
            })))
        }
    }

    fn report(&self) -> TargetReport {
        TargetReport {
            target: self.target().identity().clone(),
            status: self.status().to_string(),
            outcome: self.outcome(),
            progress: self.progress_totals(),
        }
    }
}

/// Final view of one target after an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: TargetIdentity,
    pub status: String,
    pub outcome: Option<Outcome>,
    pub progress: ProgressTotals,
}
