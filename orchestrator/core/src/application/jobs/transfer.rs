// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Copy-Out / Copy-In job
//!
//! `Waiting -> Copying -> {Success | Failed | Cancelled}`. Files are copied
//! one after another; the first progress callback moves the job to
//! `Copying`, the last completed file to `Success`.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Per-target file distribution and collection

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::collection::enumerate_files;
use crate::application::jobs::{FleetJob, JobEnv};
use crate::application::transfer_engine::TransferEngine;
use crate::domain::job::{FailureKind, JobFailure, Outcome, StatusCell, TransferStatus};
use crate::domain::progress::{ItemProgress, ProgressTotals, TransferLedger};
use crate::domain::target::Target;
use crate::domain::transfer::CopyError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Remote tree to collect from one target.
#[derive(Debug, Clone)]
pub struct CollectSource {
    pub root: PathBuf,
    /// Target-specific local directory receiving the files.
    pub destination: PathBuf,
    pub pattern: glob::Pattern,
    pub recurse: bool,
}

#[derive(Debug, Clone)]
pub enum TransferPlan {
    /// Explicit source/destination pairs (Copy-Out).
    Files(Vec<FilePair>),
    /// Enumerated when the job starts (Copy-In).
    Collect(CollectSource),
}

pub struct TransferJob {
    target: Arc<Target>,
    plan: TransferPlan,
    engine: Arc<TransferEngine>,
    env: JobEnv,
    status: StatusCell<TransferStatus>,
    ledger: TransferLedger,
    failure: Mutex<Option<JobFailure>>,
}

impl TransferJob {
    pub fn new(
        target: Arc<Target>,
        plan: TransferPlan,
        engine: Arc<TransferEngine>,
        env: JobEnv,
    ) -> Self {
        Self {
            target,
            plan,
            engine,
            env,
            status: StatusCell::default(),
            ledger: TransferLedger::new(),
            failure: Mutex::new(None),
        }
    }

    pub fn plan(&self) -> &TransferPlan {
        &self.plan
    }

    pub fn items(&self) -> BTreeMap<PathBuf, ItemProgress> {
        self.ledger.snapshot()
    }

    async fn resolve_plan(&self) -> Result<Vec<FilePair>, JobFailure> {
        let collect = match &self.plan {
            TransferPlan::Files(pairs) => return Ok(pairs.clone()),
            TransferPlan::Collect(collect) => collect.clone(),
        };

        let root = collect.root.clone();
        let destination = collect.destination.clone();
        let files = tokio::task::spawn_blocking(move || {
            enumerate_files(&collect.root, &collect.pattern, collect.recurse)
        })
        .await
        .map_err(|e| JobFailure::new(FailureKind::Internal, format!("enumeration task failed: {e}")))?
        .map_err(|e| {
            JobFailure::io(
                format!("cannot enumerate {}: {e}", root.display()),
                e.raw_os_error(),
            )
        })?;

        Ok(files
            .into_iter()
            .map(|file| FilePair {
                destination: destination.join(&file.relative),
                source: file.source,
            })
            .collect())
    }

    fn settle(&self, outcome_if_pending: Outcome) -> Outcome {
        self.outcome().unwrap_or(outcome_if_pending)
    }

    fn cancelled(&self) -> Outcome {
        if self.settle_cancelled() {
            info!(target = %self.target.identity(), "Transfer cancelled");
        }
        self.settle(Outcome::Cancelled)
    }

    fn fail(&self, failure: JobFailure) -> Outcome {
        warn!(target = %self.target.identity(), "Transfer failed: {}", failure);
        *self.failure.lock() = Some(failure.clone());
        self.env.advance(
            self.target.identity(),
            &self.status,
            TransferStatus::Failed,
            Some(failure.clone()),
        );
        self.settle(Outcome::Failed(failure))
    }
}

#[async_trait]
impl FleetJob for TransferJob {
    type Status = TransferStatus;

    fn target(&self) -> &Arc<Target> {
        &self.target
    }

    fn status(&self) -> TransferStatus {
        self.status.get()
    }

    fn failure(&self) -> Option<JobFailure> {
        self.failure.lock().clone()
    }

    async fn run(&self, cancel: CancellationToken) -> Outcome {
        let identity = self.target.identity();
        if cancel.is_cancelled() {
            return self.cancelled();
        }

        let pairs = match self.resolve_plan().await {
            Ok(pairs) => pairs,
            Err(failure) => return self.fail(failure),
        };

        for pair in &pairs {
            let result = self
                .engine
                .copy(&pair.source, &pair.destination, &cancel, |transferred, total| {
                    self.ledger.record(&pair.source, transferred, total);
                    self.env
                        .advance(identity, &self.status, TransferStatus::Copying, None);
                    self.env.notify_progress();
                })
                .await;

            match result {
                Ok(()) => {}
                Err(CopyError::Cancelled) => return self.cancelled(),
                Err(e) => return self.fail(JobFailure::io(e.to_string(), e.os_code())),
            }
        }

        self.env
            .advance(identity, &self.status, TransferStatus::Success, None);
        self.settle(Outcome::Success)
    }

    fn progress_totals(&self) -> ProgressTotals {
        self.ledger.totals()
    }

    fn settle_cancelled(&self) -> bool {
        if self.status.cancel_if_pending() {
            self.env
                .publish_status(self.target.identity(), TransferStatus::Cancelled, None);
            return true;
        }
        false
    }

    fn fail_internal(&self, failure: JobFailure) {
        *self.failure.lock() = Some(failure.clone());
        if self.status.fail_if_pending() {
            self.env
                .publish_status(self.target.identity(), TransferStatus::Failed, Some(failure));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::OperationKind;
    use crate::domain::target::TargetIdentity;
    use crate::domain::transfer::{ChunkControl, FileCopier};
    use crate::infrastructure::event_bus::EventBus;
    use std::path::Path;

    struct FailingCopier;

    #[async_trait]
    impl FileCopier for FailingCopier {
        async fn copy_file(
            &self,
            source: &Path,
            _destination: &Path,
            _cancel: &CancellationToken,
            on_chunk: &mut (dyn FnMut(u64, u64) -> ChunkControl + Send),
        ) -> Result<(), CopyError> {
            on_chunk(10, 100);
            Err(CopyError::io(
                source,
                std::io::Error::from_raw_os_error(13),
            ))
        }
    }

    fn job(plan: TransferPlan, copier: Arc<dyn FileCopier>) -> TransferJob {
        let target = Arc::new(Target::new(TargetIdentity::new(
            "10.0.0.1".parse().unwrap(),
            "pc01",
        )));
        TransferJob::new(
            target,
            plan,
            Arc::new(TransferEngine::new(copier)),
            JobEnv::detached(OperationKind::CopyOut, EventBus::new(16)),
        )
    }

    #[tokio::test]
    async fn test_empty_plan_succeeds_with_zero_progress() {
        let job = job(TransferPlan::Files(vec![]), Arc::new(FailingCopier));
        let outcome = job.run(CancellationToken::new()).await;

        assert_eq!(outcome, Outcome::Success);
        assert_eq!(job.status(), TransferStatus::Success);
        assert_eq!(job.progress_totals().fraction(), 0.0);
    }

    #[tokio::test]
    async fn test_io_failure_keeps_os_code() {
        let plan = TransferPlan::Files(vec![FilePair {
            source: PathBuf::from("/src/a"),
            destination: PathBuf::from("/dst/a"),
        }]);
        let job = job(plan, Arc::new(FailingCopier));
        let outcome = job.run(CancellationToken::new()).await;

        match outcome {
            Outcome::Failed(failure) => {
                assert_eq!(failure.kind, FailureKind::Io);
                assert_eq!(failure.os_code, Some(13));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(job.status(), TransferStatus::Failed);
        assert!(job.failure().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_while_waiting() {
        let job = job(TransferPlan::Files(vec![]), Arc::new(FailingCopier));
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(job.run(token).await, Outcome::Cancelled);
        assert_eq!(job.status(), TransferStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_missing_collect_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let plan = TransferPlan::Collect(CollectSource {
            root: dir.path().join("absent"),
            destination: dir.path().join("out"),
            pattern: glob::Pattern::new("*").unwrap(),
            recurse: false,
        });
        let job = job(plan, Arc::new(FailingCopier));

        assert!(matches!(job.run(CancellationToken::new()).await, Outcome::Failed(_)));
    }
}
