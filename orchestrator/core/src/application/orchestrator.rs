// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fleet Orchestrator
//!
//! Fans one logical operation out into a job per selected target and runs
//! them all concurrently. Throttling happens downstream in the session pool,
//! not here. One invocation per operation kind may be active at a time.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Fan-out, progress aggregation, cancellation and reporting

use chrono::Utc;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::access::{AccessController, AccessError};
use crate::application::collection::{enumerate_files, CollectionPreview};
use crate::application::jobs::transfer::FilePair;
use crate::application::jobs::{
    CollectSource, FleetJob, JobEnv, ProgressListener, ScriptJob, TargetReport, TransferJob,
    TransferPlan,
};
use crate::application::session_pool::SessionPool;
use crate::application::transfer_engine::TransferEngine;
use crate::domain::config::{render_template, ConfigError, FleetConfig};
use crate::domain::events::{FleetEvent, OperationId, OperationKind};
use crate::domain::job::{FailureKind, JobFailure};
use crate::domain::progress::ProgressTotals;
use crate::domain::target::{Target, TargetIdentity};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("a {0} operation is already running")]
    AlreadyRunning(OperationKind),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Per-target results of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationReport {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub cancelled: bool,
    pub progress: ProgressTotals,
    pub targets: Vec<TargetReport>,
}

impl OperationReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| o.is_success())
    }

    pub fn cancelled_count(&self) -> usize {
        self.count(|o| o.is_cancelled())
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, crate::domain::job::Outcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&crate::domain::job::Outcome) -> bool) -> usize {
        self.targets
            .iter()
            .filter(|t| t.outcome.as_ref().is_some_and(&pred))
            .count()
    }
}

/// One kind of operation and its latest invocation.
pub struct Operation<J: FleetJob> {
    kind: OperationKind,
    events: EventBus,
    running: AtomicBool,
    cancelling: AtomicBool,
    cancel: Mutex<CancellationToken>,
    current: Mutex<Option<OperationId>>,
    jobs: RwLock<Vec<Arc<J>>>,
    totals: Mutex<ProgressTotals>,
}

impl<J: FleetJob> Operation<J> {
    pub fn new(kind: OperationKind, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            kind,
            events,
            running: AtomicBool::new(false),
            cancelling: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            current: Mutex::new(None),
            jobs: RwLock::new(Vec::new()),
            totals: Mutex::new(ProgressTotals::default()),
        })
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::SeqCst)
    }

    pub fn current_operation(&self) -> Option<OperationId> {
        *self.current.lock()
    }

    /// Jobs of the latest invocation.
    pub fn jobs(&self) -> Vec<Arc<J>> {
        self.jobs.read().clone()
    }

    pub fn totals(&self) -> ProgressTotals {
        *self.totals.lock()
    }

    pub fn progress(&self) -> f64 {
        self.totals().fraction()
    }

    /// Requests cancellation of the running invocation. Returns false when
    /// nothing is running.
    pub fn cancel(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.cancelling.store(true, Ordering::SeqCst);
        self.cancel.lock().cancel();
        info!(kind = %self.kind, "Cancellation requested");
        true
    }

    fn recompute_progress(&self) {
        let totals: ProgressTotals = self
            .jobs
            .read()
            .iter()
            .map(|job| job.progress_totals())
            .sum();
        *self.totals.lock() = totals;

        if let Some(operation_id) = self.current_operation() {
            self.events.publish(FleetEvent::ProgressUpdated {
                operation_id,
                kind: self.kind,
                transferred: totals.transferred,
                total: totals.total,
                fraction: totals.fraction(),
            });
        }
    }

    /// Runs one job per target to completion.
    ///
    /// `make_job` builds each job before anything starts; an error there
    /// aborts the invocation without running any job.
    pub async fn run<F>(
        self: &Arc<Self>,
        targets: &[Arc<Target>],
        make_job: F,
    ) -> Result<OperationReport, OrchestratorError>
    where
        F: Fn(Arc<Target>, JobEnv) -> Result<J, OrchestratorError>,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::AlreadyRunning(self.kind));
        }
        scopeguard::defer! {
            self.running.store(false, Ordering::SeqCst);
            self.cancelling.store(false, Ordering::SeqCst);
        }

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        let operation_id = OperationId::new();
        let listener: Weak<dyn ProgressListener> = Arc::downgrade(self) as Weak<dyn ProgressListener>;
        let env = JobEnv {
            operation_id,
            kind: self.kind,
            events: self.events.clone(),
            progress: listener,
        };

        let jobs = targets
            .iter()
            .map(|target| make_job(target.clone(), env.clone()).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        *self.jobs.write() = jobs.clone();
        *self.current.lock() = Some(operation_id);
        *self.totals.lock() = ProgressTotals::default();

        info!(%operation_id, kind = %self.kind, targets = jobs.len(), "Operation started");
        self.events.publish(FleetEvent::OperationStarted {
            operation_id,
            kind: self.kind,
            target_count: jobs.len(),
            started_at: Utc::now(),
        });

        let handles: Vec<_> = jobs
            .iter()
            .map(|job| {
                let job = job.clone();
                let token = token.clone();
                tokio::spawn(async move { job.run(token).await })
            })
            .collect();

        for (job, joined) in jobs.iter().zip(join_all(handles).await) {
            if let Err(e) = joined {
                let identity = job.target().identity();
                error!(target = %identity, "Job worker crashed: {}", e);
                job.fail_internal(JobFailure::new(
                    FailureKind::Internal,
                    format!("job worker crashed: {e}"),
                ));
                self.events.publish(FleetEvent::alert(
                    Some(operation_id),
                    Some(identity.clone()),
                    format!("{} on {} crashed: {e}", self.kind, identity),
                ));
            }
        }

        let cancelled = token.is_cancelled();
        if cancelled {
            for job in &jobs {
                job.settle_cancelled();
            }
        }

        self.recompute_progress();
        let report = OperationReport {
            operation_id,
            kind: self.kind,
            cancelled,
            progress: self.totals(),
            targets: jobs.iter().map(|job| job.report()).collect(),
        };

        info!(
            %operation_id,
            kind = %self.kind,
            cancelled,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Operation finished"
        );
        self.events.publish(FleetEvent::OperationFinished {
            operation_id,
            kind: self.kind,
            cancelled,
            finished_at: Utc::now(),
        });

        Ok(report)
    }
}

impl<J: FleetJob> ProgressListener for Operation<J> {
    fn on_progress(&self) {
        self.recompute_progress();
    }
}

/// Entry point for the four fleet operations.
pub struct FleetOrchestrator {
    config: Arc<FleetConfig>,
    events: EventBus,
    pool: Arc<SessionPool>,
    engine: Arc<TransferEngine>,
    access: Arc<AccessController>,
    copy_out: Arc<Operation<TransferJob>>,
    copy_in: Arc<Operation<TransferJob>>,
    scripts: Arc<Operation<ScriptJob>>,
}

impl FleetOrchestrator {
    pub fn new(
        config: Arc<FleetConfig>,
        events: EventBus,
        pool: Arc<SessionPool>,
        engine: Arc<TransferEngine>,
        access: Arc<AccessController>,
    ) -> Self {
        Self {
            copy_out: Operation::new(OperationKind::CopyOut, events.clone()),
            copy_in: Operation::new(OperationKind::CopyIn, events.clone()),
            scripts: Operation::new(OperationKind::ScriptRun, events.clone()),
            config,
            events,
            pool,
            engine,
            access,
        }
    }

    pub fn copy_out(&self) -> &Arc<Operation<TransferJob>> {
        &self.copy_out
    }

    pub fn copy_in(&self) -> &Arc<Operation<TransferJob>> {
        &self.copy_in
    }

    pub fn scripts(&self) -> &Arc<Operation<ScriptJob>> {
        &self.scripts
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn access(&self) -> &Arc<AccessController> {
        &self.access
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cancel(&self, kind: OperationKind) -> bool {
        match kind {
            OperationKind::CopyOut => self.copy_out.cancel(),
            OperationKind::CopyIn => self.copy_in.cancel(),
            OperationKind::ScriptRun => self.scripts.cancel(),
            OperationKind::AccessToggle => false,
        }
    }

    /// Copy-Out: pushes `files` into every target's rendered send destination.
    pub async fn send_files(
        &self,
        targets: &[Arc<Target>],
        files: &[PathBuf],
    ) -> Result<OperationReport, OrchestratorError> {
        let names = files
            .iter()
            .map(|file| {
                file.file_name().map(PathBuf::from).ok_or_else(|| {
                    OrchestratorError::InvalidRequest(format!(
                        "{} does not name a file",
                        file.display()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let template = self.config.send.destination_template.clone();
        self.copy_out
            .run(targets, |target, env| {
                let root = PathBuf::from(render_template(&template, target.identity())?);
                let pairs = files
                    .iter()
                    .zip(&names)
                    .map(|(source, name)| FilePair {
                        source: source.clone(),
                        destination: root.join(name),
                    })
                    .collect();
                Ok(TransferJob::new(
                    target,
                    TransferPlan::Files(pairs),
                    self.engine.clone(),
                    env,
                ))
            })
            .await
    }

    fn collect_source(&self, target: &TargetIdentity) -> Result<CollectSource, OrchestratorError> {
        let collect = &self.config.collect;
        Ok(CollectSource {
            root: PathBuf::from(render_template(&collect.source_template, target)?),
            destination: collect.destination.join(&target.name),
            pattern: collect.compiled_pattern()?,
            recurse: collect.recurse,
        })
    }

    /// Copy-In: pulls matching files from every target into
    /// `<collect.destination>/<target name>/`.
    pub async fn collect_files(
        &self,
        targets: &[Arc<Target>],
    ) -> Result<OperationReport, OrchestratorError> {
        self.copy_in
            .run(targets, |target, env| {
                let source = self.collect_source(target.identity())?;
                Ok(TransferJob::new(
                    target,
                    TransferPlan::Collect(source),
                    self.engine.clone(),
                    env,
                ))
            })
            .await
    }

    /// Lists what a collection would copy, per target, without copying.
    pub async fn preview_collection(
        &self,
        targets: &[Arc<Target>],
    ) -> Result<Vec<CollectionPreview>, OrchestratorError> {
        let sources = targets
            .iter()
            .map(|target| {
                self.collect_source(target.identity())
                    .map(|source| (target.identity().clone(), source))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let handles: Vec<_> = sources
            .into_iter()
            .map(|(identity, source)| {
                tokio::task::spawn_blocking(move || {
                    let listed = enumerate_files(&source.root, &source.pattern, source.recurse);
                    let (files, error) = match listed {
                        Ok(files) => (files, None),
                        Err(e) => (Vec::new(), Some(e.to_string())),
                    };
                    CollectionPreview {
                        target: identity,
                        root: source.root,
                        files,
                        error,
                    }
                })
            })
            .collect();

        let mut previews = Vec::with_capacity(handles.len());
        for (target, joined) in targets.iter().zip(join_all(handles).await) {
            match joined {
                Ok(preview) => previews.push(preview),
                Err(e) => previews.push(CollectionPreview {
                    target: target.identity().clone(),
                    root: PathBuf::new(),
                    files: Vec::new(),
                    error: Some(format!("enumeration task failed: {e}")),
                }),
            }
        }
        Ok(previews)
    }

    /// Script-Run: executes `scripts` in order on every target.
    pub async fn run_scripts(
        &self,
        targets: &[Arc<Target>],
        scripts: Vec<String>,
    ) -> Result<OperationReport, OrchestratorError> {
        if scripts.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "no scripts selected".to_string(),
            ));
        }
        let scripts: Arc<[String]> = scripts.into();
        self.scripts
            .run(targets, |target, env| {
                Ok(ScriptJob::new(target, scripts.clone(), self.pool.clone(), env))
            })
            .await
    }

    /// Access-Toggle on every target, concurrently.
    pub async fn set_internet_access(
        &self,
        targets: &[Arc<Target>],
        enabled: bool,
    ) -> Vec<(TargetIdentity, Result<(), AccessError>)> {
        let handles: Vec<_> = targets
            .iter()
            .map(|target| {
                let access = self.access.clone();
                let target = target.clone();
                tokio::spawn(async move { access.synchronize(&target, enabled).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (target, joined) in targets.iter().zip(join_all(handles).await) {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(target = %target.identity(), "Access toggle crashed: {}", e);
                    self.events.publish(FleetEvent::alert(
                        None,
                        Some(target.identity().clone()),
                        format!("access toggle crashed: {e}"),
                    ));
                    Err(AccessError::Script(e.to_string()))
                }
            };
            results.push((target.identity().clone(), result));
        }
        results
    }
}
