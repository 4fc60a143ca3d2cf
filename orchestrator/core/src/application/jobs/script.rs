// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Script-Run job
//!
//! `Waiting -> Connecting -> Invoking -> {Completed | Failed | CouldntConnect | Cancelled}`,
//! passing through `Cancelling` when a stop was requested mid-invocation.
//! Records streamed back by the session land in the job's [`ScriptLog`].
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Per-target remote script execution

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::jobs::{FleetJob, JobEnv};
use crate::application::session_pool::{SessionError, SessionPool};
use crate::domain::events::FleetEvent;
use crate::domain::job::{FailureKind, JobFailure, Outcome, ScriptStatus, StatusCell};
use crate::domain::remote::{InvocationState, RecordSink, RemoteError, RemoteRecord};
use crate::domain::script_log::{LogChange, LogEntry, ScriptLog};
use crate::domain::target::Target;

pub struct ScriptJob {
    target: Arc<Target>,
    scripts: Arc<[String]>,
    pool: Arc<SessionPool>,
    env: JobEnv,
    status: StatusCell<ScriptStatus>,
    log: Mutex<ScriptLog>,
    failure: Mutex<Option<JobFailure>>,
}

impl ScriptJob {
    pub fn new(
        target: Arc<Target>,
        scripts: Arc<[String]>,
        pool: Arc<SessionPool>,
        env: JobEnv,
    ) -> Self {
        Self {
            target,
            scripts,
            pool,
            env,
            status: StatusCell::default(),
            log: Mutex::new(ScriptLog::new()),
            failure: Mutex::new(None),
        }
    }

    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.log.lock().entries().to_vec()
    }

    pub fn error_count(&self) -> u32 {
        self.log.lock().error_count()
    }

    pub fn warning_count(&self) -> u32 {
        self.log.lock().warning_count()
    }

    fn settle(&self, outcome_if_pending: Outcome) -> Outcome {
        self.outcome().unwrap_or(outcome_if_pending)
    }

    fn cancelled(&self) -> Outcome {
        if self.settle_cancelled() {
            info!(target = %self.target.identity(), "Script run cancelled");
        }
        self.settle(Outcome::Cancelled)
    }

    fn finish_failed(&self, status: ScriptStatus, failure: JobFailure) -> Outcome {
        *self.failure.lock() = Some(failure.clone());
        self.env
            .advance(self.target.identity(), &self.status, status, Some(failure.clone()));
        self.settle(Outcome::Failed(failure))
    }

    fn couldnt_connect(&self, message: String) -> Outcome {
        warn!(target = %self.target.identity(), "Could not connect: {}", message);
        self.emit(RemoteRecord::Error(message.clone()));
        self.finish_failed(
            ScriptStatus::CouldntConnect,
            JobFailure::new(FailureKind::Transport, message),
        )
    }

    fn failed_remotely(&self, message: String) -> Outcome {
        warn!(target = %self.target.identity(), "Remote script failed: {}", message);
        self.finish_failed(
            ScriptStatus::Failed,
            JobFailure::new(FailureKind::RemoteExecution, message),
        )
    }

    fn failed_unexpectedly(&self, message: String) -> Outcome {
        error!(target = %self.target.identity(), "Script run failed unexpectedly: {}", message);
        self.env.alert(self.target.identity(), message.clone());
        self.finish_failed(
            ScriptStatus::Failed,
            JobFailure::new(FailureKind::Internal, message),
        )
    }
}

impl RecordSink for ScriptJob {
    fn emit(&self, record: RemoteRecord) {
        let (change, entry) = {
            let mut log = self.log.lock();
            let change = log.append(record);
            let entry = match change {
                LogChange::Appended(index) | LogChange::Updated(index) => log.entry(index).cloned(),
                LogChange::Ignored => None,
            };
            (change, entry)
        };

        let Some(entry) = entry else {
            return;
        };
        let operation_id = self.env.operation_id;
        let target = self.target.identity().clone();
        let event = match change {
            LogChange::Appended(index) => FleetEvent::LogAppended {
                operation_id,
                target,
                index,
                entry,
            },
            LogChange::Updated(index) => FleetEvent::LogUpdated {
                operation_id,
                target,
                index,
                entry,
            },
            LogChange::Ignored => return,
        };
        self.env.events.publish(event);
    }
}

#[async_trait]
impl FleetJob for ScriptJob {
    type Status = ScriptStatus;

    fn target(&self) -> &Arc<Target> {
        &self.target
    }

    fn status(&self) -> ScriptStatus {
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

        self.env
            .advance(identity, &self.status, ScriptStatus::Connecting, None);
        let session = match self.pool.acquire(identity, &cancel).await {
            Ok(session) => session,
            Err(SessionError::Cancelled) => return self.cancelled(),
            Err(SessionError::Remote(RemoteError::Transport(message))) => {
                return self.couldnt_connect(message)
            }
            Err(other) => return self.failed_unexpectedly(other.to_string()),
        };

        if cancel.is_cancelled() {
            self.pool.release(session);
            return self.cancelled();
        }

        self.env
            .advance(identity, &self.status, ScriptStatus::Invoking, None);

        let result = {
            let stop_on_cancel = async {
                cancel.cancelled().await;
                self.env
                    .advance(identity, &self.status, ScriptStatus::Cancelling, None);
                debug!(target = %identity, "Requesting remote stop");
                session.stop().await;
                std::future::pending::<()>().await
            };

            // The invocation is polled first so it is registered before any stop.
            tokio::select! {
                biased;
                result = session.invoke(&self.scripts, self) => result,
                () = stop_on_cancel => Err(RemoteError::Stopped),
            }
        };
        self.pool.release(session);

        match result {
            Ok(InvocationState::Completed) => {
                if cancel.is_cancelled() {
                    debug!(target = %identity, "Invocation completed before the stop took effect");
                }
                self.env
                    .advance(identity, &self.status, ScriptStatus::Completed, None);
                self.settle(Outcome::Success)
            }
            Ok(InvocationState::Failed) => {
                let errors = self.error_count();
                self.failed_remotely(format!("remote invocation failed with {errors} error record(s)"))
            }
            Ok(InvocationState::Stopped) | Err(RemoteError::Stopped) => self.cancelled(),
            Err(RemoteError::Transport(message)) => self.couldnt_connect(message),
            Err(RemoteError::Execution(message)) => {
                if cancel.is_cancelled() {
                    self.cancelled()
                } else {
                    self.emit(RemoteRecord::Error(message.clone()));
                    self.failed_remotely(message)
                }
            }
        }
    }

    fn settle_cancelled(&self) -> bool {
        if self.status.cancel_if_pending() {
            self.env
                .publish_status(self.target.identity(), ScriptStatus::Cancelled, None);
            return true;
        }
        false
    }

    fn fail_internal(&self, failure: JobFailure) {
        *self.failure.lock() = Some(failure.clone());
        if self.status.fail_if_pending() {
            self.env
                .publish_status(self.target.identity(), ScriptStatus::Failed, Some(failure));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::OperationKind;
    use crate::domain::remote::{Credentials, RemoteSession, RemoteTransport, SessionTimeouts};
    use crate::domain::target::TargetIdentity;
    use crate::infrastructure::event_bus::EventBus;
    use std::fmt::{self, Write as _};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Drops a stop that arrives before an invocation is running, the way a
    /// launcher with no child process yet would.
    struct LateStopSession {
        target: TargetIdentity,
        running: Mutex<Option<Arc<Notify>>>,
        dropped_stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RemoteSession for LateStopSession {
        fn target(&self) -> &TargetIdentity {
            &self.target
        }

        fn is_open(&self) -> bool {
            true
        }

        async fn invoke(
            &self,
            _scripts: &[String],
            _sink: &dyn RecordSink,
        ) -> Result<InvocationState, RemoteError> {
            let stopped = Arc::new(Notify::new());
            *self.running.lock() = Some(stopped.clone());
            let state = tokio::select! {
                () = stopped.notified() => InvocationState::Stopped,
                () = tokio::time::sleep(Duration::from_millis(200)) => InvocationState::Completed,
            };
            *self.running.lock() = None;
            Ok(state)
        }

        async fn stop(&self) {
            let running = self.running.lock().clone();
            match running {
                Some(stopped) => stopped.notify_one(),
                None => {
                    self.dropped_stops.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    struct LateStopTransport {
        dropped_stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RemoteTransport for LateStopTransport {
        async fn open_session(
            &self,
            target: &TargetIdentity,
            _credentials: &Credentials,
            _timeouts: &SessionTimeouts,
        ) -> Result<Box<dyn RemoteSession>, RemoteError> {
            Ok(Box::new(LateStopSession {
                target: target.clone(),
                running: Mutex::new(None),
                dropped_stops: self.dropped_stops.clone(),
            }))
        }
    }

    /// Cancels the token the moment a job publishes its `invoking` status.
    struct CancelOnInvoking(CancellationToken);

    struct FieldText(String);

    impl Visit for FieldText {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            let _ = write!(self.0, "{}={:?} ", field.name(), value);
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for CancelOnInvoking {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut text = FieldText(String::new());
            event.record(&mut text);
            if text.0.contains("status: \"invoking\"") {
                self.0.cancel();
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_as_invocation_starts_is_not_lost() {
        for _ in 0..20 {
            let cancel = CancellationToken::new();
            let subscriber = tracing_subscriber::registry().with(CancelOnInvoking(cancel.clone()));
            let _guard = tracing::subscriber::set_default(subscriber);

            let dropped_stops = Arc::new(AtomicUsize::new(0));
            let pool = Arc::new(SessionPool::new(
                Arc::new(LateStopTransport {
                    dropped_stops: dropped_stops.clone(),
                }),
                Credentials::default(),
                SessionTimeouts::default(),
                1,
            ));
            let target = Arc::new(Target::new(TargetIdentity::new(
                "10.0.0.1".parse().unwrap(),
                "pc01",
            )));
            let job = ScriptJob::new(
                target,
                Arc::from(vec!["Get-Date".to_string()]),
                pool,
                JobEnv::detached(OperationKind::ScriptRun, EventBus::new(64)),
            );

            assert_eq!(job.run(cancel).await, Outcome::Cancelled);
            assert_eq!(job.status(), ScriptStatus::Cancelled);
            assert_eq!(dropped_stops.load(Ordering::SeqCst), 0);
        }
    }
}
