// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared doubles for the integration tests: an in-memory file copier, a
//! scripted remote transport and a harness wiring them into an orchestrator.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use labfleet_core::application::{
    AccessController, FleetOrchestrator, SessionPool, TransferEngine,
};
use labfleet_core::domain::config::FleetConfig;
use labfleet_core::domain::remote::{
    Credentials, InvocationState, RecordSink, RemoteError, RemoteRecord, RemoteSession,
    RemoteTransport, SessionTimeouts,
};
use labfleet_core::domain::target::{Target, TargetIdentity};
use labfleet_core::domain::transfer::{ChunkControl, CopyError, FileCopier};
use labfleet_core::infrastructure::EventBus;

pub fn targets(count: u8) -> Vec<Arc<Target>> {
    (1..=count)
        .map(|i| {
            Arc::new(Target::new(TargetIdentity::new(
                format!("10.0.0.{i}").parse().unwrap(),
                format!("pc{i:02}"),
            )))
        })
        .collect()
}

/// Pretends to copy by reporting chunks of 100 bytes. Sizes are looked up by
/// source path. Copies whose destination does not start with an open prefix
/// wait for cancellation before reporting anything.
#[derive(Default)]
pub struct SimulatedCopier {
    sizes: HashMap<PathBuf, u64>,
    open_prefixes: Option<Vec<PathBuf>>,
    pub copied: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl SimulatedCopier {
    pub fn new(sizes: impl IntoIterator<Item = (PathBuf, u64)>) -> Self {
        Self {
            sizes: sizes.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn gated(mut self, open_prefixes: Vec<PathBuf>) -> Self {
        self.open_prefixes = Some(open_prefixes);
        self
    }
}

#[async_trait]
impl FileCopier for SimulatedCopier {
    async fn copy_file(
        &self,
        source: &Path,
        destination: &Path,
        cancel: &CancellationToken,
        on_chunk: &mut (dyn FnMut(u64, u64) -> ChunkControl + Send),
    ) -> Result<(), CopyError> {
        if let Some(prefixes) = &self.open_prefixes {
            if !prefixes.iter().any(|p| destination.starts_with(p)) {
                cancel.cancelled().await;
                return Err(CopyError::Cancelled);
            }
        }

        let total = self.sizes.get(source).copied().unwrap_or(0);
        let mut done = 0;
        loop {
            tokio::task::yield_now().await;
            if on_chunk(done, total) == ChunkControl::Cancel {
                return Err(CopyError::Cancelled);
            }
            if done == total {
                break;
            }
            done = (done + 100).min(total);
        }
        self.copied
            .lock()
            .push((source.to_path_buf(), destination.to_path_buf()));
        Ok(())
    }
}

#[derive(Clone)]
pub enum Behavior {
    /// Emits the records, then finishes in the given state.
    Reply(Vec<RemoteRecord>, InvocationState),
    /// Opening a session fails with a transport error.
    Unreachable(String),
    /// Blocks until stopped, then finishes in the given state.
    UntilStopped(InvocationState),
    /// Sleeps, then completes.
    Slow(Duration),
}

#[derive(Default)]
pub struct Counters {
    pub opened: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub stops: AtomicUsize,
}

pub struct ScriptedTransport {
    behavior: Behavior,
    pub counters: Arc<Counters>,
}

impl ScriptedTransport {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            counters: Arc::new(Counters::default()),
        }
    }
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn open_session(
        &self,
        target: &TargetIdentity,
        _credentials: &Credentials,
        _timeouts: &SessionTimeouts,
    ) -> Result<Box<dyn RemoteSession>, RemoteError> {
        if let Behavior::Unreachable(message) = &self.behavior {
            return Err(RemoteError::Transport(message.clone()));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            target: target.clone(),
            behavior: self.behavior.clone(),
            counters: self.counters.clone(),
            stop: Notify::new(),
        }))
    }
}

struct ScriptedSession {
    target: TargetIdentity,
    behavior: Behavior,
    counters: Arc<Counters>,
    stop: Notify,
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    fn target(&self) -> &TargetIdentity {
        &self.target
    }

    fn is_open(&self) -> bool {
        true
    }

    async fn invoke(
        &self,
        _scripts: &[String],
        sink: &dyn RecordSink,
    ) -> Result<InvocationState, RemoteError> {
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let state = match &self.behavior {
            Behavior::Reply(records, state) => {
                for record in records {
                    sink.emit(record.clone());
                }
                *state
            }
            Behavior::UntilStopped(state) => {
                self.stop.notified().await;
                *state
            }
            Behavior::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                InvocationState::Completed
            }
            Behavior::Unreachable(_) => InvocationState::Failed,
        };

        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(state)
    }

    async fn stop(&self) {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        self.stop.notify_one();
    }
}

pub struct Harness {
    pub orchestrator: FleetOrchestrator,
    pub events: EventBus,
    pub counters: Arc<Counters>,
}

pub fn harness(config: FleetConfig, copier: Arc<dyn FileCopier>, behavior: Behavior) -> Harness {
    let events = EventBus::new(4096);
    let transport = ScriptedTransport::new(behavior);
    let counters = transport.counters.clone();
    let pool = Arc::new(SessionPool::new(
        Arc::new(transport),
        Credentials::default(),
        SessionTimeouts::default(),
        config.remote.max_concurrent_sessions,
    ));
    let access = Arc::new(AccessController::new(
        pool.clone(),
        config.network.clone(),
        events.clone(),
    ));
    let orchestrator = FleetOrchestrator::new(
        Arc::new(config),
        events.clone(),
        pool,
        Arc::new(TransferEngine::new(copier)),
        access,
    );
    Harness {
        orchestrator,
        events,
        counters,
    }
}

/// Polls `condition` until it holds or a second has passed.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
