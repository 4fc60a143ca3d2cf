// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Session Pool
//!
//! Remote sessions are expensive to open and the lab machines cap concurrent
//! connections, so every job that talks to a target goes through this pool.
//! A fixed number of admission permits bounds the sessions open across the
//! whole fleet; healthy sessions are parked per target for reuse until the
//! idle timeout passes.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Bounded, reusable pool of remote sessions shared by all jobs

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::remote::{
    Credentials, RemoteError, RemoteSession, RemoteTransport, SessionTimeouts,
};
use crate::domain::target::TargetIdentity;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session acquisition cancelled")]
    Cancelled,

    #[error("session pool is shut down")]
    Closed,

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// A session checked out of the pool together with its admission permit.
///
/// Dropping it without [`SessionPool::release`] closes the session and frees
/// the permit.
pub struct PooledSession {
    session: Box<dyn RemoteSession>,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    pub fn session(&self) -> &dyn RemoteSession {
        self.session.as_ref()
    }
}

impl std::ops::Deref for PooledSession {
    type Target = dyn RemoteSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

struct ParkedSession {
    session: Box<dyn RemoteSession>,
    parked_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_sessions: usize,
    pub checked_out: usize,
    pub idle: usize,
}

pub struct SessionPool {
    transport: Arc<dyn RemoteTransport>,
    credentials: Credentials,
    timeouts: SessionTimeouts,
    admission: Arc<Semaphore>,
    max_sessions: usize,
    idle: Mutex<HashMap<TargetIdentity, Vec<ParkedSession>>>,
}

impl SessionPool {
    /// `max_sessions` is both the fleet-wide ceiling on open sessions and
    /// the number of idle sessions kept per target.
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        credentials: Credentials,
        timeouts: SessionTimeouts,
        max_sessions: usize,
    ) -> Self {
        let max_sessions = max_sessions.max(1);
        Self {
            transport,
            credentials,
            timeouts,
            admission: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Checks out a session for `target`, reusing a parked healthy one when
    /// possible. Waits for an admission permit; observes `cancel` before,
    /// during and after the wait.
    pub async fn acquire(
        &self,
        target: &TargetIdentity,
        cancel: &CancellationToken,
    ) -> Result<PooledSession, SessionError> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let permit = tokio::select! {
            permit = self.admission.clone().acquire_owned() => {
                permit.map_err(|_| SessionError::Closed)?
            }
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
        };

        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        if let Some(session) = self.take_idle(target) {
            debug!(target = %target, "Reusing pooled session");
            return Ok(PooledSession {
                session,
                _permit: permit,
            });
        }

        debug!(target = %target, "Opening new remote session");
        let session = tokio::select! {
            opened = self.transport.open_session(target, &self.credentials, &self.timeouts) => opened?,
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
        };

        Ok(PooledSession {
            session,
            _permit: permit,
        })
    }

    fn take_idle(&self, target: &TargetIdentity) -> Option<Box<dyn RemoteSession>> {
        let mut idle = self.idle.lock();
        let parked = idle.get_mut(target)?;
        let max_idle = self.timeouts.idle();
        while let Some(ParkedSession { session, parked_at }) = parked.pop() {
            if !session.is_open() {
                debug!(target = %target, "Discarding closed pooled session");
            } else if parked_at.elapsed() > max_idle {
                debug!(target = %target, "Discarding expired pooled session");
            } else {
                return Some(session);
            }
        }
        None
    }

    /// Returns a session. Closed sessions are dropped; healthy ones are parked
    /// unless the target already has `max_sessions` idle. Parked sessions
    /// older than the idle timeout are dropped on the next acquire.
    pub fn release(&self, pooled: PooledSession) {
        let PooledSession { session, _permit } = pooled;
        let target = session.target().clone();

        if !session.is_open() {
            debug!(target = %target, "Session unhealthy on release, discarding");
            return;
        }

        let mut idle = self.idle.lock();
        let parked = idle.entry(target.clone()).or_default();
        if parked.len() >= self.max_sessions {
            debug!(target = %target, idle = parked.len(), "Idle pool full, discarding session");
            return;
        }
        parked.push(ParkedSession {
            session,
            parked_at: Instant::now(),
        });
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_sessions: self.max_sessions,
            checked_out: self.max_sessions - self.admission.available_permits(),
            idle: self.idle.lock().values().map(Vec::len).sum(),
        }
    }

    pub fn idle_for(&self, target: &TargetIdentity) -> usize {
        self.idle.lock().get(target).map_or(0, Vec::len)
    }

    /// Refuses further acquisitions and drops every parked session.
    pub fn shutdown(&self) {
        self.admission.close();
        let drained: Vec<_> = self.idle.lock().drain().collect();
        debug!(targets = drained.len(), "Session pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::remote::{InvocationState, RecordSink};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct MockSession {
        target: TargetIdentity,
        open: Arc<AtomicBool>,
    }

    #[async_trait]
    impl RemoteSession for MockSession {
        fn target(&self) -> &TargetIdentity {
            &self.target
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn invoke(
            &self,
            _scripts: &[String],
            _sink: &dyn RecordSink,
        ) -> Result<InvocationState, RemoteError> {
            Ok(InvocationState::Completed)
        }

        async fn stop(&self) {}
    }

    #[derive(Default)]
    struct MockTransport {
        opened: AtomicUsize,
        healthy: Arc<AtomicBool>,
        refuse: bool,
    }

    impl MockTransport {
        fn healthy() -> Self {
            Self {
                healthy: Arc::new(AtomicBool::new(true)),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl RemoteTransport for MockTransport {
        async fn open_session(
            &self,
            target: &TargetIdentity,
            _credentials: &Credentials,
            _timeouts: &SessionTimeouts,
        ) -> Result<Box<dyn RemoteSession>, RemoteError> {
            if self.refuse {
                return Err(RemoteError::Transport("connection refused".into()));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockSession {
                target: target.clone(),
                open: self.healthy.clone(),
            }))
        }
    }

    fn pc(n: u8) -> TargetIdentity {
        TargetIdentity::new(format!("10.0.0.{n}").parse().unwrap(), format!("pc{n:02}"))
    }

    fn pool(transport: Arc<MockTransport>, max: usize) -> SessionPool {
        SessionPool::new(transport, Credentials::default(), SessionTimeouts::default(), max)
    }

    #[tokio::test]
    async fn test_reuses_healthy_session() {
        let transport = Arc::new(MockTransport::healthy());
        let pool = pool(transport.clone(), 3);
        let token = CancellationToken::new();

        let first = pool.acquire(&pc(1), &token).await.unwrap();
        pool.release(first);
        assert_eq!(pool.idle_for(&pc(1)), 1);

        let second = pool.acquire(&pc(1), &token).await.unwrap();
        assert_eq!(transport.opened.load(Ordering::SeqCst), 1);
        pool.release(second);
    }

    #[tokio::test]
    async fn test_unhealthy_session_discarded() {
        let transport = Arc::new(MockTransport::healthy());
        let pool = pool(transport.clone(), 3);
        let token = CancellationToken::new();

        let session = pool.acquire(&pc(1), &token).await.unwrap();
        transport.healthy.store(false, Ordering::SeqCst);
        pool.release(session);
        assert_eq!(pool.idle_for(&pc(1)), 0);
        assert_eq!(pool.stats().checked_out, 0);
    }

    #[tokio::test]
    async fn test_idle_high_water() {
        let transport = Arc::new(MockTransport::healthy());
        let pool = pool(transport, 2);
        let token = CancellationToken::new();

        let a = pool.acquire(&pc(1), &token).await.unwrap();
        let b = pool.acquire(&pc(1), &token).await.unwrap();
        pool.release(a);
        pool.idle.lock().entry(pc(1)).or_default().push(ParkedSession {
            session: Box::new(MockSession {
                target: pc(1),
                open: Arc::new(AtomicBool::new(true)),
            }),
            parked_at: Instant::now(),
        });
        assert_eq!(pool.idle_for(&pc(1)), 2);

        pool.release(b);
        assert_eq!(pool.idle_for(&pc(1)), 2);
        assert_eq!(pool.stats().checked_out, 0);
    }

    #[tokio::test]
    async fn test_expired_session_not_reused() {
        let transport = Arc::new(MockTransport::healthy());
        let timeouts = SessionTimeouts {
            idle_ms: 10,
            ..SessionTimeouts::default()
        };
        let pool = SessionPool::new(transport.clone(), Credentials::default(), timeouts, 3);
        let token = CancellationToken::new();

        let first = pool.acquire(&pc(1), &token).await.unwrap();
        pool.release(first);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let second = pool.acquire(&pc(1), &token).await.unwrap();
        assert_eq!(transport.opened.load(Ordering::SeqCst), 2);
        assert_eq!(pool.idle_for(&pc(1)), 0);
        pool.release(second);
    }

    #[tokio::test]
    async fn test_cancelled_before_acquire() {
        let pool = pool(Arc::new(MockTransport::healthy()), 1);
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(
            pool.acquire(&pc(1), &token).await.err(),
            Some(SessionError::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_permit() {
        let pool = Arc::new(pool(Arc::new(MockTransport::healthy()), 1));
        let token = CancellationToken::new();
        let held = pool.acquire(&pc(1), &token).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            let token = token.clone();
            tokio::spawn(async move { pool.acquire(&pc(2), &token).await.err() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        assert_eq!(waiter.await.unwrap(), Some(SessionError::Cancelled));
        pool.release(held);
    }

    #[tokio::test]
    async fn test_transport_failure_releases_permit() {
        let transport = Arc::new(MockTransport {
            refuse: true,
            ..Default::default()
        });
        let pool = pool(transport, 1);
        let token = CancellationToken::new();

        let err = pool.acquire(&pc(1), &token).await.err();
        assert!(matches!(err, Some(SessionError::Remote(RemoteError::Transport(_)))));
        assert_eq!(pool.stats().checked_out, 0);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_acquire() {
        let pool = pool(Arc::new(MockTransport::healthy()), 2);
        pool.shutdown();
        let token = CancellationToken::new();
        assert_eq!(
            pool.acquire(&pc(1), &token).await.err(),
            Some(SessionError::Closed)
        );
    }
}
