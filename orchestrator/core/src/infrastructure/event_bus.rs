// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fleet event fan-out
//!
//! A tokio broadcast channel shared by every publisher. Observers (progress
//! bars, log tails, the fleet watcher) hold a [`FleetEventReceiver`], which
//! can narrow the stream to one operation or one target. A receiver that
//! falls more than `capacity` events behind loses the oldest ones; publishing
//! never waits on observers.

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{trace, warn};

use crate::domain::events::{FleetEvent, OperationId};
use crate::domain::target::TargetIdentity;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Delivers `event` to every live receiver. Having none is not an error.
    pub fn publish(&self, event: FleetEvent) {
        trace!(?event, "publish");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> FleetEventReceiver {
        self.receiver(EventFilter::All)
    }

    /// Events of one operation invocation only.
    pub fn subscribe_operation(&self, operation_id: OperationId) -> FleetEventReceiver {
        self.receiver(EventFilter::Operation(operation_id))
    }

    /// Events about one target only, across operations.
    pub fn subscribe_target(&self, target: TargetIdentity) -> FleetEventReceiver {
        self.receiver(EventFilter::Target(target))
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn receiver(&self, filter: EventFilter) -> FleetEventReceiver {
        FleetEventReceiver {
            inner: self.sender.subscribe(),
            filter,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

enum EventFilter {
    All,
    Operation(OperationId),
    Target(TargetIdentity),
}

impl EventFilter {
    fn accepts(&self, event: &FleetEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Operation(id) => event.operation_id() == Some(*id),
            EventFilter::Target(target) => event.target() == Some(target),
        }
    }
}

pub struct FleetEventReceiver {
    inner: broadcast::Receiver<FleetEvent>,
    filter: EventFilter,
}

impl FleetEventReceiver {
    /// Waits for the next accepted event.
    pub async fn recv(&mut self) -> Result<FleetEvent, EventBusError> {
        loop {
            let event = self.inner.recv().await.map_err(|e| match e {
                RecvError::Closed => EventBusError::Closed,
                RecvError::Lagged(missed) => lagged(missed),
            })?;
            if self.filter.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Returns the next accepted event already queued, or `Empty`.
    pub fn try_recv(&mut self) -> Result<FleetEvent, EventBusError> {
        loop {
            let event = self.inner.try_recv().map_err(|e| match e {
                TryRecvError::Empty => EventBusError::Empty,
                TryRecvError::Closed => EventBusError::Closed,
                TryRecvError::Lagged(missed) => lagged(missed),
            })?;
            if self.filter.accepts(&event) {
                return Ok(event);
            }
        }
    }
}

fn lagged(missed: u64) -> EventBusError {
    warn!(missed, "Fleet event receiver fell behind");
    EventBusError::Lagged(missed)
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events queued")]
    Empty,

    #[error("Receiver missed {0} events")]
    Lagged(u64),
}
