// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fleet Registry
//!
//! The ordered collection of known targets. Loads and saves through the
//! [`FleetStore`] port and keeps each target's liveness, hardware address and
//! host name fresh with gated background probes.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Target collection, persistence and background refresh

use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::access::AccessController;
use crate::domain::events::FleetEvent;
use crate::domain::fleet_store::{FleetStore, StoreError};
use crate::domain::network::{
    short_host_name, HardwareAddressCache, HardwareAddressResolver, HostNameResolver,
    LivenessProber, MacAddress, NetworkError, WakeOnLan,
};
use crate::domain::target::{Target, TargetIdentity};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("{0} is already in the fleet")]
    Duplicate(TargetIdentity),

    #[error("no target matches '{0}'")]
    UnknownTarget(String),

    #[error("hardware address of {0} is unknown")]
    UnknownHardwareAddress(TargetIdentity),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Network ports used for probing and waking targets.
#[derive(Clone)]
pub struct NetworkServices {
    pub prober: Arc<dyn LivenessProber>,
    pub resolver: Arc<dyn HardwareAddressResolver>,
    pub mac_cache: Arc<dyn HardwareAddressCache>,
    pub host_names: Arc<dyn HostNameResolver>,
    pub waker: Arc<dyn WakeOnLan>,
}

pub struct FleetRegistry {
    targets: RwLock<Vec<Arc<Target>>>,
    store: Arc<dyn FleetStore>,
    network: NetworkServices,
    access: Arc<AccessController>,
    events: EventBus,
}

impl FleetRegistry {
    pub fn new(
        store: Arc<dyn FleetStore>,
        network: NetworkServices,
        access: Arc<AccessController>,
        events: EventBus,
    ) -> Self {
        Self {
            targets: RwLock::new(Vec::new()),
            store,
            network,
            access,
            events,
        }
    }

    pub fn targets(&self) -> Vec<Arc<Target>> {
        self.targets.read().clone()
    }

    pub fn len(&self) -> usize {
        self.targets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.read().is_empty()
    }

    /// Finds a target by name (case-insensitive) or address.
    pub fn find(&self, query: &str) -> Option<Arc<Target>> {
        self.targets
            .read()
            .iter()
            .find(|t| t.identity().matches(query))
            .cloned()
    }

    /// Resolves every query; an empty selection means the whole fleet.
    pub fn select(&self, queries: &[String]) -> Result<Vec<Arc<Target>>, FleetError> {
        if queries.is_empty() {
            return Ok(self.targets());
        }
        queries
            .iter()
            .map(|q| self.find(q).ok_or_else(|| FleetError::UnknownTarget(q.clone())))
            .collect()
    }

    /// Replaces the registry contents with the persisted fleet. Duplicate
    /// entries in the store are dropped.
    pub async fn load(&self) -> Result<usize, FleetError> {
        let identities = self.store.load_all().await?;
        let mut loaded: Vec<Arc<Target>> = Vec::with_capacity(identities.len());
        for identity in identities {
            if loaded.iter().any(|t| t.identity() == &identity) {
                warn!(target = %identity, "Duplicate target in fleet store, ignoring");
                continue;
            }
            loaded.push(Arc::new(Target::new(identity)));
        }

        let count = loaded.len();
        *self.targets.write() = loaded;
        info!(count, "Fleet loaded");
        Ok(count)
    }

    pub async fn save(&self) -> Result<(), FleetError> {
        let identities: Vec<TargetIdentity> = self
            .targets
            .read()
            .iter()
            .map(|t| t.identity().clone())
            .collect();
        self.store.save_all(&identities).await?;
        debug!(count = identities.len(), "Fleet saved");
        Ok(())
    }

    /// Adds a target without touching the network.
    pub fn insert(&self, identity: TargetIdentity) -> Result<Arc<Target>, FleetError> {
        let target = {
            let mut targets = self.targets.write();
            if targets.iter().any(|t| t.identity() == &identity) {
                return Err(FleetError::Duplicate(identity));
            }
            let target = Arc::new(Target::new(identity));
            targets.push(target.clone());
            target
        };
        self.events.publish(FleetEvent::TargetAdded {
            target: target.identity().clone(),
        });
        Ok(target)
    }

    /// Adds a target and probes it in the background.
    pub fn add(self: &Arc<Self>, identity: TargetIdentity) -> Result<Arc<Target>, FleetError> {
        let target = self.insert(identity)?;
        let registry = self.clone();
        let probed = target.clone();
        tokio::spawn(async move {
            registry.refresh_target(&probed, Duration::ZERO).await;
        });
        Ok(target)
    }

    pub fn remove(&self, query: &str) -> Option<Arc<Target>> {
        let removed = {
            let mut targets = self.targets.write();
            let index = targets.iter().position(|t| t.identity().matches(query))?;
            targets.remove(index)
        };
        self.events.publish(FleetEvent::TargetRemoved {
            target: removed.identity().clone(),
        });
        Some(removed)
    }

    /// Liveness probe followed by an access-level check.
    pub async fn refresh_target(&self, target: &Target, period: Duration) {
        self.probe(target, period).await;
        self.access.refresh(target, period).await;
    }

    /// Refreshes every target concurrently.
    pub async fn refresh_all(&self, period: Duration) {
        let targets = self.targets();
        join_all(targets.iter().map(|t| self.refresh_target(t, period))).await;
    }

    /// Repeats [`FleetRegistry::refresh_all`] every `interval` until `shutdown` fires.
    pub fn spawn_refresh_loop(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Refresh loop stopped");
                        return;
                    }
                    _ = ticker.tick() => registry.refresh_all(interval).await,
                }
            }
        })
    }

    /// Updates liveness, hardware address and host name of one target. Errors
    /// are recorded on the target, never returned.
    pub async fn probe(&self, target: &Target, period: Duration) {
        let Some(_permit) = target.enter_probe(period).await else {
            debug!(target = %target.identity(), "Probe already in flight, skipping");
            return;
        };

        let address = target.address();
        let state = match self.network.prober.probe(address).await {
            Err(e) => target.update(|s| {
                s.online = false;
                s.probe_status = format!("Probe failed: {e}");
                s.probe_error = None;
            }),
            Ok(rtt) => {
                let online = target.update(|s| {
                    s.online = true;
                    s.probe_status = format!("Online, response time: {} ms", rtt.as_millis());
                });

                let mut probe_error = None;
                let mut hardware_address = online.hardware_address;
                if hardware_address.is_none() {
                    match self.hardware_address(address).await {
                        Ok(mac) => hardware_address = Some(mac),
                        Err(e) => probe_error = Some(e.to_string()),
                    }
                }

                let host_name = match self.network.host_names.reverse_lookup(address).await {
                    Ok(fqdn) => Some(short_host_name(&fqdn).to_string()),
                    Err(e) => {
                        debug!(target = %target.identity(), "Reverse lookup failed: {}", e);
                        None
                    }
                };

                target.update(|s| {
                    s.hardware_address = hardware_address;
                    if host_name.is_some() {
                        s.host_name = host_name;
                    }
                    s.probe_error = probe_error;
                })
            }
        };

        self.events.publish(FleetEvent::TargetUpdated {
            target: target.identity().clone(),
            state,
        });
    }

    /// Cache first; a resolver hit is written back to the cache.
    async fn hardware_address(&self, address: std::net::IpAddr) -> Result<MacAddress, NetworkError> {
        if let Some(mac) = self.network.mac_cache.get(address).await {
            return Ok(mac);
        }
        let mac = self.network.resolver.resolve(address).await?;
        if let Err(e) = self.network.mac_cache.put(address, mac).await {
            warn!(%address, "Failed to cache hardware address: {}", e);
        }
        Ok(mac)
    }

    /// Sends a Wake-on-LAN packet to the target's known hardware address.
    pub async fn wake(&self, target: &Target) -> Result<(), FleetError> {
        let known = match target.snapshot().hardware_address {
            Some(mac) => Some(mac),
            None => self.network.mac_cache.get(target.address()).await,
        };
        let mac = known.ok_or_else(|| FleetError::UnknownHardwareAddress(target.identity().clone()))?;
        info!(target = %target.identity(), %mac, "Sending Wake-on-LAN packet");
        self.network.waker.wake(mac).await?;
        Ok(())
    }
}
