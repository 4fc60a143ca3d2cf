// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process service wiring
//!
//! Loads configuration, builds every adapter and application service and
//! loads the persisted fleet. Commands receive a ready [`FleetServices`].

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use labfleet_core::{
    application::{
        AccessController, FleetOrchestrator, FleetRegistry, NetworkServices, ScriptCatalog,
        SessionPool, TransferEngine,
    },
    domain::config::FleetConfig,
    infrastructure::{
        ArpTableResolver, DnsHostNameResolver, EventBus, FileHardwareAddressCache,
        LocalFileCopier, ProcessTransport, TcpLivenessProber, UdpWakeOnLan, YamlFleetStore,
    },
};

pub struct FleetServices {
    pub config: Arc<FleetConfig>,
    pub events: EventBus,
    pub registry: Arc<FleetRegistry>,
    pub orchestrator: Arc<FleetOrchestrator>,
}

impl FleetServices {
    pub async fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config =
            FleetConfig::load_or_default(config_path).context("Failed to load configuration")?;
        config
            .validate()
            .context("Configuration validation failed")?;
        Self::from_config(config).await
    }

    pub async fn from_config(config: FleetConfig) -> Result<Self> {
        let config = Arc::new(config);
        let events = EventBus::with_default_capacity();

        let transport = Arc::new(ProcessTransport::new(
            config.remote.launcher.clone(),
            config.remote.port,
        ));
        let pool = Arc::new(SessionPool::new(
            transport,
            config.remote.credentials.clone(),
            config.remote.timeouts,
            config.remote.max_concurrent_sessions,
        ));
        let access = Arc::new(AccessController::new(
            pool.clone(),
            config.network.clone(),
            events.clone(),
        ));
        let engine = Arc::new(TransferEngine::new(Arc::new(LocalFileCopier::new(
            config.transfer.chunk_size,
        ))));

        let network = NetworkServices {
            prober: Arc::new(TcpLivenessProber::new(
                config.network.probe_port,
                config.network.probe_timeout(),
            )),
            resolver: Arc::new(ArpTableResolver::new()),
            mac_cache: Arc::new(FileHardwareAddressCache::new(&config.fleet.mac_cache_dir)),
            host_names: Arc::new(DnsHostNameResolver),
            waker: Arc::new(UdpWakeOnLan::new(config.network.wake_broadcast)),
        };
        let registry = Arc::new(FleetRegistry::new(
            Arc::new(YamlFleetStore::new(&config.fleet.fleet_file)),
            network,
            access.clone(),
            events.clone(),
        ));
        let loaded = registry
            .load()
            .await
            .with_context(|| format!("Failed to load fleet from {:?}", config.fleet.fleet_file))?;
        info!(targets = loaded, "Services ready");

        let orchestrator = Arc::new(FleetOrchestrator::new(
            config.clone(),
            events.clone(),
            pool,
            engine,
            access,
        ));

        Ok(Self {
            config,
            events,
            registry,
            orchestrator,
        })
    }

    pub fn script_catalog(&self) -> Result<ScriptCatalog> {
        let dir = &self.config.fleet.scripts_dir;
        ScriptCatalog::load(dir)
            .with_context(|| format!("Failed to read scripts from {}", dir.display()))
    }
}
