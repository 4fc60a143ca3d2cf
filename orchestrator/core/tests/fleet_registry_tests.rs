// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Fleet registry tests: persistence, selection, probing, access checks and
//! Wake-on-LAN, with every network port replaced by an in-process double.

mod common;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{wait_until, Behavior, ScriptedTransport};
use labfleet_core::application::{
    AccessController, FleetError, FleetRegistry, NetworkServices, SessionPool,
};
use labfleet_core::domain::config::NetworkConfig;
use labfleet_core::domain::fleet_store::FleetStore;
use labfleet_core::domain::network::{
    HardwareAddressCache, HardwareAddressResolver, HostNameResolver, LivenessProber, MacAddress,
    NetworkError, WakeOnLan,
};
use labfleet_core::domain::remote::{Credentials, InvocationState, RemoteRecord, SessionTimeouts};
use labfleet_core::domain::target::{InternetAccessLevel, TargetIdentity};
use labfleet_core::infrastructure::{EventBus, InMemoryFleetStore};

#[derive(Default)]
struct FakeNetwork {
    offline: Mutex<Vec<IpAddr>>,
    arp: Mutex<HashMap<IpAddr, MacAddress>>,
    cache: Mutex<HashMap<IpAddr, MacAddress>>,
    woken: Mutex<Vec<MacAddress>>,
    probes: AtomicUsize,
    resolves: AtomicUsize,
}

#[async_trait]
impl LivenessProber for FakeNetwork {
    async fn probe(&self, address: IpAddr) -> Result<Duration, NetworkError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.offline.lock().contains(&address) {
            return Err(NetworkError::Unreachable(address, "timed out".into()));
        }
        Ok(Duration::from_millis(3))
    }
}

#[async_trait]
impl HardwareAddressResolver for FakeNetwork {
    async fn resolve(&self, address: IpAddr) -> Result<MacAddress, NetworkError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        self.arp
            .lock()
            .get(&address)
            .copied()
            .ok_or_else(|| NetworkError::Resolution(address, "not in the ARP table".into()))
    }
}

#[async_trait]
impl HardwareAddressCache for FakeNetwork {
    async fn get(&self, address: IpAddr) -> Option<MacAddress> {
        self.cache.lock().get(&address).copied()
    }

    async fn put(&self, address: IpAddr, mac: MacAddress) -> Result<(), NetworkError> {
        self.cache.lock().insert(address, mac);
        Ok(())
    }
}

#[async_trait]
impl HostNameResolver for FakeNetwork {
    async fn reverse_lookup(&self, address: IpAddr) -> Result<String, NetworkError> {
        match address {
            IpAddr::V4(v4) => Ok(format!("lab-{}.school.local", v4.octets()[3])),
            IpAddr::V6(_) => Err(NetworkError::Resolution(address, "no PTR".into())),
        }
    }
}

#[async_trait]
impl WakeOnLan for FakeNetwork {
    async fn wake(&self, mac: MacAddress) -> Result<(), NetworkError> {
        self.woken.lock().push(mac);
        Ok(())
    }
}

struct Fixture {
    registry: Arc<FleetRegistry>,
    network: Arc<FakeNetwork>,
    store: Arc<InMemoryFleetStore>,
}

fn identity(last: u8) -> TargetIdentity {
    TargetIdentity::new(format!("10.0.0.{last}").parse().unwrap(), format!("pc{last:02}"))
}

fn mac(last: u8) -> MacAddress {
    MacAddress::new([0x00, 0x1a, 0x2b, 0x3c, 0x4d, last])
}

fn fixture(stored: Vec<TargetIdentity>, route_count: &str) -> Fixture {
    let events = EventBus::new(1024);
    let network = Arc::new(FakeNetwork::default());
    let store = Arc::new(InMemoryFleetStore::with_targets(stored));
    let transport = ScriptedTransport::new(Behavior::Reply(
        vec![RemoteRecord::Output(route_count.to_string())],
        InvocationState::Completed,
    ));
    let pool = Arc::new(SessionPool::new(
        Arc::new(transport),
        Credentials::default(),
        SessionTimeouts::default(),
        3,
    ));
    let access = Arc::new(AccessController::new(pool, NetworkConfig::default(), events.clone()));
    let services = NetworkServices {
        prober: network.clone(),
        resolver: network.clone(),
        mac_cache: network.clone(),
        host_names: network.clone(),
        waker: network.clone(),
    };
    let registry = Arc::new(FleetRegistry::new(store.clone(), services, access, events));
    Fixture {
        registry,
        network,
        store,
    }
}

#[tokio::test]
async fn test_load_keeps_order_and_drops_duplicates() {
    let f = fixture(vec![identity(3), identity(1), identity(3)], "1");

    assert_eq!(f.registry.load().await.unwrap(), 2);
    let names: Vec<_> = f.registry.targets().iter().map(|t| t.name().to_string()).collect();
    assert_eq!(names, vec!["pc03", "pc01"]);
}

#[tokio::test]
async fn test_select_by_name_or_address() {
    let f = fixture(vec![identity(1), identity(2)], "1");
    f.registry.load().await.unwrap();

    let selected = f
        .registry
        .select(&["PC02".to_string(), "10.0.0.1".to_string()])
        .unwrap();
    assert_eq!(selected[0].identity(), &identity(2));
    assert_eq!(selected[1].identity(), &identity(1));
    assert_eq!(f.registry.select(&[]).unwrap().len(), 2);
    assert!(matches!(
        f.registry.select(&["pc09".to_string()]),
        Err(FleetError::UnknownTarget(q)) if q == "pc09"
    ));
}

#[tokio::test]
async fn test_add_remove_and_save() {
    let f = fixture(Vec::new(), "1");

    f.registry.insert(identity(5)).unwrap();
    f.registry.insert(identity(6)).unwrap();
    assert!(matches!(
        f.registry.insert(identity(5)),
        Err(FleetError::Duplicate(_))
    ));
    assert!(f.registry.remove("pc05").is_some());
    assert!(f.registry.remove("pc05").is_none());
    f.registry.save().await.unwrap();

    assert_eq!(f.store.load_all().await.unwrap(), vec![identity(6)]);
}

#[tokio::test]
async fn test_probe_online_fills_hardware_address_and_host_name() {
    let f = fixture(vec![identity(7)], "1");
    f.network.arp.lock().insert(identity(7).address, mac(7));
    f.registry.load().await.unwrap();
    let target = f.registry.find("pc07").unwrap();

    f.registry.probe(&target, Duration::ZERO).await;

    let state = target.snapshot();
    assert!(state.online);
    assert_eq!(state.probe_status, "Online, response time: 3 ms");
    assert_eq!(state.hardware_address, Some(mac(7)));
    assert_eq!(state.host_name.as_deref(), Some("lab-7"));
    assert_eq!(state.probe_error, None);
    assert_eq!(f.network.cache.lock().get(&identity(7).address), Some(&mac(7)));
}

#[tokio::test]
async fn test_probe_prefers_cached_hardware_address() {
    let f = fixture(vec![identity(8)], "1");
    f.network.cache.lock().insert(identity(8).address, mac(8));
    f.registry.load().await.unwrap();
    let target = f.registry.find("pc08").unwrap();

    f.registry.probe(&target, Duration::ZERO).await;

    assert_eq!(target.snapshot().hardware_address, Some(mac(8)));
    assert_eq!(f.network.resolves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_probe_failure_and_unresolved_address() {
    let f = fixture(vec![identity(1), identity(2)], "1");
    f.network.offline.lock().push(identity(1).address);
    f.registry.load().await.unwrap();

    let offline = f.registry.find("pc01").unwrap();
    f.registry.probe(&offline, Duration::ZERO).await;
    let state = offline.snapshot();
    assert!(!state.online);
    assert!(state.probe_status.starts_with("Probe failed: "));

    let unresolved = f.registry.find("pc02").unwrap();
    f.registry.probe(&unresolved, Duration::ZERO).await;
    let state = unresolved.snapshot();
    assert!(state.online);
    assert_eq!(state.hardware_address, None);
    assert!(state.probe_error.unwrap().contains("not in the ARP table"));
}

#[tokio::test]
async fn test_refresh_checks_access_level() {
    let allowed = fixture(vec![identity(1)], "1");
    allowed.registry.load().await.unwrap();
    allowed.registry.refresh_all(Duration::ZERO).await;
    let state = allowed.registry.targets()[0].snapshot();
    assert_eq!(state.access_level, InternetAccessLevel::Allowed);

    let forbidden = fixture(vec![identity(1)], "0");
    forbidden.registry.load().await.unwrap();
    forbidden.registry.refresh_all(Duration::ZERO).await;
    let state = forbidden.registry.targets()[0].snapshot();
    assert_eq!(state.access_level, InternetAccessLevel::Forbidden);
    assert_eq!(state.access_check_error, None);
}

#[tokio::test]
async fn test_add_probes_in_background() {
    let f = fixture(Vec::new(), "1");
    let target = f.registry.add(identity(4)).unwrap();

    wait_until(|| target.snapshot().online).await;
    assert_eq!(f.registry.len(), 1);
}

#[tokio::test]
async fn test_wake_uses_known_hardware_address() {
    let f = fixture(vec![identity(1), identity(2)], "1");
    f.network.cache.lock().insert(identity(1).address, mac(1));
    f.registry.load().await.unwrap();

    f.registry.wake(&f.registry.find("pc01").unwrap()).await.unwrap();
    assert_eq!(f.network.woken.lock().clone(), vec![mac(1)]);

    let unknown = f.registry.wake(&f.registry.find("pc02").unwrap()).await;
    assert!(matches!(unknown, Err(FleetError::UnknownHardwareAddress(_))));
}

#[tokio::test]
async fn test_refresh_loop_runs_until_shutdown() {
    let f = fixture(vec![identity(1)], "1");
    f.registry.load().await.unwrap();
    let shutdown = CancellationToken::new();

    let handle = f
        .registry
        .spawn_refresh_loop(Duration::from_millis(10), shutdown.clone());
    wait_until(|| f.network.probes.load(Ordering::SeqCst) >= 2).await;
    shutdown.cancel();
    handle.await.unwrap();

    let probes = f.network.probes.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(f.network.probes.load(Ordering::SeqCst), probes);
}
