// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod fleet_store;
pub mod local_copy;
pub mod mac_cache;
pub mod network;
pub mod process_transport;

pub use event_bus::{EventBus, EventBusError};
pub use fleet_store::{InMemoryFleetStore, YamlFleetStore};
pub use local_copy::LocalFileCopier;
pub use mac_cache::FileHardwareAddressCache;
pub use network::{ArpTableResolver, DnsHostNameResolver, TcpLivenessProber, UdpWakeOnLan};
pub use process_transport::ProcessTransport;
