// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Network primitives consumed by target probing
//!
//! Hardware addresses, the Wake-on-LAN magic packet and the ports the fleet
//! registry uses to reach machines (liveness, ARP, reverse DNS, wake).
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Value objects and outbound ports for machine discovery state

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Length of a Wake-on-LAN magic packet: 6 sync bytes followed by the MAC 16 times.
pub const MAGIC_PACKET_LEN: usize = 6 + 16 * 6;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("invalid hardware address: {0}")]
    InvalidHardwareAddress(String),

    #[error("host {0} is unreachable: {1}")]
    Unreachable(IpAddr, String),

    #[error("could not resolve {0}: {1}")]
    Resolution(IpAddr, String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 48-bit IEEE 802 hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Builds the Wake-on-LAN payload for this address.
    pub fn magic_packet(&self) -> [u8; MAGIC_PACKET_LEN] {
        let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
        for chunk in packet[6..].chunks_exact_mut(6) {
            chunk.copy_from_slice(&self.0);
        }
        packet
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = NetworkError;

    /// Accepts `aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff` and bare `aabbccddeeff`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();
        if hex.len() != 12 {
            return Err(NetworkError::InvalidHardwareAddress(s.to_string()));
        }

        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| NetworkError::InvalidHardwareAddress(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = NetworkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(value: MacAddress) -> Self {
        value.to_string()
    }
}

/// Strips the domain suffix from a fully-qualified host name.
pub fn short_host_name(fqdn: &str) -> &str {
    fqdn.split('.').next().unwrap_or(fqdn)
}

#[async_trait]
pub trait LivenessProber: Send + Sync {
    /// Returns the round-trip time when the host answers.
    async fn probe(&self, address: IpAddr) -> Result<Duration, NetworkError>;
}

#[async_trait]
pub trait HardwareAddressResolver: Send + Sync {
    async fn resolve(&self, address: IpAddr) -> Result<MacAddress, NetworkError>;
}

/// Local store of previously resolved hardware addresses, keyed by network address.
#[async_trait]
pub trait HardwareAddressCache: Send + Sync {
    async fn get(&self, address: IpAddr) -> Option<MacAddress>;
    async fn put(&self, address: IpAddr, mac: MacAddress) -> Result<(), NetworkError>;
}

#[async_trait]
pub trait HostNameResolver: Send + Sync {
    async fn reverse_lookup(&self, address: IpAddr) -> Result<String, NetworkError>;
}

#[async_trait]
pub trait WakeOnLan: Send + Sync {
    async fn wake(&self, mac: MacAddress) -> Result<(), NetworkError>;
}
