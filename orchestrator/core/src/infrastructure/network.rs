// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Network adapters
//!
//! - [`TcpLivenessProber`]: TCP connect to the remote management port. A
//!   refused connection still proves the host is up.
//! - [`ArpTableResolver`]: `/proc/net/arp`, falling back to `arp -a`.
//! - [`DnsHostNameResolver`]: reverse DNS via `dns_lookup`.
//! - [`UdpWakeOnLan`]: magic packet to a broadcast address.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements the machine discovery ports from `domain::network`

use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::net::{TcpStream, UdpSocket};
use tokio::process::Command;
use tracing::debug;

use crate::domain::network::{
    HardwareAddressResolver, HostNameResolver, LivenessProber, MacAddress, NetworkError, WakeOnLan,
};

pub struct TcpLivenessProber {
    port: u16,
    timeout: Duration,
}

impl TcpLivenessProber {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

#[async_trait]
impl LivenessProber for TcpLivenessProber {
    async fn probe(&self, address: IpAddr) -> Result<Duration, NetworkError> {
        let started = Instant::now();
        let socket = SocketAddr::new(address, self.port);
        match tokio::time::timeout(self.timeout, TcpStream::connect(socket)).await {
            Ok(Ok(_)) => Ok(started.elapsed()),
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => Ok(started.elapsed()),
            Ok(Err(e)) => Err(NetworkError::Unreachable(address, e.to_string())),
            Err(_) => Err(NetworkError::Unreachable(
                address,
                format!("no answer within {} ms", self.timeout.as_millis()),
            )),
        }
    }
}

/// Looks the address up in the kernel neighbour table.
pub struct ArpTableResolver {
    table_path: PathBuf,
}

impl ArpTableResolver {
    pub fn new() -> Self {
        Self::with_table_path("/proc/net/arp")
    }

    pub fn with_table_path(path: impl Into<PathBuf>) -> Self {
        Self {
            table_path: path.into(),
        }
    }

    async fn from_arp_command(&self, address: IpAddr) -> Result<MacAddress, NetworkError> {
        let output = Command::new("arp")
            .arg("-a")
            .output()
            .await
            .map_err(|e| NetworkError::Resolution(address, format!("failed to run arp: {e}")))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_arp_output(&stdout, address)
            .ok_or_else(|| NetworkError::Resolution(address, "not in the ARP table".to_string()))
    }
}

impl Default for ArpTableResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HardwareAddressResolver for ArpTableResolver {
    async fn resolve(&self, address: IpAddr) -> Result<MacAddress, NetworkError> {
        match tokio::fs::read_to_string(&self.table_path).await {
            Ok(table) => {
                if let Some(mac) = parse_proc_arp(&table, address) {
                    return Ok(mac);
                }
            }
            Err(e) => debug!(path = %self.table_path.display(), "ARP table unavailable: {}", e),
        }
        self.from_arp_command(address).await
    }
}

/// Parses the `/proc/net/arp` layout:
/// `IP address  HW type  Flags  HW address  Mask  Device`.
pub fn parse_proc_arp(table: &str, address: IpAddr) -> Option<MacAddress> {
    let wanted = address.to_string();
    table.lines().skip(1).find_map(|line| {
        let columns: Vec<&str> = line.split_whitespace().collect();
        match columns.as_slice() {
            [ip, _hw_type, _flags, mac, ..] if *ip == wanted => parse_mac_token(mac),
            _ => None,
        }
    })
}

/// Parses `arp -a` output from Windows (`10.0.0.1  00-11-22-33-44-55  dynamic`)
/// and BSD/Linux (`host (10.0.0.1) at 0:11:22:33:44:55 on en0`).
pub fn parse_arp_output(output: &str, address: IpAddr) -> Option<MacAddress> {
    let wanted = address.to_string();
    output.lines().find_map(|line| {
        let mut tokens = line
            .split_whitespace()
            .map(|token| token.trim_start_matches('(').trim_end_matches(')'));
        tokens.position(|token| token == wanted)?;
        tokens.find_map(parse_mac_token)
    })
}

/// Accepts one- or two-digit octets separated by `:` or `-`. The all-zero
/// address marks an incomplete entry and is rejected.
fn parse_mac_token(token: &str) -> Option<MacAddress> {
    let parts: Vec<&str> = token.split([':', '-']).collect();
    if parts.len() != 6 {
        return None;
    }
    let mut octets = [0u8; 6];
    for (octet, part) in octets.iter_mut().zip(&parts) {
        if part.is_empty() || part.len() > 2 {
            return None;
        }
        *octet = u8::from_str_radix(part, 16).ok()?;
    }
    (octets != [0; 6]).then(|| MacAddress::new(octets))
}

#[derive(Default)]
pub struct DnsHostNameResolver;

#[async_trait]
impl HostNameResolver for DnsHostNameResolver {
    async fn reverse_lookup(&self, address: IpAddr) -> Result<String, NetworkError> {
        tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&address))
            .await
            .map_err(|e| NetworkError::Resolution(address, e.to_string()))?
            .map_err(|e| NetworkError::Resolution(address, e.to_string()))
    }
}

pub struct UdpWakeOnLan {
    broadcast: SocketAddr,
}

impl UdpWakeOnLan {
    pub fn new(broadcast: SocketAddr) -> Self {
        Self { broadcast }
    }
}

#[async_trait]
impl WakeOnLan for UdpWakeOnLan {
    async fn wake(&self, mac: MacAddress) -> Result<(), NetworkError> {
        let bind: SocketAddr = if self.broadcast.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.set_broadcast(true)?;
        let packet = mac.magic_packet();
        socket.send_to(&packet, self.broadcast).await?;
        debug!(%mac, broadcast = %self.broadcast, "Magic packet sent");
        Ok(())
    }
}
