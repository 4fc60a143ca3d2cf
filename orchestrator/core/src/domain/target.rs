// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Target
//!
//! One managed machine of the fleet. The identity (address, name) never
//! changes after construction; everything observed about the machine lives in
//! [`TargetState`] behind a short-held lock so readers never block on probes.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Entity for a remote machine with its liveness and access state

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::domain::network::MacAddress;

/// Immutable identity of a target. Two targets are equal iff address and name match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetIdentity {
    pub address: IpAddr,
    pub name: String,
}

impl TargetIdentity {
    pub fn new(address: IpAddr, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
        }
    }

    /// Matches either the display name (case-insensitive) or the textual address.
    pub fn matches(&self, query: &str) -> bool {
        self.name.eq_ignore_ascii_case(query) || self.address.to_string() == query
    }
}

impl fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Result of the last outbound-access check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternetAccessLevel {
    #[default]
    Unknown,
    Allowed,
    Forbidden,
}

impl fmt::Display for InternetAccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InternetAccessLevel::Unknown => write!(f, "unknown"),
            InternetAccessLevel::Allowed => write!(f, "allowed"),
            InternetAccessLevel::Forbidden => write!(f, "forbidden"),
        }
    }
}

/// Everything observed about a target. Snapshots of this are what observers see.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub online: bool,
    pub hardware_address: Option<MacAddress>,
    pub probe_status: String,
    /// Short host name reported by reverse DNS; display only, never part of identity.
    pub host_name: Option<String>,
    pub probe_error: Option<String>,
    pub access_level: InternetAccessLevel,
    pub access_check_error: Option<String>,
    /// Last error raised while toggling access; readable without waiting on the toggle.
    pub access_sync_error: Option<String>,
    pub synchronizing: bool,
}

impl TargetState {
    pub fn access_details(&self) -> String {
        if let Some(error) = &self.access_check_error {
            return format!("Couldn't check internet access.\n{error}");
        }
        match self.access_level {
            InternetAccessLevel::Allowed => "This computer HAS internet access.".to_string(),
            InternetAccessLevel::Forbidden => {
                "This computer DOES NOT have internet access.".to_string()
            }
            InternetAccessLevel::Unknown => {
                "It is still unknown whether this computer has access or not. Please wait."
                    .to_string()
            }
        }
    }
}

/// A managed machine.
pub struct Target {
    identity: TargetIdentity,
    state: RwLock<TargetState>,
    probe_gate: Semaphore,
    access_gate: Semaphore,
}

impl Target {
    pub fn new(identity: TargetIdentity) -> Self {
        Self {
            identity,
            state: RwLock::new(TargetState::default()),
            probe_gate: Semaphore::new(1),
            access_gate: Semaphore::new(1),
        }
    }

    pub fn identity(&self) -> &TargetIdentity {
        &self.identity
    }

    pub fn address(&self) -> IpAddr {
        self.identity.address
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn snapshot(&self) -> TargetState {
        self.state.read().clone()
    }

    /// Applies `change` under the write lock and returns the resulting snapshot.
    pub fn update<F>(&self, change: F) -> TargetState
    where
        F: FnOnce(&mut TargetState),
    {
        let mut state = self.state.write();
        change(&mut state);
        state.clone()
    }

    /// Enters the liveness-probe gate. `None` means a probe is already in
    /// flight and did not finish within `period`; the caller should skip.
    pub async fn enter_probe(&self, period: Duration) -> Option<SemaphorePermit<'_>> {
        enter_gate(&self.probe_gate, period).await
    }

    /// Same policy as [`Target::enter_probe`] for the access-level check.
    pub async fn enter_access_check(&self, period: Duration) -> Option<SemaphorePermit<'_>> {
        enter_gate(&self.access_gate, period).await
    }
}

/// A zero period waits as long as it takes.
async fn enter_gate(gate: &Semaphore, period: Duration) -> Option<SemaphorePermit<'_>> {
    if period.is_zero() {
        return gate.acquire().await.ok();
    }
    match tokio::time::timeout(period, gate.acquire()).await {
        Ok(permit) => permit.ok(),
        Err(_) => None,
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for Target {}

impl Hash for Target {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("identity", &self.identity)
            .field("state", &*self.state.read())
            .finish()
    }
}
