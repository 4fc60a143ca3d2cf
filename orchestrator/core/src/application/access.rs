// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Access-Toggle
//!
//! Switches a target's outbound internet access by adding or removing its
//! default route, then re-checks the route table so the recorded level
//! reflects what the machine actually did.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Internet access toggling and access-level checks per target

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::session_pool::{SessionError, SessionPool};
use crate::domain::config::NetworkConfig;
use crate::domain::events::FleetEvent;
use crate::domain::remote::{CollectingSink, InvocationState, RemoteRecord};
use crate::domain::target::{InternetAccessLevel, Target, TargetState};
use crate::infrastructure::event_bus::EventBus;

pub const CHECK_ROUTE_SCRIPT: &str =
    r#"Get-NetRoute -ErrorAction Stop | Where DestinationPrefix -EQ "0.0.0.0/0" | measure | Select-Object -ExpandProperty Count"#;

pub const DISABLE_ROUTE_SCRIPT: &str =
    r#"Remove-NetRoute -DestinationPrefix "0.0.0.0/0" -Confirm:$false"#;

pub fn enable_route_script(interface_pattern: &str, default_gateway: &str) -> String {
    format!(
        r#"New-NetRoute -DestinationPrefix "0.0.0.0/0" -InterfaceIndex ((Get-NetIPAddress | where IPAddress -Like "{interface_pattern}").InterfaceIndex) -NextHop {default_gateway} -RouteMetric 0"#
    )
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("remote script failed: {0}")]
    Script(String),

    #[error("unexpected check output: {0:?}")]
    UnexpectedOutput(Vec<String>),
}

pub struct AccessController {
    pool: Arc<SessionPool>,
    network: NetworkConfig,
    events: EventBus,
}

impl AccessController {
    pub fn new(pool: Arc<SessionPool>, network: NetworkConfig, events: EventBus) -> Self {
        Self {
            pool,
            network,
            events,
        }
    }

    fn publish(&self, target: &Target, state: TargetState) {
        self.events.publish(FleetEvent::TargetUpdated {
            target: target.identity().clone(),
            state,
        });
    }

    /// Runs the enable or disable script on `target`, storing any error in the
    /// target's sync slot, then always re-checks the access level.
    pub async fn synchronize(&self, target: &Target, enabled: bool) -> Result<(), AccessError> {
        let state = target.update(|s| {
            s.synchronizing = true;
            s.access_sync_error = None;
        });
        self.publish(target, state);

        let script = if enabled {
            enable_route_script(&self.network.interface_pattern, &self.network.default_gateway)
        } else {
            DISABLE_ROUTE_SCRIPT.to_string()
        };

        info!(target = %target.identity(), enabled, "Synchronizing internet access");
        let result = self.run_script(target, script).await.map(|_| ());

        let state = target.update(|s| {
            s.synchronizing = false;
            if let Err(e) = &result {
                s.access_sync_error = Some(e.to_string());
            }
        });
        self.publish(target, state);
        if let Err(e) = &result {
            warn!(target = %target.identity(), "Access synchronization failed: {}", e);
        }

        self.refresh(target, Duration::ZERO).await;
        result
    }

    /// Forgets the recorded level and checks again.
    pub async fn recheck(&self, target: &Target) {
        let state = target.update(|s| {
            s.access_level = InternetAccessLevel::Unknown;
            s.access_check_error = None;
        });
        self.publish(target, state);
        self.refresh(target, Duration::ZERO).await;
    }

    /// Checks the route table. Skipped when another check on the same target
    /// does not finish within `period`; a zero period always waits.
    pub async fn refresh(&self, target: &Target, period: Duration) {
        let Some(_permit) = target.enter_access_check(period).await else {
            debug!(target = %target.identity(), "Access check already in flight, skipping");
            return;
        };

        let checked = self.check(target).await;
        let state = target.update(|s| match checked {
            Ok(level) => {
                s.access_level = level;
                s.access_check_error = None;
            }
            Err(e) => {
                s.access_level = InternetAccessLevel::Unknown;
                s.access_check_error = Some(e.to_string());
            }
        });
        self.publish(target, state);
    }

    async fn check(&self, target: &Target) -> Result<InternetAccessLevel, AccessError> {
        let records = self.run_script(target, CHECK_ROUTE_SCRIPT.to_string()).await?;
        let output: Vec<String> = records
            .into_iter()
            .filter_map(|record| match record {
                RemoteRecord::Output(text) => Some(text.trim().to_string()),
                _ => None,
            })
            .filter(|text| !text.is_empty())
            .collect();

        match output.last().map(|count| count.parse::<u32>()) {
            Some(Ok(1)) => Ok(InternetAccessLevel::Allowed),
            Some(Ok(_)) => Ok(InternetAccessLevel::Forbidden),
            _ => Err(AccessError::UnexpectedOutput(output)),
        }
    }

    async fn run_script(
        &self,
        target: &Target,
        script: String,
    ) -> Result<Vec<RemoteRecord>, AccessError> {
        let session = self
            .pool
            .acquire(target.identity(), &CancellationToken::new())
            .await?;

        let sink = CollectingSink::new();
        let invoked = session.invoke(&[script], &sink).await;
        self.pool.release(session);

        let records = sink.into_records();
        match invoked {
            Ok(InvocationState::Completed) => Ok(records),
            Ok(state) => Err(AccessError::Script(first_error(&records).unwrap_or_else(|| {
                format!("invocation ended as {state:?}")
            }))),
            Err(e) => Err(AccessError::Session(SessionError::Remote(e))),
        }
    }
}

fn first_error(records: &[RemoteRecord]) -> Option<String> {
    records.iter().find_map(|record| match record {
        RemoteRecord::Error(text) => Some(text.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_script_embeds_network_settings() {
        let script = enable_route_script("192.168.1.*", "192.168.1.1");
        assert!(script.contains(r#"where IPAddress -Like "192.168.1.*""#));
        assert!(script.contains("-NextHop 192.168.1.1 -RouteMetric 0"));
        assert!(script.starts_with(r#"New-NetRoute -DestinationPrefix "0.0.0.0/0""#));
    }

    #[test]
    fn test_first_error() {
        let records = vec![
            RemoteRecord::Verbose("x".into()),
            RemoteRecord::Error("denied".into()),
        ];
        assert_eq!(first_error(&records).as_deref(), Some("denied"));
        assert_eq!(first_error(&[]), None);
    }
}
