// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fleet store adapters
//!
//! [`YamlFleetStore`] keeps the fleet in a YAML document:
//!
//! ```yaml
//! targets:
//!   - address: 192.168.1.21
//!     name: pc01
//! ```
//!
//! [`InMemoryFleetStore`] backs tests and ephemeral runs.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::fleet_store::{FleetStore, StoreError};
use crate::domain::target::TargetIdentity;

#[derive(Debug, Default, Serialize, Deserialize)]
struct FleetDocument {
    #[serde(default)]
    targets: Vec<TargetIdentity>,
}

pub struct YamlFleetStore {
    path: PathBuf,
}

impl YamlFleetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FleetStore for YamlFleetStore {
    async fn load_all(&self) -> Result<Vec<TargetIdentity>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Fleet file not found, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let document: FleetDocument = serde_yaml::from_str(&content)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(document.targets)
    }

    async fn save_all(&self, targets: &[TargetIdentity]) -> Result<(), StoreError> {
        let document = FleetDocument {
            targets: targets.to_vec(),
        };
        let yaml =
            serde_yaml::to_string(&document).map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, yaml).await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryFleetStore {
    targets: RwLock<Vec<TargetIdentity>>,
}

impl InMemoryFleetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(targets: Vec<TargetIdentity>) -> Self {
        Self {
            targets: RwLock::new(targets),
        }
    }
}

#[async_trait]
impl FleetStore for InMemoryFleetStore {
    async fn load_all(&self) -> Result<Vec<TargetIdentity>, StoreError> {
        Ok(self.targets.read().clone())
    }

    async fn save_all(&self, targets: &[TargetIdentity]) -> Result<(), StoreError> {
        *self.targets.write() = targets.to_vec();
        Ok(())
    }
}
