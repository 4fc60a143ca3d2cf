// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fleet persistence port
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Ordered persistence of the operator-supplied target list

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::target::TargetIdentity;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

#[async_trait]
pub trait FleetStore: Send + Sync {
    /// Returns the stored targets in their persisted order.
    async fn load_all(&self) -> Result<Vec<TargetIdentity>, StoreError>;

    async fn save_all(&self, targets: &[TargetIdentity]) -> Result<(), StoreError>;
}
