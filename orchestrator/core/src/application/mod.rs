// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod access;
pub mod collection;
pub mod fleet;
pub mod jobs;
pub mod orchestrator;
pub mod scripts;
pub mod session_pool;
pub mod transfer_engine;

// Re-export the services the presentation layer wires together
pub use access::{AccessController, AccessError};
pub use fleet::{FleetError, FleetRegistry, NetworkServices};
pub use orchestrator::{FleetOrchestrator, OperationReport, OrchestratorError};
pub use scripts::{ScriptCatalog, ScriptEntry};
pub use session_pool::{SessionError, SessionPool};
pub use transfer_engine::TransferEngine;
