// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain model
//!
//! Targets, job state machines, progress accounting, the remote execution
//! model and the ports infrastructure adapters implement.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Value objects, entities and outbound ports

pub mod config;
pub mod events;
pub mod fleet_store;
pub mod job;
pub mod network;
pub mod progress;
pub mod remote;
pub mod script_log;
pub mod target;
pub mod transfer;
