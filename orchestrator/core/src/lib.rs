// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lab fleet orchestration core
//!
//! Runs one operation (distribute files, collect files, run scripts, toggle
//! internet access) against many lab machines at once, with bounded remote
//! sessions, aggregate progress and cooperative cancellation.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, application services and infrastructure adapters

pub mod domain;
pub mod application;
pub mod infrastructure;
