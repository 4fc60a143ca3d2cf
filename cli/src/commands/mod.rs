// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the labfleet CLI

pub mod collect;
pub mod config;
pub mod fleet;
pub mod internet;
pub mod output;
pub mod run;
pub mod send;

pub use self::collect::CollectCommand;
pub use self::config::ConfigCommand;
pub use self::fleet::FleetCommand;
pub use self::internet::InternetCommand;
pub use self::run::RunCommand;
pub use self::send::SendCommand;
