// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Transfer progress bookkeeping
//!
//! Each transfer job owns one [`TransferLedger`]. Workers record
//! `(transferred, total)` per file; the aggregator only ever reads a locked
//! snapshot.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Per-file byte counters and fleet-wide progress totals

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::iter::Sum;
use std::ops::Add;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemProgress {
    pub total: u64,
    pub transferred: u64,
}

impl ItemProgress {
    pub fn is_complete(&self) -> bool {
        self.transferred >= self.total
    }
}

/// Summed byte counters. The fraction of an empty total is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressTotals {
    pub transferred: u64,
    pub total: u64,
}

impl ProgressTotals {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.transferred as f64 / self.total as f64
    }
}

impl Add for ProgressTotals {
    type Output = ProgressTotals;

    fn add(self, rhs: Self) -> Self::Output {
        ProgressTotals {
            transferred: self.transferred.saturating_add(rhs.transferred),
            total: self.total.saturating_add(rhs.total),
        }
    }
}

impl Sum for ProgressTotals {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(ProgressTotals::default(), Add::add)
    }
}

#[derive(Debug, Default)]
pub struct TransferLedger {
    items: Mutex<BTreeMap<PathBuf, ItemProgress>>,
}

impl TransferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, item: &Path, transferred: u64, total: u64) {
        self.items
            .lock()
            .insert(item.to_path_buf(), ItemProgress { total, transferred });
    }

    pub fn snapshot(&self) -> BTreeMap<PathBuf, ItemProgress> {
        self.items.lock().clone()
    }

    pub fn totals(&self) -> ProgressTotals {
        self.items
            .lock()
            .values()
            .map(|item| ProgressTotals {
                transferred: item.transferred,
                total: item.total,
            })
            .sum()
    }
}

/// Renders a byte count for humans, 1024 based.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ledger_is_zero_not_nan() {
        let ledger = TransferLedger::new();
        let totals = ledger.totals();
        assert_eq!(totals, ProgressTotals::default());
        assert_eq!(totals.fraction(), 0.0);
    }

    #[test]
    fn test_record_overwrites_per_item() {
        let ledger = TransferLedger::new();
        ledger.record(Path::new("a.txt"), 50, 100);
        ledger.record(Path::new("a.txt"), 100, 100);
        ledger.record(Path::new("b.txt"), 0, 300);

        let totals = ledger.totals();
        assert_eq!(totals.transferred, 100);
        assert_eq!(totals.total, 400);
        assert_eq!(totals.fraction(), 0.25);
        assert!(ledger.snapshot()[Path::new("a.txt")].is_complete());
    }

    #[test]
    fn test_totals_sum() {
        let sum: ProgressTotals = [
            ProgressTotals { transferred: 1, total: 2 },
            ProgressTotals { transferred: 3, total: 4 },
        ]
        .into_iter()
        .sum();
        assert_eq!(sum, ProgressTotals { transferred: 4, total: 6 });
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
