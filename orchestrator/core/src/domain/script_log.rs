// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Script-Run log
//!
//! Converts streamed [`RemoteRecord`]s into log entries. Progress records are
//! folded by activity id so a long-running activity occupies a single entry.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Per-job log of remote records with error/warning counters

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::remote::{ProgressRecord, RemoteRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warning,
    Verbose,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub activity_id: i32,
    pub activity: String,
    pub status: String,
    pub current_operation: Option<String>,
    pub percent_complete: i32,
    /// Hidden while the remote side reports no percentage.
    pub visible: bool,
}

impl From<ProgressRecord> for ProgressEntry {
    fn from(record: ProgressRecord) -> Self {
        Self {
            activity_id: record.activity_id,
            visible: record.percent_complete >= 0,
            activity: record.activity,
            status: record.status,
            current_operation: record.current_operation,
            percent_complete: record.percent_complete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    Message { level: LogLevel, text: String },
    Progress(ProgressEntry),
}

/// What appending a record did to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogChange {
    Appended(usize),
    Updated(usize),
    /// The record does not belong in the log (pipeline output).
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptLog {
    entries: Vec<LogEntry>,
    progress_index: HashMap<i32, usize>,
    errors: u32,
    warnings: u32,
}

impl ScriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: RemoteRecord) -> LogChange {
        let (level, text) = match record {
            RemoteRecord::Error(text) => {
                self.errors += 1;
                (LogLevel::Error, text)
            }
            RemoteRecord::Warning(text) => {
                self.warnings += 1;
                (LogLevel::Warning, text)
            }
            RemoteRecord::Verbose(text) => (LogLevel::Verbose, text),
            RemoteRecord::Debug(text) => (LogLevel::Debug, text),
            RemoteRecord::Progress(progress) => return self.fold_progress(progress),
            RemoteRecord::Output(_) => return LogChange::Ignored,
        };
        self.entries.push(LogEntry::Message { level, text });
        LogChange::Appended(self.entries.len() - 1)
    }

    fn fold_progress(&mut self, record: ProgressRecord) -> LogChange {
        if let Some(&index) = self.progress_index.get(&record.activity_id) {
            if let Some(LogEntry::Progress(entry)) = self.entries.get_mut(index) {
                entry.percent_complete = record.percent_complete;
                entry.visible = record.percent_complete >= 0;
                entry.status = record.status;
                if record.current_operation.is_some() {
                    entry.current_operation = record.current_operation;
                }
                return LogChange::Updated(index);
            }
        }

        let index = self.entries.len();
        self.progress_index.insert(record.activity_id, index);
        self.entries.push(LogEntry::Progress(record.into()));
        LogChange::Appended(index)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&LogEntry> {
        self.entries.get(index)
    }

    pub fn error_count(&self) -> u32 {
        self.errors
    }

    pub fn warning_count(&self) -> u32 {
        self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(id: i32, percent: i32, status: &str) -> RemoteRecord {
        RemoteRecord::Progress(ProgressRecord {
            activity_id: id,
            activity: "Installing".into(),
            status: status.into(),
            current_operation: None,
            percent_complete: percent,
        })
    }

    #[test]
    fn test_progress_deduplicated_by_activity() {
        let mut log = ScriptLog::new();
        assert_eq!(log.append(progress(7, 10, "starting")), LogChange::Appended(0));
        assert_eq!(log.append(progress(7, 60, "halfway")), LogChange::Updated(0));

        assert_eq!(log.entries().len(), 1);
        match &log.entries()[0] {
            LogEntry::Progress(entry) => {
                assert_eq!(entry.percent_complete, 60);
                assert_eq!(entry.status, "halfway");
            }
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn test_distinct_activities_get_own_entries() {
        let mut log = ScriptLog::new();
        log.append(progress(1, 0, "a"));
        log.append(RemoteRecord::Verbose("between".into()));
        log.append(progress(2, 0, "b"));
        assert_eq!(log.append(progress(1, 100, "done")), LogChange::Updated(0));
        assert_eq!(log.entries().len(), 3);
    }

    #[test]
    fn test_counters_and_output() {
        let mut log = ScriptLog::new();
        log.append(RemoteRecord::Error("boom".into()));
        log.append(RemoteRecord::Warning("hmm".into()));
        log.append(RemoteRecord::Warning("hmm again".into()));
        log.append(RemoteRecord::Debug("trace".into()));
        assert_eq!(log.append(RemoteRecord::Output("42".into())), LogChange::Ignored);

        assert_eq!(log.error_count(), 1);
        assert_eq!(log.warning_count(), 2);
        assert_eq!(log.entries().len(), 4);
    }

    #[test]
    fn test_unknown_percent_hidden() {
        let mut log = ScriptLog::new();
        log.append(progress(3, -1, "preparing"));
        match log.entry(0) {
            Some(LogEntry::Progress(entry)) => assert!(!entry.visible),
            other => panic!("unexpected entry {other:?}"),
        }
    }
}
