// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Script catalog
//!
//! Scripts stored in a local directory, offered by display name. A file
//! whose first line reads `# Some name` is listed as "Some name"; otherwise
//! the first line itself, or the file stem when the file is empty.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEntry {
    pub name: String,
    pub path: PathBuf,
}

impl ScriptEntry {
    pub fn read(&self) -> io::Result<String> {
        fs::read_to_string(&self.path)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptCatalog {
    entries: Vec<ScriptEntry>,
}

impl ScriptCatalog {
    /// Loads every regular file directly under `dir`, sorted by display name.
    /// A missing directory yields an empty catalog.
    pub fn load(dir: &Path) -> io::Result<Self> {
        let read_dir = match fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "Script directory not found");
                return Ok(Self::default());
            }
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(content) => entries.push(ScriptEntry {
                    name: display_name(&path, &content),
                    path,
                }),
                Err(e) => warn!(path = %path.display(), "Skipping unreadable script: {}", e),
            }
        }
        entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ScriptEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Matches a display name (case-insensitive) or a file name.
    pub fn find(&self, query: &str) -> Option<&ScriptEntry> {
        self.entries.iter().find(|entry| {
            entry.name.eq_ignore_ascii_case(query)
                || entry
                    .path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy() == query)
        })
    }
}

pub fn display_name(path: &Path, content: &str) -> String {
    let first_line = content.lines().next().map(str::trim).unwrap_or_default();
    let name = first_line
        .strip_prefix('#')
        .map(str::trim)
        .unwrap_or(first_line);
    if !name.is_empty() {
        return name.to_string();
    }
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
