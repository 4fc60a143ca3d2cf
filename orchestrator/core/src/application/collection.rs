// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Collection source enumeration
//!
//! Walks a target's collect source and returns the files matching the include
//! pattern. Subtrees that cannot be read are skipped, so a locked folder on
//! one machine never fails the whole collection.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Directory walk with include pattern and optional recursion

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::domain::target::TargetIdentity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedFile {
    pub source: PathBuf,
    /// Path relative to the enumerated root.
    pub relative: PathBuf,
    pub size: u64,
}

/// Files a collection would copy from one target, without copying them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionPreview {
    pub target: TargetIdentity,
    pub root: PathBuf,
    pub files: Vec<CollectedFile>,
    pub error: Option<String>,
}

/// Lists files under `root` whose names match `pattern`.
///
/// Only a missing or unusable root is an error; an unreadable root or subtree
/// yields nothing for that part of the tree.
pub fn enumerate_files(
    root: &Path,
    pattern: &glob::Pattern,
    recurse: bool,
) -> io::Result<Vec<CollectedFile>> {
    match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ))
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            debug!(root = %root.display(), "Collect source not readable, treating as empty");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    }

    let max_depth = if recurse { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(
                    path = ?e.path(),
                    "Skipping unreadable entry during enumeration: {}", e
                );
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        if !pattern.matches(&entry.file_name().to_string_lossy()) {
            continue;
        }

        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => continue,
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(CollectedFile {
            source: entry.path().to_path_buf(),
            relative,
            size,
        });
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("essay.docx"), b"abc").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::create_dir(dir.path().join("week2")).unwrap();
        fs::write(dir.path().join("week2").join("draft.docx"), b"abcdef").unwrap();
        dir
    }

    #[test]
    fn test_pattern_without_recursion() {
        let dir = tree();
        let pattern = glob::Pattern::new("*.docx").unwrap();
        let files = enumerate_files(dir.path(), &pattern, false).unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative, PathBuf::from("essay.docx"));
        assert_eq!(files[0].size, 3);
    }

    #[test]
    fn test_recursion_keeps_relative_paths() {
        let dir = tree();
        let pattern = glob::Pattern::new("*.docx").unwrap();
        let files = enumerate_files(dir.path(), &pattern, true).unwrap();

        let relative: Vec<_> = files.iter().map(|f| f.relative.clone()).collect();
        assert_eq!(
            relative,
            vec![PathBuf::from("essay.docx"), PathBuf::from("week2/draft.docx")]
        );
    }

    #[test]
    fn test_missing_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = glob::Pattern::new("*").unwrap();
        assert!(enumerate_files(&dir.path().join("absent"), &pattern, true).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_link_is_skipped() {
        let dir = tree();
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("dangling")).unwrap();
        let pattern = glob::Pattern::new("*").unwrap();

        let files = enumerate_files(dir.path(), &pattern, true).unwrap();
        assert_eq!(files.len(), 3);
    }
}
