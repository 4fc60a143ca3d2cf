// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Local file copier
//!
//! Copies through the file system (lab shares are mounted locally). Data is
//! written to a `<destination>.partial` sidecar and renamed into place once
//! complete. A `<destination>.partial.source` marker next to the sidecar
//! records the source path, size and modification time; an interrupted copy
//! resumes from the sidecar's length only while the marker still matches the
//! source, otherwise it starts over.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements the [`FileCopier`] port over tokio::fs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::transfer::{ChunkControl, CopyError, FileCopier};

const PARTIAL_SUFFIX: &str = "partial";
const MARKER_SUFFIX: &str = "source";

/// Identifies the source a sidecar was filled from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SourceFingerprint {
    path: PathBuf,
    size: u64,
    modified_nanos: Option<u64>,
}

impl SourceFingerprint {
    fn of(source: &Path, meta: &std::fs::Metadata) -> Self {
        let modified_nanos = meta
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .and_then(|since| u64::try_from(since.as_nanos()).ok());
        Self {
            path: source.to_path_buf(),
            size: meta.len(),
            modified_nanos,
        }
    }
}

pub struct LocalFileCopier {
    chunk_size: usize,
}

impl LocalFileCopier {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn partial_path(destination: &Path) -> PathBuf {
        let mut name = destination.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(PARTIAL_SUFFIX);
        destination.with_file_name(name)
    }

    pub fn marker_path(destination: &Path) -> PathBuf {
        let partial = Self::partial_path(destination);
        let mut name = partial.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(MARKER_SUFFIX);
        partial.with_file_name(name)
    }

    async fn read_marker(marker: &Path) -> Option<SourceFingerprint> {
        let text = fs::read_to_string(marker).await.ok()?;
        serde_yaml::from_str(&text).ok()
    }

    async fn write_marker(marker: &Path, fingerprint: &SourceFingerprint) -> std::io::Result<()> {
        let text = serde_yaml::to_string(fingerprint)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(marker, text).await
    }

    /// Opens the sidecar, returning it with the offset to resume from. A
    /// sidecar longer than the source, or one whose marker names a different
    /// source, is stale and gets truncated.
    async fn open_partial(
        partial: &Path,
        marker: &Path,
        fingerprint: &SourceFingerprint,
    ) -> std::io::Result<(File, u64)> {
        let mut existing = match fs::metadata(partial).await {
            Ok(meta) if meta.is_file() && meta.len() <= fingerprint.size => meta.len(),
            Ok(_) => 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        if existing > 0 && Self::read_marker(marker).await.as_ref() != Some(fingerprint) {
            debug!(partial = %partial.display(), "Discarding partial copy of another source");
            existing = 0;
        }
        if existing == 0 {
            Self::write_marker(marker, fingerprint).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(existing == 0)
            .open(partial)
            .await?;
        if existing > 0 {
            file.seek(SeekFrom::Start(existing)).await?;
        }
        Ok((file, existing))
    }
}

impl Default for LocalFileCopier {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

#[async_trait]
impl FileCopier for LocalFileCopier {
    async fn copy_file(
        &self,
        source: &Path,
        destination: &Path,
        cancel: &CancellationToken,
        on_chunk: &mut (dyn FnMut(u64, u64) -> ChunkControl + Send),
    ) -> Result<(), CopyError> {
        let mut reader = File::open(source)
            .await
            .map_err(|e| CopyError::io(source, e))?;
        let source_meta = reader
            .metadata()
            .await
            .map_err(|e| CopyError::io(source, e))?;
        let fingerprint = SourceFingerprint::of(source, &source_meta);
        let total = fingerprint.size;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CopyError::io(parent, e))?;
        }

        let partial = Self::partial_path(destination);
        let marker = Self::marker_path(destination);
        let (mut writer, mut transferred) = Self::open_partial(&partial, &marker, &fingerprint)
            .await
            .map_err(|e| CopyError::io(&partial, e))?;
        if transferred > 0 {
            debug!(
                destination = %destination.display(),
                offset = transferred,
                "Resuming partial copy"
            );
            reader
                .seek(SeekFrom::Start(transferred))
                .await
                .map_err(|e| CopyError::io(source, e))?;
        }

        if on_chunk(transferred, total) == ChunkControl::Cancel {
            return Err(CopyError::Cancelled);
        }

        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            if cancel.is_cancelled() {
                return Err(CopyError::Cancelled);
            }
            let read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| CopyError::io(source, e))?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .await
                .map_err(|e| CopyError::io(&partial, e))?;
            transferred += read as u64;

            if on_chunk(transferred, total.max(transferred)) == ChunkControl::Cancel {
                writer.flush().await.map_err(|e| CopyError::io(&partial, e))?;
                return Err(CopyError::Cancelled);
            }
        }

        writer.flush().await.map_err(|e| CopyError::io(&partial, e))?;
        writer.sync_all().await.map_err(|e| CopyError::io(&partial, e))?;
        drop(writer);
        fs::rename(&partial, destination)
            .await
            .map_err(|e| CopyError::io(destination, e))?;
        if let Err(e) = fs::remove_file(&marker).await {
            debug!(marker = %marker.display(), "Could not remove copy marker: {}", e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn copy(
        copier: &LocalFileCopier,
        source: &Path,
        destination: &Path,
        cancel_after: Option<u64>,
    ) -> (Result<(), CopyError>, Vec<(u64, u64)>) {
        let mut calls = Vec::new();
        let mut on_chunk = |done: u64, total: u64| {
            calls.push((done, total));
            match cancel_after {
                Some(limit) if done >= limit => ChunkControl::Cancel,
                _ => ChunkControl::Continue,
            }
        };
        let result = copier
            .copy_file(source, destination, &CancellationToken::new(), &mut on_chunk)
            .await;
        (result, calls)
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            LocalFileCopier::partial_path(Path::new("/a/b/report.docx")),
            PathBuf::from("/a/b/report.docx.partial")
        );
        assert_eq!(
            LocalFileCopier::marker_path(Path::new("/a/b/report.docx")),
            PathBuf::from("/a/b/report.docx.partial.source")
        );
    }

    #[tokio::test]
    async fn test_copy_creates_parents_and_reports_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.bin");
        std::fs::write(&source, vec![7u8; 10]).unwrap();
        let destination = dir.path().join("deep/er/dst.bin");

        let copier = LocalFileCopier::new(4);
        let (result, calls) = copy(&copier, &source, &destination, None).await;

        result.unwrap();
        assert_eq!(calls, vec![(0, 10), (4, 10), (8, 10), (10, 10)]);
        assert_eq!(std::fs::read(&destination).unwrap(), vec![7u8; 10]);
        assert!(!LocalFileCopier::partial_path(&destination).exists());
        assert!(!LocalFileCopier::marker_path(&destination).exists());
    }

    #[tokio::test]
    async fn test_cancelled_copy_resumes_from_partial() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.bin");
        let content: Vec<u8> = (0..20u8).collect();
        std::fs::write(&source, &content).unwrap();
        let destination = dir.path().join("dst.bin");
        let copier = LocalFileCopier::new(5);

        let (result, _) = copy(&copier, &source, &destination, Some(10)).await;
        assert!(matches!(result, Err(CopyError::Cancelled)));
        assert!(!destination.exists());
        assert_eq!(
            std::fs::metadata(LocalFileCopier::partial_path(&destination))
                .unwrap()
                .len(),
            10
        );

        let (result, calls) = copy(&copier, &source, &destination, None).await;
        result.unwrap();
        assert_eq!(calls.first(), Some(&(10, 20)));
        assert_eq!(std::fs::read(&destination).unwrap(), content);
    }

    #[tokio::test]
    async fn test_unmarked_partial_is_not_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.txt");
        std::fs::write(&source, b"NEW-CONTENT-V2").unwrap();
        let destination = dir.path().join("dst.txt");
        std::fs::write(LocalFileCopier::partial_path(&destination), b"OLDOLD").unwrap();

        let (result, calls) = copy(&LocalFileCopier::new(4), &source, &destination, None).await;

        result.unwrap();
        assert_eq!(calls.first(), Some(&(0, 14)));
        assert_eq!(std::fs::read(&destination).unwrap(), b"NEW-CONTENT-V2");
    }

    #[tokio::test]
    async fn test_partial_of_other_source_starts_over() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.txt");
        let second = dir.path().join("second.txt");
        std::fs::write(&first, b"aaaaaaaaaaaa").unwrap();
        std::fs::write(&second, b"bbbbbbbbbbbbbbbb").unwrap();
        let destination = dir.path().join("dst.txt");
        let copier = LocalFileCopier::new(4);

        let (result, _) = copy(&copier, &first, &destination, Some(8)).await;
        assert!(matches!(result, Err(CopyError::Cancelled)));
        assert!(LocalFileCopier::marker_path(&destination).exists());

        let (result, calls) = copy(&copier, &second, &destination, None).await;
        result.unwrap();
        assert_eq!(calls.first(), Some(&(0, 16)));
        assert_eq!(std::fs::read(&destination).unwrap(), b"bbbbbbbbbbbbbbbb");
    }

    #[tokio::test]
    async fn test_missing_source_reports_os_error() {
        let dir = tempfile::tempdir().unwrap();
        let copier = LocalFileCopier::default();
        let (result, calls) = copy(
            &copier,
            &dir.path().join("absent"),
            &dir.path().join("dst"),
            None,
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.os_code(), Some(2));
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn test_token_cancellation_stops_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.bin");
        std::fs::write(&source, vec![1u8; 8]).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut on_chunk = |_: u64, _: u64| ChunkControl::Continue;
        let result = LocalFileCopier::new(2)
            .copy_file(&source, &dir.path().join("dst"), &cancel, &mut on_chunk)
            .await;
        assert!(matches!(result, Err(CopyError::Cancelled)));
    }
}
