// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! File copy port
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Outbound port for single-file copies with chunk callbacks

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Returned from the chunk callback to continue or abort the copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkControl {
    Continue,
    Cancel,
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("copy cancelled")]
    Cancelled,

    #[error("failed to copy {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CopyError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CopyError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn os_code(&self) -> Option<i32> {
        match self {
            CopyError::Io { source, .. } => source.raw_os_error(),
            CopyError::Cancelled => None,
        }
    }
}

/// Copies one file, reporting `(transferred, total)` after every chunk.
///
/// A cancelled copy may leave a partial artifact behind; callers must not rely
/// on its contents.
#[async_trait]
pub trait FileCopier: Send + Sync {
    async fn copy_file(
        &self,
        source: &Path,
        destination: &Path,
        cancel: &CancellationToken,
        on_chunk: &mut (dyn FnMut(u64, u64) -> ChunkControl + Send),
    ) -> Result<(), CopyError>;
}
