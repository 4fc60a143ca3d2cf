// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Transfer Engine
//!
//! Wraps the single-file [`FileCopier`] with progress reporting and
//! cooperative cancellation. Cancellation is checked before the copy starts,
//! on every chunk, and once more after the copier returns.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** One-file copy with progress and cancellation

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::transfer::{ChunkControl, CopyError, FileCopier};

pub struct TransferEngine {
    copier: Arc<dyn FileCopier>,
}

impl TransferEngine {
    pub fn new(copier: Arc<dyn FileCopier>) -> Self {
        Self { copier }
    }

    /// Copies `source` to `destination`, calling `on_progress(transferred, total)`
    /// as chunks land.
    pub async fn copy<F>(
        &self,
        source: &Path,
        destination: &Path,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<(), CopyError>
    where
        F: FnMut(u64, u64) + Send,
    {
        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }

        debug!(source = %source.display(), destination = %destination.display(), "Copying file");

        let mut on_chunk = |transferred: u64, total: u64| {
            on_progress(transferred, total);
            if cancel.is_cancelled() {
                ChunkControl::Cancel
            } else {
                ChunkControl::Continue
            }
        };

        let result = self
            .copier
            .copy_file(source, destination, cancel, &mut on_chunk)
            .await;

        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }
        result
    }
}
