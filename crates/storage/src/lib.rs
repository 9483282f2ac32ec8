// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mill-storage: durable job state and the repository catalog.
//!
//! Every job lives in its own directory under the jobs root:
//!
//! ```text
//! <jobs_root>/<jobId>/state.json    # atomic, versioned
//! <jobs_root>/<jobId>/output.log    # append-only, executor-owned
//! <jobs_root>/<jobId>/workspace/    # CoW clone of the repo
//! <jobs_root>/<jobId>/uploads/      # pre-start uploads
//! ```
//!
//! State writes go through a temp file and rename, so a crash leaves either
//! the old document or the new one, never a torn write.

mod job_store;
mod repo_catalog;

pub use job_store::{JobStore, SCHEMA_VERSION};
pub use repo_catalog::RepoCatalog;

use std::path::{Path, PathBuf};

/// Storage failures. Writes are retried once before one of these surfaces.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("corrupt document at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl StoreError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io { path: path.into(), source }
    }

    fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StoreError::Corrupt { path: path.into(), reason: reason.to_string() }
    }
}

/// Write-temp-then-rename with a single retry.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    match try_write_atomic(path, bytes).await {
        Ok(()) => Ok(()),
        Err(first) => {
            tracing::warn!(path = %path.display(), error = %first, "state write failed, retrying once");
            try_write_atomic(path, bytes).await
        }
    }
}

async fn try_write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(|e| StoreError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| StoreError::io(path, e))?;
    Ok(())
}
