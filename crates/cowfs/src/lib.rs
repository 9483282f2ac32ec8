// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mill-cowfs: Copy-on-Write workspace materialization.
//!
//! Clones a repository's canonical copy into a per-job workspace using the
//! cheapest mechanism the target filesystem supports: reflink, btrfs
//! snapshot, rsync, or a plain recursive copy. Capability is detected once
//! per target directory and cached; a failed CoW attempt falls back one
//! level at a time.

mod clone;
mod detect;

pub use clone::{destroy_workspace, CloneEngine};

use std::path::PathBuf;

/// Workspace materialization failures.
#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("source does not exist: {0}")]
    SourceMissing(PathBuf),

    #[error("target already exists: {0}")]
    TargetExists(PathBuf),

    #[error("no space left on device")]
    NoSpace,

    #[error("copy failed: {0}")]
    CopyFailed(String),

    #[error("io error on {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

impl CloneError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        if source.raw_os_error() == Some(28) {
            // ENOSPC
            return CloneError::NoSpace;
        }
        CloneError::Io { path: path.into(), source }
    }
}
