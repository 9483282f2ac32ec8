// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Per-job workspace record.

use crate::id::JobId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a workspace was materialized from the canonical clone.
///
/// Ordered from cheapest to most expensive; a failed CoW attempt falls back
/// one level at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CowMode {
    /// `cp --reflink=always`: shared extents, copy-on-write.
    Reflink,
    /// Btrfs subvolume snapshot.
    Snapshot,
    /// `rsync -a` full copy.
    Rsync,
    /// Recursive copy; last resort when rsync is unavailable.
    Copy,
}

impl CowMode {
    /// The next-cheapest mode to try after this one fails, if any.
    pub fn fallback(&self) -> Option<CowMode> {
        match self {
            CowMode::Reflink => Some(CowMode::Snapshot),
            CowMode::Snapshot => Some(CowMode::Rsync),
            CowMode::Rsync => Some(CowMode::Copy),
            CowMode::Copy => None,
        }
    }
}

crate::simple_display! {
    CowMode {
        Reflink => "reflink",
        Snapshot => "snapshot",
        Rsync => "rsync",
        Copy => "copy",
    }
}

/// A writable clone of a registered repository, owned by exactly one job
/// and destroyed with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub job_id: JobId,
    pub repo_name: String,
    pub path: PathBuf,
    pub created_at_ms: u64,
    pub cow_mode: CowMode,
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
