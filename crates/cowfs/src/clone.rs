// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Workspace clone and destroy operations.

use crate::detect::{detect_mode, run_tool};
use crate::CloneError;
use mill_core::CowMode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Materializes per-job workspaces from canonical repository clones.
///
/// Cheap to clone and share; the capability cache is keyed by the target's
/// parent directory so detection runs once per jobs root.
#[derive(Clone, Default)]
pub struct CloneEngine {
    cache: std::sync::Arc<Mutex<HashMap<PathBuf, CowMode>>>,
}

impl CloneEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed the capability cache for a directory. Tests use this to
    /// force a mode; production code lets detection decide.
    pub fn with_mode(dir: impl Into<PathBuf>, mode: CowMode) -> Self {
        let engine = Self::new();
        engine.cache.lock().insert(dir.into(), mode);
        engine
    }

    /// Clone `source` into `dest`.
    ///
    /// Atomic from the caller's perspective: the tree is materialized under
    /// `<dest>.partial` and renamed into place, so `dest` either appears
    /// fully formed or not at all. A failed CoW attempt falls back one
    /// level (reflink → snapshot → rsync → copy) before giving up.
    ///
    /// Reads of `source` are tolerated concurrently; no lock is taken on it.
    pub async fn create_workspace(
        &self,
        source: &Path,
        dest: &Path,
    ) -> Result<CowMode, CloneError> {
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(CloneError::SourceMissing(source.to_path_buf()));
        }
        if tokio::fs::try_exists(dest).await.unwrap_or(false) {
            return Err(CloneError::TargetExists(dest.to_path_buf()));
        }
        let parent = dest.parent().ok_or_else(|| CloneError::TargetExists(dest.to_path_buf()))?;
        tokio::fs::create_dir_all(parent).await.map_err(|e| CloneError::io(parent, e))?;

        let partial = partial_path(dest);
        remove_tree_best_effort(&partial).await;

        let mut mode = self.mode_for(parent).await;
        loop {
            match clone_tree(mode, source, &partial).await {
                Ok(()) => break,
                Err(CloneError::CopyFailed(reason)) => {
                    remove_tree_best_effort(&partial).await;
                    match mode.fallback() {
                        Some(next) => {
                            tracing::warn!(
                                source = %source.display(),
                                %mode,
                                fallback = %next,
                                reason,
                                "clone attempt failed, falling back"
                            );
                            // Cache the downgrade so later jobs skip the dead end.
                            self.cache.lock().insert(parent.to_path_buf(), next);
                            mode = next;
                        }
                        None => return Err(CloneError::CopyFailed(reason)),
                    }
                }
                Err(other) => {
                    remove_tree_best_effort(&partial).await;
                    return Err(other);
                }
            }
        }

        tokio::fs::rename(&partial, dest).await.map_err(|e| CloneError::io(dest, e))?;
        tracing::info!(source = %source.display(), dest = %dest.display(), %mode, "workspace materialized");
        Ok(mode)
    }

    async fn mode_for(&self, dir: &Path) -> CowMode {
        if let Some(mode) = self.cache.lock().get(dir).copied() {
            return mode;
        }
        let mode = detect_mode(dir).await;
        tracing::debug!(dir = %dir.display(), %mode, "filesystem capability detected");
        self.cache.lock().insert(dir.to_path_buf(), mode);
        mode
    }
}

/// Remove a workspace tree recursively.
///
/// Failures are surfaced so the caller can log them, but the job is marked
/// destroyed regardless; a stranded tree is the janitor's problem, not a
/// state leak.
pub async fn destroy_workspace(path: &Path) -> Result<(), CloneError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(_) => {
            // Btrfs snapshots refuse plain removal; try subvolume delete.
            if run_tool("btrfs", &[OsStr::new("subvolume"), OsStr::new("delete"), path.as_os_str()])
                .await
                .is_ok()
            {
                return Ok(());
            }
            match tokio::fs::remove_dir_all(path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(CloneError::io(path, e)),
            }
        }
    }
}

async fn clone_tree(mode: CowMode, source: &Path, partial: &Path) -> Result<(), CloneError> {
    match mode {
        CowMode::Reflink => {
            run_tool(
                "cp",
                &[
                    OsStr::new("-a"),
                    OsStr::new("--reflink=always"),
                    source.as_os_str(),
                    partial.as_os_str(),
                ],
            )
            .await
        }
        CowMode::Snapshot => {
            run_tool(
                "btrfs",
                &[
                    OsStr::new("subvolume"),
                    OsStr::new("snapshot"),
                    source.as_os_str(),
                    partial.as_os_str(),
                ],
            )
            .await
        }
        CowMode::Rsync => {
            let mut from = source.as_os_str().to_os_string();
            from.push("/");
            let mut to = partial.as_os_str().to_os_string();
            to.push("/");
            run_tool("rsync", &[OsStr::new("-a"), from.as_os_str(), to.as_os_str()]).await
        }
        CowMode::Copy => {
            run_tool("cp", &[OsStr::new("-a"), source.as_os_str(), partial.as_os_str()]).await
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    dest.with_file_name(name)
}

async fn remove_tree_best_effort(path: &Path) {
    let _ = tokio::fs::remove_dir_all(path).await;
}

#[cfg(test)]
#[path = "clone_tests.rs"]
mod tests;
