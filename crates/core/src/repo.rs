// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Registered repository record and registration lifecycle.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where a repository's content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoKind {
    /// Cloned from a git remote.
    Git,
    /// Copied from a local folder.
    Folder,
}

crate::simple_display! {
    RepoKind {
        Git => "git",
        Folder => "folder",
    }
}

/// Registration lifecycle: `registering → cloning → (indexing?) → ready`,
/// or terminal `clone_failed` / `index_failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Registering,
    Cloning,
    Indexing,
    Ready,
    CloneFailed,
    IndexFailed,
}

impl RegistrationStatus {
    /// Jobs may only target a repo whose clone is complete.
    pub fn is_usable(&self) -> bool {
        matches!(self, RegistrationStatus::Ready | RegistrationStatus::Indexing)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RegistrationStatus::CloneFailed | RegistrationStatus::IndexFailed)
    }
}

crate::simple_display! {
    RegistrationStatus {
        Registering => "registering",
        Cloning => "cloning",
        Indexing => "indexing",
        Ready => "ready",
        CloneFailed => "clone_failed",
        IndexFailed => "index_failed",
    }
}

/// Semantic index state, tracked separately from registration so a repo
/// stays usable while a later re-index runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    /// Repo is not index-aware or the indexer is not configured.
    Disabled,
    Pending,
    Building,
    Built,
    Failed,
}

crate::simple_display! {
    IndexStatus {
        Disabled => "disabled",
        Pending => "pending",
        Building => "building",
        Built => "built",
        Failed => "failed",
    }
}

/// Metadata captured from a git clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitMetadata {
    pub remote_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_commit: Option<String>,
}

/// A registered repository.
///
/// The canonical clone under `local_path` is read-only to jobs; only the
/// registry's own clone/index task writes to it, and only while the status
/// is `Cloning`/`Indexing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    /// Unique name, also the directory name under the repos root.
    pub name: String,
    pub kind: RepoKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub local_path: PathBuf,
    pub registered_at_ms: u64,
    pub registration_status: RegistrationStatus,
    pub index_status: IndexStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_metadata: Option<GitMetadata>,
    /// Whether the external indexer runs for this repo. Jobs may override
    /// per-run, but only downward: a non-index-aware repo cannot be forced on.
    pub index_aware: bool,
}

/// A job asked for indexing on a repo that is not index-aware.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("repo {name} is not index-aware")]
pub struct IndexOverrideError {
    pub name: String,
}

impl Repository {
    /// Effective index awareness for a job, honoring the per-job override.
    ///
    /// Overrides only go downward: `Some(true)` on a non-index-aware repo
    /// is rejected.
    pub fn effective_index_aware(
        &self,
        job_override: Option<bool>,
    ) -> Result<bool, IndexOverrideError> {
        match job_override {
            None => Ok(self.index_aware),
            Some(false) => Ok(false),
            Some(true) if self.index_aware => Ok(true),
            Some(true) => Err(IndexOverrideError { name: self.name.clone() }),
        }
    }
}

#[cfg(test)]
#[path = "repo_tests.rs"]
mod tests;
