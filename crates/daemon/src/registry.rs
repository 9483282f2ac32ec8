// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Repository registry: canonical clones and their lifecycle.
//!
//! Registration is asynchronous: the record is persisted as `cloning` and
//! the caller returns immediately; a detached task performs the clone (and
//! the external index build when requested), persisting after each stage.
//! Canonical clones are read-only to jobs; only these tasks write to them.

use mill_core::{
    Clock, GitMetadata, IndexStatus, RegistrationStatus, RepoKind, Repository,
};
use mill_cowfs::CloneEngine;
use mill_storage::{RepoCatalog, StoreError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Upper bound on a single clone or index run.
const CLONE_TIMEOUT: Duration = Duration::from_secs(600);

pub const REPO_NAME_MAX_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid repo name: {0}")]
    InvalidName(String),

    #[error("repo {0} already registered")]
    Exists(String),

    #[error("no such repo: {0}")]
    NotFound(String),

    #[error("repo {0} is busy: {1}")]
    Busy(String, String),

    #[error("repo {0} is not ready ({1})")]
    NotReady(String, RegistrationStatus),

    #[error("path escapes repo root: {0}")]
    PathEscape(String),

    #[error("no such path in repo: {0}")]
    NoSuchPath(String),

    #[error("io error on {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A directory listing entry from the canonical clone.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RepoEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Repo names double as directory names under the repos root.
pub fn validate_repo_name(name: &str) -> Result<(), RegistryError> {
    let bad = |reason: &str| RegistryError::InvalidName(format!("{name:?}: {reason}"));
    if name.is_empty() || name.len() > REPO_NAME_MAX_LEN {
        return Err(bad("must be 1-64 characters"));
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return Err(bad("must start with a letter or digit")),
    }
    for c in chars {
        if !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-') {
            return Err(bad("allowed characters are [A-Za-z0-9._-]"));
        }
    }
    Ok(())
}

pub struct RepoRegistry<C: Clock> {
    repos: Mutex<BTreeMap<String, Repository>>,
    catalog: RepoCatalog,
    repos_root: PathBuf,
    indexer_command: Option<String>,
    clone_engine: CloneEngine,
    clock: C,
}

impl<C: Clock> RepoRegistry<C> {
    /// Load the persisted catalog, demoting registrations that were
    /// interrupted by a restart.
    pub async fn open(
        catalog: RepoCatalog,
        repos_root: PathBuf,
        indexer_command: Option<String>,
        clone_engine: CloneEngine,
        clock: C,
    ) -> Result<Arc<Self>, RegistryError> {
        tokio::fs::create_dir_all(&repos_root)
            .await
            .map_err(|e| RegistryError::Io { path: repos_root.clone(), source: e })?;
        let repos = catalog.load_recovered().await?;
        Ok(Arc::new(Self {
            repos: Mutex::new(repos),
            catalog,
            repos_root,
            indexer_command,
            clone_engine,
            clock,
        }))
    }

    pub fn get(&self, name: &str) -> Option<Repository> {
        self.repos.lock().get(name).cloned()
    }

    pub fn list(&self) -> Vec<Repository> {
        self.repos.lock().values().cloned().collect()
    }

    /// Canonical clone path, only while the repo is usable by jobs.
    pub fn local_path(&self, name: &str) -> Option<PathBuf> {
        let repos = self.repos.lock();
        repos
            .get(name)
            .filter(|r| r.registration_status.is_usable())
            .map(|r| r.local_path.clone())
    }

    /// Register a repository and kick off its background clone.
    ///
    /// Returns the persisted record in status `cloning`; the caller polls
    /// or lists to observe `ready` / `clone_failed` / `index_failed`.
    pub async fn register(
        self: &Arc<Self>,
        name: &str,
        kind: RepoKind,
        source_url: String,
        index_aware: bool,
    ) -> Result<Repository, RegistryError> {
        validate_repo_name(name)?;

        let repo = {
            let mut repos = self.repos.lock();
            if repos.contains_key(name) {
                return Err(RegistryError::Exists(name.to_string()));
            }
            let repo = Repository {
                name: name.to_string(),
                kind,
                source_url: Some(source_url.clone()),
                local_path: self.repos_root.join(name),
                registered_at_ms: self.clock.epoch_ms(),
                registration_status: RegistrationStatus::Cloning,
                index_status: if index_aware && self.indexer_command.is_some() {
                    IndexStatus::Pending
                } else {
                    IndexStatus::Disabled
                },
                git_metadata: None,
                index_aware,
            };
            repos.insert(name.to_string(), repo.clone());
            repo
        };
        self.persist().await?;
        tracing::info!(repo = name, kind = %kind, "repository registered, clone starting");

        let registry = Arc::clone(self);
        let task_repo = repo.clone();
        tokio::spawn(async move {
            registry.clone_and_index(task_repo).await;
        });

        Ok(repo)
    }

    /// Remove a repository record and its canonical clone.
    ///
    /// The caller is responsible for the job-reference check (the registry
    /// cannot see the scheduler); registrations still in flight are refused
    /// here.
    pub async fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        let repo = {
            let mut repos = self.repos.lock();
            let repo = repos.get(name).ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
            if matches!(
                repo.registration_status,
                RegistrationStatus::Registering
                    | RegistrationStatus::Cloning
                    | RegistrationStatus::Indexing
            ) {
                return Err(RegistryError::Busy(
                    name.to_string(),
                    "registration in progress".to_string(),
                ));
            }
            repos.remove(name).unwrap_or_else(|| unreachable!())
        };
        self.persist().await?;

        if let Err(e) = mill_cowfs::destroy_workspace(&repo.local_path).await {
            tracing::warn!(repo = name, error = %e, "canonical clone removal failed");
        }
        tracing::info!(repo = name, "repository unregistered");
        Ok(())
    }

    /// List a directory inside the canonical clone.
    pub async fn list_dir(&self, name: &str, rel: &str) -> Result<Vec<RepoEntry>, RegistryError> {
        let dir = self.confine(name, rel).await?;
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| RegistryError::Io { path: dir.clone(), source: e })?;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| RegistryError::Io { path: dir.clone(), source: e })?
        {
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };
            entries.push(RepoEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Read a file from the canonical clone.
    pub async fn read_content(&self, name: &str, rel: &str) -> Result<Vec<u8>, RegistryError> {
        let path = self.confine(name, rel).await?;
        tokio::fs::read(&path).await.map_err(|e| RegistryError::Io { path, source: e })
    }

    /// Resolve `rel` inside the repo root and reject anything that escapes
    /// it: lexical `..`/absolute components first, then symlink resolution
    /// and a prefix re-check.
    async fn confine(&self, name: &str, rel: &str) -> Result<PathBuf, RegistryError> {
        let repo =
            self.get(name).ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if !repo.registration_status.is_usable() {
            return Err(RegistryError::NotReady(name.to_string(), repo.registration_status));
        }

        let rel_path = Path::new(rel);
        for component in rel_path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(RegistryError::PathEscape(rel.to_string())),
            }
        }

        let root = tokio::fs::canonicalize(&repo.local_path)
            .await
            .map_err(|e| RegistryError::Io { path: repo.local_path.clone(), source: e })?;
        let resolved = match tokio::fs::canonicalize(root.join(rel_path)).await {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RegistryError::NoSuchPath(rel.to_string()))
            }
            Err(e) => return Err(RegistryError::Io { path: root.join(rel_path), source: e }),
        };
        if !resolved.starts_with(&root) {
            return Err(RegistryError::PathEscape(rel.to_string()));
        }
        Ok(resolved)
    }

    /// The background clone + index pipeline for one registration.
    async fn clone_and_index(self: Arc<Self>, repo: Repository) {
        let clone_result = match repo.kind {
            RepoKind::Git => self.git_clone(&repo).await,
            RepoKind::Folder => self.folder_clone(&repo).await,
        };

        let metadata = match clone_result {
            Ok(meta) => meta,
            Err(reason) => {
                tracing::error!(repo = %repo.name, reason, "clone failed");
                self.update(&repo.name, |r| {
                    r.registration_status = RegistrationStatus::CloneFailed;
                })
                .await;
                return;
            }
        };

        let wants_index = repo.index_aware && self.indexer_command.is_some();
        self.update(&repo.name, |r| {
            r.git_metadata = metadata.clone();
            if wants_index {
                r.registration_status = RegistrationStatus::Indexing;
                r.index_status = IndexStatus::Building;
            } else {
                r.registration_status = RegistrationStatus::Ready;
            }
        })
        .await;

        if !wants_index {
            tracing::info!(repo = %repo.name, "repository ready");
            return;
        }

        match self.run_indexer(&repo).await {
            Ok(()) => {
                tracing::info!(repo = %repo.name, "index built, repository ready");
                self.update(&repo.name, |r| {
                    r.registration_status = RegistrationStatus::Ready;
                    r.index_status = IndexStatus::Built;
                })
                .await;
            }
            Err(reason) => {
                tracing::error!(repo = %repo.name, reason, "index build failed");
                self.update(&repo.name, |r| {
                    r.registration_status = RegistrationStatus::IndexFailed;
                    r.index_status = IndexStatus::Failed;
                })
                .await;
            }
        }
    }

    async fn git_clone(&self, repo: &Repository) -> Result<Option<GitMetadata>, String> {
        let url = repo.source_url.clone().ok_or("git repo has no source url")?;
        let dest = repo.local_path.clone();

        let mut cmd = Command::new("git");
        cmd.arg("clone")
            .arg("--quiet")
            .arg(&url)
            .arg(&dest)
            .env_remove("GIT_DIR")
            .env_remove("GIT_WORK_TREE");
        run_with_timeout(cmd, CLONE_TIMEOUT, "git clone").await?;

        let head_commit = self.git_capture(&dest, &["rev-parse", "HEAD"]).await;
        let default_branch =
            self.git_capture(&dest, &["symbolic-ref", "--short", "HEAD"]).await;
        Ok(Some(GitMetadata { remote_url: url, default_branch, head_commit }))
    }

    async fn git_capture(&self, dir: &Path, args: &[&str]) -> Option<String> {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(dir).args(args).env_remove("GIT_DIR").env_remove("GIT_WORK_TREE");
        let output = cmd.output().await.ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!text.is_empty()).then_some(text)
    }

    async fn folder_clone(&self, repo: &Repository) -> Result<Option<GitMetadata>, String> {
        let source = repo.source_url.clone().ok_or("folder repo has no source path")?;
        self.clone_engine
            .create_workspace(Path::new(&source), &repo.local_path)
            .await
            .map(|_| None)
            .map_err(|e| e.to_string())
    }

    async fn run_indexer(&self, repo: &Repository) -> Result<(), String> {
        let program = self.indexer_command.clone().ok_or("no indexer configured")?;
        let mut cmd = Command::new(program);
        cmd.arg(&repo.local_path).current_dir(&repo.local_path);
        run_with_timeout(cmd, CLONE_TIMEOUT, "indexer").await?;
        Ok(())
    }

    async fn update(&self, name: &str, apply: impl FnOnce(&mut Repository)) {
        {
            let mut repos = self.repos.lock();
            match repos.get_mut(name) {
                Some(repo) => apply(repo),
                // Unregistered mid-flight; nothing to update.
                None => return,
            }
        }
        if let Err(e) = self.persist().await {
            tracing::error!(repo = name, error = %e, "catalog persist failed");
        }
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let snapshot = self.repos.lock().clone();
        self.catalog.save(&snapshot).await
    }
}

/// Run an external command with a wall-clock bound, returning stderr text
/// on failure.
async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    what: &str,
) -> Result<(), String> {
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| format!("{what} timed out after {}s", timeout.as_secs()))?
        .map_err(|e| format!("{what} failed to start: {e}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("{what} failed: {}", stderr.trim()));
    }
    Ok(())
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
