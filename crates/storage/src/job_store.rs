// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Per-job persistent state.

use crate::{write_atomic, StoreError};
use mill_core::{Clock, FailReason, Job, JobId, JobStatus};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Version stamped into every `state.json`. Documents with a newer version
/// than this build understands demote their job to
/// `failed(incompatible_state)` at recovery.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StateDoc {
    schema_version: u32,
    #[serde(flatten)]
    job: Job,
}

/// The on-disk job store. One directory per job; single writer (the engine
/// loop) per state file.
#[derive(Debug, Clone)]
pub struct JobStore {
    jobs_root: PathBuf,
}

impl JobStore {
    pub fn new(jobs_root: impl Into<PathBuf>) -> Self {
        Self { jobs_root: jobs_root.into() }
    }

    pub fn jobs_root(&self) -> &Path {
        &self.jobs_root
    }

    pub fn job_dir(&self, id: &JobId) -> PathBuf {
        self.jobs_root.join(id.as_str())
    }

    pub fn state_path(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join("state.json")
    }

    pub fn output_path(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join("output.log")
    }

    pub fn uploads_dir(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join("uploads")
    }

    pub fn workspace_dir(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join("workspace")
    }

    fn tombstone_path(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join("deleted.json")
    }

    /// Persist a job record atomically.
    pub async fn save(&self, job: &Job) -> Result<(), StoreError> {
        let dir = self.job_dir(&job.id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| StoreError::io(&dir, e))?;

        let doc = StateDoc { schema_version: SCHEMA_VERSION, job: job.clone() };
        let path = self.state_path(&job.id);
        let bytes = serde_json::to_vec_pretty(&doc).map_err(|e| StoreError::corrupt(&path, e))?;
        write_atomic(&path, &bytes).await
    }

    /// Load one job; `None` when the record does not exist.
    pub async fn load(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        let path = self.state_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let doc: StateDoc =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::corrupt(&path, e))?;
        Ok(Some(doc.job))
    }

    /// Destroy the on-disk record: state, workspace, and output go away; a
    /// tombstone and any uploads remain for the janitor's retention sweep.
    pub async fn delete(&self, id: &JobId, clock: &impl Clock) -> Result<(), StoreError> {
        let dir = self.job_dir(id);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(());
        }

        remove_file_if_present(&self.state_path(id)).await?;
        remove_file_if_present(&self.output_path(id)).await?;
        let workspace = self.workspace_dir(id);
        match tokio::fs::remove_dir_all(&workspace).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&workspace, e)),
        }

        let tombstone = serde_json::json!({ "deleted_at_ms": clock.epoch_ms() });
        write_atomic(&self.tombstone_path(id), tombstone.to_string().as_bytes()).await?;
        tracing::info!(job = %id, "job record destroyed");
        Ok(())
    }

    /// Enumerate every job directory and rebuild the record set.
    ///
    /// Jobs persisted as `running` demote to `failed(host_restart)`: the
    /// host cannot reclaim a foreign subprocess safely. Documents with a
    /// newer schema demote to `failed(incompatible_state)`. A partially
    /// written `output.log` is kept as-is. Unreadable directories are
    /// logged and skipped rather than failing recovery wholesale.
    pub async fn recover(&self, clock: &impl Clock) -> Result<Vec<Job>, StoreError> {
        let mut jobs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.jobs_root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(jobs),
            Err(e) => return Err(StoreError::io(&self.jobs_root, e)),
        };

        while let Some(entry) =
            entries.next_entry().await.map_err(|e| StoreError::io(&self.jobs_root, e))?
        {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let id = JobId::from_string(entry.file_name().to_string_lossy().into_owned());
            match self.recover_one(&id, &dir, clock).await {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(job = %id, error = %e, "skipping unreadable job record");
                }
            }
        }

        jobs.sort_by_key(|j| j.created_at_ms);
        Ok(jobs)
    }

    async fn recover_one(
        &self,
        id: &JobId,
        dir: &Path,
        clock: &impl Clock,
    ) -> Result<Option<Job>, StoreError> {
        let path = self.state_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            // Tombstoned or half-created directory: nothing to recover.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::corrupt(&path, e))?;
        let version = value.get("schema_version").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

        let mut job = match serde_json::from_value::<StateDoc>(value) {
            Ok(doc) => doc.job,
            Err(_) if version > SCHEMA_VERSION => {
                // Future document we cannot read: synthesize a shell record
                // so the job is at least visible as failed.
                tracing::warn!(job = %id, version, "state schema is newer than this build");
                let mut job = shell_job(id, dir);
                job.fail(FailReason::IncompatibleState, clock.epoch_ms());
                self.save(&job).await?;
                return Ok(Some(job));
            }
            Err(e) => return Err(StoreError::corrupt(&path, e)),
        };

        if version > SCHEMA_VERSION {
            job.fail(FailReason::IncompatibleState, clock.epoch_ms());
            self.save(&job).await?;
        } else if job.status == JobStatus::Running {
            tracing::warn!(job = %id, "demoting job that was running at last persist");
            job.fail(FailReason::HostRestart, clock.epoch_ms());
            self.save(&job).await?;
        }
        Ok(Some(job))
    }
}

/// Minimal record for a job whose state document cannot be parsed at all.
fn shell_job(id: &JobId, dir: &Path) -> Job {
    Job {
        id: id.clone(),
        owner: String::new(),
        repo_name: String::new(),
        prompt: String::new(),
        options: Default::default(),
        status: JobStatus::Running,
        fail_reason: None,
        workspace_path: Some(dir.join("workspace")),
        cow_mode: None,
        pid: None,
        exit_code: None,
        created_at_ms: 0,
        started_at_ms: None,
        completed_at_ms: None,
        uploads: Vec::new(),
    }
}

async fn remove_file_if_present(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

#[cfg(test)]
#[path = "job_store_tests.rs"]
mod tests;
