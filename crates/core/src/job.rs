// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Job record and status state machine.

use crate::clock::Clock;
use crate::id::JobId;
use crate::upload::UploadedFile;
use crate::workspace::{CowMode, Workspace};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Status of a job.
///
/// `Completed`, `Failed`, and `Cancelled` are terminal: once reached, the
/// record and its output log are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Record exists; uploads may be attached; not yet admitted.
    Created,
    /// Waiting in the scheduler's FIFO queue.
    Queued,
    /// Workspace materialized and subprocess executing.
    Running,
    /// Subprocess exited with code 0.
    Completed,
    /// See [`FailReason`].
    Failed,
    /// Terminated by operator request.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// The transition relation of the job state machine.
    ///
    /// Readers never observe a transition outside this relation, and never
    /// observe a regression (terminal states have no successors).
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (from, to),
            (Created, Queued)
                | (Created, Cancelled)
                | (Queued, Running)
                | (Queued, Cancelled)
                | (Queued, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

crate::simple_display! {
    JobStatus {
        Created => "created",
        Queued => "queued",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    /// Workspace materialization failed after all CoW fallbacks.
    Workspace,
    /// Handoff to the executor failed (spawn error).
    Dispatch,
    /// Subprocess exited with a nonzero code.
    Nonzero { code: i32 },
    /// Wall-clock timeout exceeded.
    Timeout,
    /// Persisted as running, then the host restarted; the subprocess
    /// cannot be reclaimed safely.
    HostRestart,
    /// Did not drain within the shutdown window.
    Shutdown,
    /// Persisted state newer than this build understands.
    IncompatibleState,
}

crate::simple_display! {
    FailReason {
        Workspace => "workspace",
        Dispatch => "dispatch",
        Nonzero { .. } => "nonzero",
        Timeout => "timeout",
        HostRestart => "host_restart",
        Shutdown => "shutdown",
        IncompatibleState => "incompatible_state",
    }
}

/// Per-job execution options supplied at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Wall-clock limit override; the configured default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Override of the repo's index-aware default. `Some(true)` is only
    /// valid when the repo itself is index-aware.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_aware: Option<bool>,
    /// Assistant session id to continue instead of starting fresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_session: Option<String>,
}

/// Inputs for creating a new job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub owner: String,
    pub repo_name: String,
    pub prompt: String,
    pub options: JobOptions,
}

/// A job record.
///
/// The append-only output log is not part of the record; it lives beside the
/// persisted state as `output.log` and is owned by the executor while the
/// job runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub owner: String,
    pub repo_name: String,
    pub prompt: String,
    #[serde(default)]
    pub options: JobOptions,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<FailReason>,
    /// Set before the transition to `Running`; cleared only when the job is
    /// destroyed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cow_mode: Option<CowMode>,
    /// Present exactly while the subprocess is alive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    #[serde(default)]
    pub uploads: Vec<UploadedFile>,
}

impl Job {
    pub fn new(spec: JobSpec, clock: &impl Clock) -> Self {
        Self {
            id: JobId::generate(),
            owner: spec.owner,
            repo_name: spec.repo_name,
            prompt: spec.prompt,
            options: spec.options,
            status: JobStatus::Created,
            fail_reason: None,
            workspace_path: None,
            cow_mode: None,
            pid: None,
            exit_code: None,
            created_at_ms: clock.epoch_ms(),
            started_at_ms: None,
            completed_at_ms: None,
            uploads: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Admit the job to the queue.
    pub fn enqueue(&mut self) {
        self.status = JobStatus::Queued;
    }

    /// Stamp the dispatch time when the job leaves the queue head.
    pub fn assign_started(&mut self, epoch_ms: u64) {
        self.started_at_ms = Some(epoch_ms);
    }

    /// Record the materialized workspace. Must happen before
    /// [`Job::mark_running`].
    pub fn set_workspace(&mut self, path: PathBuf, mode: CowMode) {
        self.workspace_path = Some(path);
        self.cow_mode = Some(mode);
    }

    pub fn mark_running(&mut self) {
        debug_assert!(self.workspace_path.is_some(), "workspace must be set before running");
        self.status = JobStatus::Running;
    }

    pub fn set_pid(&mut self, pid: u32) {
        self.pid = Some(pid);
    }

    /// Terminal transition: exit 0.
    pub fn complete(&mut self, epoch_ms: u64) {
        self.exit_code = Some(0);
        self.finish(JobStatus::Completed, None, epoch_ms);
    }

    /// Terminal transition: failure with a recorded reason.
    pub fn fail(&mut self, reason: FailReason, epoch_ms: u64) {
        if let FailReason::Nonzero { code } = reason {
            self.exit_code = Some(code);
        }
        self.finish(JobStatus::Failed, Some(reason), epoch_ms);
    }

    /// Terminal transition: operator cancellation.
    pub fn cancel(&mut self, epoch_ms: u64) {
        self.finish(JobStatus::Cancelled, None, epoch_ms);
    }

    fn finish(&mut self, status: JobStatus, reason: Option<FailReason>, epoch_ms: u64) {
        self.status = status;
        self.fail_reason = reason;
        self.pid = None;
        self.completed_at_ms = Some(epoch_ms);
    }

    /// Upload lookup by original name (names are unique per job).
    pub fn upload(&self, name: &str) -> Option<&UploadedFile> {
        self.uploads.iter().find(|u| u.original_name == name)
    }

    /// The workspace record, once one has been materialized.
    pub fn workspace(&self) -> Option<Workspace> {
        let path = self.workspace_path.clone()?;
        let cow_mode = self.cow_mode?;
        Some(Workspace {
            job_id: self.id.clone(),
            repo_name: self.repo_name.clone(),
            path,
            created_at_ms: self.started_at_ms.unwrap_or(self.created_at_ms),
            cow_mode,
        })
    }
}

crate::builder! {
    pub struct JobBuilder => Job {
        into {
            id: JobId = "job-test0000000000000000",
            owner: String = "alice",
            repo_name: String = "demo",
            prompt: String = "do the thing",
        }
        set {
            options: JobOptions = JobOptions::default(),
            status: JobStatus = JobStatus::Created,
            created_at_ms: u64 = 1_700_000_000_000,
            uploads: Vec<UploadedFile> = Vec::new(),
        }
        option {
            fail_reason: FailReason = None,
            workspace_path: PathBuf = None,
            cow_mode: CowMode = None,
            pid: u32 = None,
            exit_code: i32 = None,
            started_at_ms: u64 = None,
            completed_at_ms: u64 = None,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
