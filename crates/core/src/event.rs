// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Engine events: state-transition requests and published notifications.
//!
//! All blocking work (workspace clones, subprocess spawn/wait, log appends)
//! runs in detached tasks. Tasks never mutate scheduler state directly;
//! they post an [`Event`] and the engine loop applies the transition behind
//! its single mutation lock.

use crate::id::JobId;
use crate::job::{FailReason, JobStatus};
use crate::workspace::CowMode;
use std::path::PathBuf;

/// How an execution attempt ended, as observed by the executor task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Child exited on its own.
    Exited { code: i32 },
    /// Terminated by the timeout protocol.
    TimedOut,
    /// Terminated by the cancellation protocol.
    Cancelled,
    /// The child never started.
    SpawnFailed { reason: String },
}

crate::simple_display! {
    ExecOutcome {
        Exited { .. } => "exited",
        TimedOut => "timed_out",
        Cancelled => "cancelled",
        SpawnFailed { .. } => "spawn_failed",
    }
}

/// A state-transition request posted to the engine loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Workspace materialization finished for a dispatched job.
    WorkspaceReady { id: JobId, path: PathBuf, mode: CowMode },
    /// Workspace materialization failed after all fallbacks.
    WorkspaceFailed { id: JobId, reason: String },
    /// The executor spawned the child process.
    JobSpawned { id: JobId, pid: u32 },
    /// The execution attempt reached an end state.
    JobFinished { id: JobId, outcome: ExecOutcome },
}

impl Event {
    /// Short operation name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Event::WorkspaceReady { .. } => "workspace_ready",
            Event::WorkspaceFailed { .. } => "workspace_failed",
            Event::JobSpawned { .. } => "job_spawned",
            Event::JobFinished { .. } => "job_finished",
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Event::WorkspaceReady { id, .. }
            | Event::WorkspaceFailed { id, .. }
            | Event::JobSpawned { id, .. }
            | Event::JobFinished { id, .. } => id,
        }
    }
}

/// A job status change published on the notification bus.
///
/// Advisory: consumers may observe it after further transitions have
/// already happened, but never out of order for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub id: JobId,
    pub status: JobStatus,
    pub fail_reason: Option<FailReason>,
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
