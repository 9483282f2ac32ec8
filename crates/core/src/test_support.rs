// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Shared helpers for tests across the workspace.

use crate::job::{Job, JobOptions, JobSpec, JobStatus};
use crate::FakeClock;

/// A minimal job spec for tests.
pub fn job_spec(owner: &str, repo: &str) -> JobSpec {
    JobSpec {
        owner: owner.to_string(),
        repo_name: repo.to_string(),
        prompt: "run the task".to_string(),
        options: JobOptions::default(),
    }
}

/// A fresh `Created` job owned by `alice` against `demo`.
pub fn sample_job() -> Job {
    Job::new(job_spec("alice", "demo"), &FakeClock::new())
}

/// Proptest strategies for domain types.
pub mod strategies {
    use super::*;
    use crate::job::FailReason;
    use proptest::prelude::*;

    pub fn arb_status() -> impl Strategy<Value = JobStatus> {
        prop_oneof![
            Just(JobStatus::Created),
            Just(JobStatus::Queued),
            Just(JobStatus::Running),
            Just(JobStatus::Completed),
            Just(JobStatus::Failed),
            Just(JobStatus::Cancelled),
        ]
    }

    pub fn arb_fail_reason() -> impl Strategy<Value = FailReason> {
        prop_oneof![
            Just(FailReason::Workspace),
            Just(FailReason::Dispatch),
            any::<i32>().prop_map(|code| FailReason::Nonzero { code }),
            Just(FailReason::Timeout),
            Just(FailReason::HostRestart),
            Just(FailReason::Shutdown),
            Just(FailReason::IncompatibleState),
        ]
    }

    /// A structurally consistent job: terminal states carry completion
    /// stamps, running jobs carry a workspace and pid.
    pub fn arb_job() -> impl Strategy<Value = Job> {
        (arb_status(), proptest::option::of(arb_fail_reason()), 0u32..=u32::MAX).prop_map(
            |(status, reason, pid)| {
                let mut job = sample_job();
                match status {
                    JobStatus::Created => {}
                    JobStatus::Queued => job.enqueue(),
                    JobStatus::Running => {
                        job.enqueue();
                        job.assign_started(job.created_at_ms + 10);
                        job.set_workspace("/tmp/ws".into(), crate::CowMode::Rsync);
                        job.mark_running();
                        job.set_pid(pid.max(1));
                    }
                    JobStatus::Completed => {
                        job.enqueue();
                        job.assign_started(job.created_at_ms + 10);
                        job.set_workspace("/tmp/ws".into(), crate::CowMode::Rsync);
                        job.mark_running();
                        job.complete(job.created_at_ms + 20);
                    }
                    JobStatus::Failed => {
                        job.enqueue();
                        job.fail(
                            reason.unwrap_or(FailReason::Dispatch),
                            job.created_at_ms + 20,
                        );
                    }
                    JobStatus::Cancelled => {
                        job.cancel(job.created_at_ms + 5);
                    }
                }
                job
            },
        )
    }
}
