// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Restart recovery specs.
//!
//! A hard stop mid-job simulates a host crash; the next daemon over the
//! same state directory demotes the orphaned running job to
//! `failed(host_restart)`, keeps its workspace for inspection, and the
//! janitor leaves it alone because a record still exists.

use super::prelude::*;
use mill_core::{FailReason, JobStatus};
use std::time::Duration;

#[tokio::test]
async fn running_jobs_demote_to_host_restart_and_keep_their_workspace() {
    let env = SpecEnv::new();
    env.seed_user("alice", "p@ss");
    let source = env.seed_repo_source("README.md", "demo\n");

    let daemon = env.start().await;
    let service = daemon.service();
    let token = service.authenticate("alice", "p@ss").expect("login");
    register_ready(&service, &token, "demo", &source).await;

    let id = submit(&service, &token, "demo", "echo begun; sleep 120").await;
    let running = wait_status(&service, &token, &id, JobStatus::Running).await;
    let workspace = running.workspace_path.clone().expect("workspace set");

    // Hard stop: no drain, no final persists, as if the host died.
    daemon.hard_stop().await;

    let daemon = env.start().await;
    let service = daemon.service();
    let token = service.authenticate("alice", "p@ss").expect("login");

    let (job, _) = service.get_job(&token, &id).expect("job recovered");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.fail_reason, Some(FailReason::HostRestart));
    assert!(job.pid.is_none());

    // The demotion was persisted in the versioned state document.
    let state_path = env.config.workspace_root.join(id.as_str()).join("state.json");
    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(state_path).expect("state"))
            .expect("valid json");
    assert_eq!(doc["schema_version"], 1);
    assert_eq!(doc["status"], "failed");
    assert_eq!(doc["fail_reason"], "host_restart");

    // Workspace survives for inspection, and outlives janitor sweeps
    // (interval is 1s here) because the record still exists.
    assert!(workspace.exists());
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(workspace.exists(), "janitor must not reap a recorded job's workspace");

    // Output captured before the crash was kept as-is.
    let output = service
        .subscribe_output(&token, &id)
        .expect("subscribe")
        .collect()
        .await
        .expect("output");
    assert_eq!(output, b"begun\n");
    daemon.shutdown().await;
}

#[tokio::test]
async fn queued_jobs_survive_a_restart_and_dispatch() {
    let mut env = SpecEnv::new();
    env.config.max_concurrent = 1;
    env.seed_user("alice", "p@ss");
    let source = env.seed_repo_source("README.md", "demo\n");

    let daemon = env.start().await;
    let service = daemon.service();
    let token = service.authenticate("alice", "p@ss").expect("login");
    register_ready(&service, &token, "demo", &source).await;

    // One job hogs the slot, the second persists as queued.
    let blocker = submit(&service, &token, "demo", "sleep 120").await;
    wait_status(&service, &token, &blocker, JobStatus::Running).await;
    let queued = submit(&service, &token, "demo", "echo revived").await;
    assert_eq!(status_of(&service, &token, &queued), JobStatus::Queued);

    daemon.hard_stop().await;

    // After restart the blocker is demoted, freeing the slot; the queued
    // job dispatches and completes.
    let daemon = env.start().await;
    let service = daemon.service();
    let token = service.authenticate("alice", "p@ss").expect("login");

    let job = wait_status(&service, &token, &queued, JobStatus::Completed).await;
    assert_eq!(job.exit_code, Some(0));
    let (blocker_job, _) = service.get_job(&token, &blocker).expect("blocker");
    assert_eq!(blocker_job.fail_reason, Some(FailReason::HostRestart));
    daemon.shutdown().await;
}
