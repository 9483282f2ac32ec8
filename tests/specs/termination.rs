// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Cancellation-grace and timeout specs.
//!
//! Both protocols are SIGTERM, grace, SIGKILL; they differ only in the
//! recorded reason.

use super::prelude::*;
use mill_core::{FailReason, JobOptions, JobStatus};
use std::time::{Duration, Instant};

#[tokio::test]
async fn cancel_kills_a_term_ignoring_child_after_the_grace_window() {
    let mut env = SpecEnv::new();
    env.config.cancel_grace_seconds = 1;
    env.seed_user("alice", "p@ss");
    let source = env.seed_repo_source("README.md", "demo\n");

    let daemon = env.start().await;
    let service = daemon.service();
    let token = service.authenticate("alice", "p@ss").expect("login");
    register_ready(&service, &token, "demo", &source).await;

    // The shell shrugs off the TERM and keeps respawning its sleep.
    let id =
        submit(&service, &token, "demo", "trap '' TERM; while true; do sleep 1; done").await;
    wait_status(&service, &token, &id, JobStatus::Running).await;
    let mut pid = 0;
    let got_pid = wait_for(Duration::from_secs(5), || {
        match service.get_job(&token, &id).expect("job").0.pid {
            Some(p) => {
                pid = p;
                true
            }
            None => false,
        }
    })
    .await;
    assert!(got_pid, "pid must be recorded while running");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let start = Instant::now();
    service.cancel_job(&token, &id).await.expect("cancel acknowledged");

    let job = wait_status(&service, &token, &id, JobStatus::Cancelled).await;
    // Grace of 1s plus slack; nowhere near the infinite loop.
    assert!(start.elapsed() < Duration::from_secs(5), "took {:?}", start.elapsed());
    assert!(job.fail_reason.is_none());
    assert!(job.pid.is_none());

    let gone = wait_for(Duration::from_secs(3), || process_gone(pid)).await;
    assert!(gone, "process group must be dead after the kill");
    daemon.shutdown().await;
}

#[tokio::test]
async fn cancel_on_cancelled_is_a_no_op_success() {
    let env = SpecEnv::new();
    env.seed_user("alice", "p@ss");
    let source = env.seed_repo_source("README.md", "demo\n");

    let daemon = env.start().await;
    let service = daemon.service();
    let token = service.authenticate("alice", "p@ss").expect("login");
    register_ready(&service, &token, "demo", &source).await;

    let job = service
        .create_job(&token, "demo", "echo never", JobOptions::default())
        .await
        .expect("create");
    service.cancel_job(&token, &job.id).await.expect("first cancel");
    let again = service.cancel_job(&token, &job.id).await.expect("second cancel is a no-op");
    assert_eq!(again.status, JobStatus::Cancelled);
    daemon.shutdown().await;
}

#[tokio::test]
async fn timeout_fells_a_sleeping_job_with_the_timeout_reason() {
    let mut env = SpecEnv::new();
    env.config.cancel_grace_seconds = 1;
    env.seed_user("alice", "p@ss");
    let source = env.seed_repo_source("README.md", "demo\n");

    let daemon = env.start().await;
    let service = daemon.service();
    let token = service.authenticate("alice", "p@ss").expect("login");
    register_ready(&service, &token, "demo", &source).await;

    let options = JobOptions { timeout_secs: Some(1), ..Default::default() };
    let job = service
        .create_job(&token, "demo", "sleep 10", options)
        .await
        .expect("create");
    service.start_job(&token, &job.id).await.expect("start");

    let start = Instant::now();
    let failed = wait_status(&service, &token, &job.id, JobStatus::Failed).await;
    assert_eq!(failed.fail_reason, Some(FailReason::Timeout));
    assert!(start.elapsed() < Duration::from_secs(8), "took {:?}", start.elapsed());
    daemon.shutdown().await;
}
