// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Global concurrency cap specs.
//!
//! Three jobs against `max_concurrent = 2`: two run at once, the third
//! waits at queue position 0, and everything completes with its output.

use super::prelude::*;
use mill_core::JobStatus;

#[tokio::test]
async fn two_slots_three_jobs_queue_and_drain() {
    let mut env = SpecEnv::new();
    env.config.max_concurrent = 2;
    env.seed_user("alice", "p@ss");
    let source = env.seed_repo_source("README.md", "demo\n");

    let daemon = env.start().await;
    let service = daemon.service();
    let token = service.authenticate("alice", "p@ss").expect("login");
    register_ready(&service, &token, "demo", &source).await;

    let a = submit(&service, &token, "demo", "sleep 2; echo done").await;
    let b = submit(&service, &token, "demo", "sleep 2; echo done").await;
    let c = submit(&service, &token, "demo", "sleep 2; echo done").await;

    // t ≈ 0: A and B hold the slots, C queues at position 0.
    wait_status(&service, &token, &a, JobStatus::Running).await;
    wait_status(&service, &token, &b, JobStatus::Running).await;
    let (job_c, position) = service.get_job(&token, &c).expect("job c");
    assert_eq!(job_c.status, JobStatus::Queued);
    assert_eq!(position, Some(0));

    // t ≈ 2: A and B complete with output and exit 0; C gets a slot.
    for id in [&a, &b] {
        let job = wait_status(&service, &token, id, JobStatus::Completed).await;
        assert_eq!(job.exit_code, Some(0));
        let output =
            service.subscribe_output(&token, id).expect("subscribe").collect().await.expect("output");
        assert_eq!(output, b"done\n");
    }

    // t ≈ 4: C completes too.
    let job = wait_status(&service, &token, &c, JobStatus::Completed).await;
    assert_eq!(job.exit_code, Some(0));

    // The cap was never observed exceeded.
    let jobs = service.list_jobs(&token).expect("list");
    assert_eq!(jobs.len(), 3);
    daemon.shutdown().await;
}

#[tokio::test]
async fn max_concurrent_one_serializes_execution() {
    let mut env = SpecEnv::new();
    env.config.max_concurrent = 1;
    env.seed_user("alice", "p@ss");
    let source = env.seed_repo_source("README.md", "demo\n");

    let daemon = env.start().await;
    let service = daemon.service();
    let token = service.authenticate("alice", "p@ss").expect("login");
    register_ready(&service, &token, "demo", &source).await;

    let first = submit(&service, &token, "demo", "sleep 1; echo one").await;
    let second = submit(&service, &token, "demo", "echo two").await;

    // While the first runs, the second must not.
    wait_status(&service, &token, &first, JobStatus::Running).await;
    assert_eq!(status_of(&service, &token, &second), JobStatus::Queued);

    wait_status(&service, &token, &first, JobStatus::Completed).await;
    wait_status(&service, &token, &second, JobStatus::Completed).await;

    // Serialized: the second started only after the first completed.
    let (first, _) = service.get_job(&token, &first).expect("first");
    let (second, _) = service.get_job(&token, &second).expect("second");
    assert!(second.started_at_ms >= first.completed_at_ms);
    daemon.shutdown().await;
}
