// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! CoW workspace isolation specs.
//!
//! Whatever mechanism the filesystem offers (reflink where available,
//! rsync/copy fallback elsewhere, as on the tmpfs most CI tempdirs use),
//! the job runs against its own materialization: writes and deletions
//! inside the workspace never reach the canonical clone.

use super::prelude::*;
use mill_core::JobStatus;

#[tokio::test]
async fn workspace_writes_never_touch_the_canonical_clone() {
    let env = SpecEnv::new();
    env.seed_user("alice", "p@ss");
    let source = env.seed_repo_source("data.txt", "pristine\n");

    let daemon = env.start().await;
    let service = daemon.service();
    let token = service.authenticate("alice", "p@ss").expect("login");
    register_ready(&service, &token, "demo", &source).await;

    let id = submit(
        &service,
        &token,
        "demo",
        "echo vandalized > data.txt; rm -f README.md; echo new-file > invader.txt",
    )
    .await;
    let job = wait_status(&service, &token, &id, JobStatus::Completed).await;

    // The workspace saw every mutation and records how it was made.
    let workspace = job.workspace_path.expect("workspace");
    assert!(job.cow_mode.is_some(), "materialization mode recorded");
    assert_eq!(std::fs::read(workspace.join("data.txt")).expect("data"), b"vandalized\n");
    assert!(workspace.join("invader.txt").exists());

    // The canonical clone is untouched.
    let clone_path = service.get_repo(&token, "demo").expect("repo").local_path;
    assert_eq!(std::fs::read(clone_path.join("data.txt")).expect("clone data"), b"pristine\n");
    assert!(!clone_path.join("invader.txt").exists());

    // And the original source directory as well.
    assert_eq!(std::fs::read(source.join("data.txt")).expect("source data"), b"pristine\n");
    daemon.shutdown().await;
}

#[tokio::test]
async fn concurrent_jobs_get_independent_workspaces() {
    let env = SpecEnv::new();
    env.seed_user("alice", "p@ss");
    let source = env.seed_repo_source("counter.txt", "0\n");

    let daemon = env.start().await;
    let service = daemon.service();
    let token = service.authenticate("alice", "p@ss").expect("login");
    register_ready(&service, &token, "demo", &source).await;

    let a = submit(&service, &token, "demo", "echo a > counter.txt; sleep 1; cat counter.txt").await;
    let b = submit(&service, &token, "demo", "echo b > counter.txt; sleep 1; cat counter.txt").await;

    let job_a = wait_status(&service, &token, &a, JobStatus::Completed).await;
    let job_b = wait_status(&service, &token, &b, JobStatus::Completed).await;
    assert_ne!(job_a.workspace_path, job_b.workspace_path);

    let out_a =
        service.subscribe_output(&token, &a).expect("sub").collect().await.expect("out");
    let out_b =
        service.subscribe_output(&token, &b).expect("sub").collect().await.expect("out");
    assert_eq!(out_a, b"a\n", "job A sees only its own write");
    assert_eq!(out_b, b"b\n", "job B sees only its own write");
    daemon.shutdown().await;
}
