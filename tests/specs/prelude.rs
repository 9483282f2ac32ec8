// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Shared fixtures for the scenario specs.

use mill_auth::db::NewUser;
use mill_auth::UserDb;
use mill_core::{Job, JobId, JobOptions, JobStatus, RegistrationStatus, RepoKind};
use mill_daemon::{Config, DaemonHandle, Service};
use mill_core::SystemClock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type SpecService = Arc<Service<SystemClock>>;

pub struct SpecEnv {
    _dir: tempfile::TempDir,
    pub config: Config,
}

impl SpecEnv {
    /// A daemon environment in a fresh temp directory, `/bin/sh -c` as the
    /// assistant, and fast grace/drain windows suited to specs.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        let config = Config {
            state_dir: root.join("state"),
            max_concurrent: 4,
            job_timeout_seconds_default: 60,
            cancel_grace_seconds: 1,
            workspace_root: root.join("jobs"),
            repos_root: root.join("repos"),
            token_secret: b"spec-suite-secret".to_vec(),
            token_lifetime_seconds: 3600,
            janitor_interval_seconds: 1,
            upload_retention_hours: 24,
            assistant_cli_command: "/bin/sh".to_string(),
            assistant_cli_args: vec!["-c".to_string()],
            indexer_command: None,
            passwd_file: root.join("passwd"),
            shadow_file: root.join("shadow"),
            sessions_root: root.join("sessions"),
            drain_seconds: 5,
        };
        Self { _dir: dir, config }
    }

    pub fn root(&self) -> PathBuf {
        self._dir.path().to_path_buf()
    }

    pub async fn start(&self) -> DaemonHandle {
        mill_daemon::startup(self.config.clone()).await.expect("daemon startup")
    }

    /// Create a user directly in the passwd/shadow pair.
    pub fn seed_user(&self, username: &str, password: &str) {
        UserDb::new(&self.config.passwd_file, &self.config.shadow_file)
            .add(username, password, NewUser::default())
            .expect("seed user");
    }

    /// Lay down a folder-kind repo source with one file.
    pub fn seed_repo_source(&self, file: &str, content: &str) -> PathBuf {
        let src = self.root().join("seed");
        std::fs::create_dir_all(&src).expect("seed dir");
        std::fs::write(src.join(file), content).expect("seed file");
        src
    }
}

/// Poll until `cond` holds or the deadline passes; true when it held.
pub async fn wait_for<F: FnMut() -> bool>(max: Duration, mut cond: F) -> bool {
    let deadline = Instant::now() + max;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

/// Register a folder repo and wait until its clone is ready.
pub async fn register_ready(service: &SpecService, token: &str, name: &str, source: &PathBuf) {
    service
        .register_repo(token, name, RepoKind::Folder, &source.display().to_string(), false)
        .await
        .expect("register repo");
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let repo = service.get_repo(token, name).expect("repo exists");
        match repo.registration_status {
            RegistrationStatus::Ready => return,
            RegistrationStatus::CloneFailed | RegistrationStatus::IndexFailed => {
                panic!("repo registration failed: {}", repo.registration_status)
            }
            _ => {}
        }
        assert!(Instant::now() < deadline, "repo clone timed out");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Submit and admit a shell-script job.
pub async fn submit(service: &SpecService, token: &str, repo: &str, script: &str) -> JobId {
    let job = service
        .create_job(token, repo, script, JobOptions::default())
        .await
        .expect("create job");
    service.start_job(token, &job.id).await.expect("start job");
    job.id
}

pub fn status_of(service: &SpecService, token: &str, id: &JobId) -> JobStatus {
    service.get_job(token, id).expect("job exists").0.status
}

pub async fn wait_status(
    service: &SpecService,
    token: &str,
    id: &JobId,
    status: JobStatus,
) -> Job {
    let ok = wait_for(Duration::from_secs(20), || status_of(service, token, id) == status).await;
    let (job, _) = service.get_job(token, id).expect("job exists");
    assert!(ok, "timed out waiting for {status}; job is {} ({:?})", job.status, job.fail_reason);
    job
}

/// Linux: pid liveness via procfs, good enough for specs.
pub fn process_gone(pid: u32) -> bool {
    !std::path::Path::new(&format!("/proc/{pid}")).exists()
}
