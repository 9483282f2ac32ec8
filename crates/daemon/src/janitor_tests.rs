// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

use super::*;
use mill_core::test_support::sample_job;
use mill_core::FakeClock;

struct Fixture {
    _dir: tempfile::TempDir,
    store: JobStore,
    state: Arc<Mutex<SchedulerState>>,
    clock: FakeClock,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self {
            store: JobStore::new(dir.path().join("jobs")),
            state: Arc::new(Mutex::new(SchedulerState::new(4))),
            clock: FakeClock::new(),
            _dir: dir,
        }
    }

    fn janitor(&self) -> Janitor<FakeClock> {
        Janitor::new(
            self.store.clone(),
            Arc::clone(&self.state),
            Duration::from_secs(60),
            Duration::from_secs(3600),
            self.clock.clone(),
        )
    }
}

#[tokio::test]
async fn orphan_directories_are_removed() {
    let f = Fixture::new();
    let orphan = f.store.jobs_root().join("job-orphan");
    std::fs::create_dir_all(orphan.join("workspace")).unwrap();
    std::fs::write(orphan.join("workspace/file"), "x").unwrap();

    f.janitor().sweep().await;
    assert!(!orphan.exists());
}

#[tokio::test]
async fn recorded_jobs_are_left_alone() {
    let f = Fixture::new();
    let job = sample_job();
    f.store.save(&job).await.unwrap();
    std::fs::create_dir_all(f.store.workspace_dir(&job.id)).unwrap();

    f.janitor().sweep().await;
    assert!(f.store.state_path(&job.id).exists());
    assert!(f.store.workspace_dir(&job.id).exists());
}

#[tokio::test]
async fn live_jobs_are_never_touched_even_without_a_record() {
    let f = Fixture::new();
    let mut job = sample_job();
    job.enqueue();
    // In-memory only: no state.json on disk, simulating a persist race.
    let dir = f.store.job_dir(&job.id);
    std::fs::create_dir_all(dir.join("workspace")).unwrap();
    f.state.lock().insert_job(job.clone());

    f.janitor().sweep().await;
    assert!(dir.exists(), "non-terminal job's tree must survive");
}

#[tokio::test]
async fn deleted_uploads_are_reaped_after_retention() {
    let f = Fixture::new();
    let job = sample_job();
    f.store.save(&job).await.unwrap();
    std::fs::create_dir_all(f.store.uploads_dir(&job.id)).unwrap();
    std::fs::write(f.store.uploads_dir(&job.id).join("keep.txt"), "data").unwrap();
    f.store.delete(&job.id, &f.clock).await.unwrap();

    // Young tombstone: untouched.
    f.janitor().sweep().await;
    assert!(f.store.uploads_dir(&job.id).exists());

    // Past the retention horizon: reaped.
    f.clock.advance(Duration::from_secs(2 * 3600));
    f.janitor().sweep().await;
    assert!(!f.store.job_dir(&job.id).exists());
}

#[tokio::test]
async fn sweep_is_idempotent() {
    let f = Fixture::new();
    let orphan = f.store.jobs_root().join("job-orphan");
    std::fs::create_dir_all(&orphan).unwrap();

    let janitor = f.janitor();
    janitor.sweep().await;
    janitor.sweep().await;
    janitor.sweep().await;
    assert!(!orphan.exists());
}
