// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! The scheduler engine.
//!
//! All state transitions happen behind one mutation lock; all blocking work
//! (workspace clones, subprocess lifecycles, state persistence) runs in
//! detached tasks that post [`Event`]s back to the engine loop. The lock is
//! never held across I/O or a subprocess wait.

pub mod broker;
pub mod executor;
pub mod scheduler;

use crate::registry::RepoRegistry;
use broker::OutputBroker;
use executor::ExecConfig;
use mill_core::{
    Clock, Event, ExecOutcome, FailReason, Job, JobId, JobSpec, JobStatus, StatusChange,
};
use mill_cowfs::CloneEngine;
use mill_storage::{JobStore, StoreError};
use parking_lot::Mutex;
use scheduler::SchedulerState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Event channel depth; transitions are tiny, so this never fills in practice.
const EVENT_CHANNEL_DEPTH: usize = 256;

/// Notification bus depth. Lagging readers drop old notices, never block.
const BUS_DEPTH: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no such job: {0}")]
    NotFound(JobId),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// The scheduler engine. Shared as `Arc`; cheap handles everywhere.
pub struct Engine<C: Clock> {
    state: Arc<Mutex<SchedulerState>>,
    store: JobStore,
    registry: Arc<RepoRegistry<C>>,
    clone_engine: CloneEngine,
    broker: OutputBroker,
    bus: broadcast::Sender<StatusChange>,
    event_tx: mpsc::Sender<Event>,
    exec: ExecConfig,
    clock: C,
}

impl<C: Clock> Engine<C> {
    /// Build the engine and hand back the receiver the event loop drains.
    pub fn new(
        max_concurrent: usize,
        exec: ExecConfig,
        store: JobStore,
        registry: Arc<RepoRegistry<C>>,
        clone_engine: CloneEngine,
        clock: C,
    ) -> (Arc<Self>, mpsc::Receiver<Event>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        let (bus, _) = broadcast::channel(BUS_DEPTH);
        let engine = Arc::new(Self {
            state: Arc::new(Mutex::new(SchedulerState::new(max_concurrent))),
            store,
            registry,
            clone_engine,
            broker: OutputBroker::new(),
            bus,
            event_tx,
            exec,
            clock,
        });
        (engine, event_rx)
    }

    pub fn broker(&self) -> &OutputBroker {
        &self.broker
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Shared scheduler state, for the janitor's liveness checks.
    pub fn state(&self) -> Arc<Mutex<SchedulerState>> {
        Arc::clone(&self.state)
    }

    /// Subscribe to job status change notifications.
    pub fn subscribe_events(&self) -> broadcast::Receiver<StatusChange> {
        self.bus.subscribe()
    }

    /// Adopt recovered records at startup and dispatch whatever queued work
    /// survived the restart.
    pub async fn adopt(&self, jobs: Vec<Job>) {
        for job in &jobs {
            if !job.is_terminal() {
                let len = tokio::fs::metadata(self.store.output_path(&job.id))
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0);
                self.broker.open(&job.id, len);
            }
        }
        self.state.lock().adopt(jobs);
        self.pump().await;
    }

    /// Materialize a job record. No workspace, no queue slot yet.
    pub async fn create(&self, spec: JobSpec) -> Result<Job, EngineError> {
        if !self.state.lock().is_accepting() {
            return Err(EngineError::Conflict("daemon is shutting down".to_string()));
        }
        let job = Job::new(spec, &self.clock);
        self.store.save(&job).await?;
        self.broker.open(&job.id, 0);
        self.state.lock().insert_job(job.clone());
        tracing::info!(job = %job.id, owner = %job.owner, repo = %job.repo_name, "job created");
        self.publish(&job);
        Ok(job)
    }

    /// Admit a job to the queue. Idempotent for jobs already queued.
    pub async fn start(&self, id: &JobId) -> Result<Job, EngineError> {
        let (job, transitioned) = {
            let mut state = self.state.lock();
            if !state.is_accepting() {
                return Err(EngineError::Conflict("daemon is shutting down".to_string()));
            }
            let job = state.job(id).ok_or_else(|| EngineError::NotFound(id.clone()))?;
            match job.status {
                JobStatus::Queued => (job.clone(), false),
                JobStatus::Created => {
                    let job = state.job_mut(id).map(|j| {
                        j.enqueue();
                        j.clone()
                    });
                    state.enqueue(id);
                    // job_mut cannot miss: the same id was just read.
                    (job.unwrap_or_else(|| unreachable!()), true)
                }
                status => {
                    return Err(EngineError::Conflict(format!("cannot start a {status} job")))
                }
            }
        };
        if transitioned {
            self.store.save(&job).await?;
            self.publish(&job);
            self.pump().await;
        }
        Ok(job)
    }

    /// Cancel a job.
    ///
    /// Created and queued jobs land in `cancelled` before this returns.
    /// Running jobs are acknowledged immediately; the terminate-with-grace
    /// protocol runs in the executor task and the terminal status lands
    /// within the grace window plus scheduling slack. Cancelling a
    /// cancelled job is a no-op success.
    pub async fn cancel(&self, id: &JobId) -> Result<Job, EngineError> {
        enum Action {
            Done(Job),
            Persist(Job),
            Signalled(Job),
        }
        let action = {
            let mut state = self.state.lock();
            let job = state.job(id).ok_or_else(|| EngineError::NotFound(id.clone()))?;
            match job.status {
                JobStatus::Cancelled => Action::Done(job.clone()),
                JobStatus::Completed | JobStatus::Failed => {
                    return Err(EngineError::Conflict(format!(
                        "cannot cancel a {} job",
                        job.status
                    )))
                }
                JobStatus::Running => {
                    match state.token(id) {
                        Some(token) => token.cancel(),
                        // Running without a token cannot happen outside a
                        // teardown race; log and fall through to the ack.
                        None => tracing::warn!(job = %id, "running job has no cancel token"),
                    }
                    Action::Signalled(job.clone())
                }
                JobStatus::Created | JobStatus::Queued => {
                    let was_queued = job.status == JobStatus::Queued;
                    let now = self.clock.epoch_ms();
                    if was_queued {
                        state.remove_queued(id);
                        state.release_slot(id);
                    }
                    let job = state.job_mut(id).map(|j| {
                        j.cancel(now);
                        j.clone()
                    });
                    Action::Persist(job.unwrap_or_else(|| unreachable!()))
                }
            }
        };
        match action {
            Action::Done(job) => Ok(job),
            Action::Signalled(job) => {
                tracing::info!(job = %id, "cancellation signalled to running job");
                Ok(job)
            }
            Action::Persist(job) => {
                self.broker.finish(id);
                self.store.save(&job).await?;
                self.publish(&job);
                self.pump().await;
                Ok(job)
            }
        }
    }

    /// Destroy a job: workspace and on-disk record included.
    ///
    /// Running jobs are force-cancelled first; the call waits (bounded) for
    /// the subprocess teardown before removing anything.
    pub async fn delete(&self, id: &JobId) -> Result<(), EngineError> {
        let status = {
            let state = self.state.lock();
            state.job(id).ok_or_else(|| EngineError::NotFound(id.clone()))?.status
        };

        if !status.is_terminal() {
            let mut events = self.bus.subscribe();
            let snapshot = self.cancel(id).await?;
            if !snapshot.status.is_terminal() {
                // Running: wait out termination, grace plus slack.
                let deadline = self.exec.grace + Duration::from_secs(5);
                let wait = async {
                    loop {
                        match events.recv().await {
                            Ok(change) if change.id == *id && change.status.is_terminal() => {
                                break
                            }
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(_)) => {}
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                };
                if tokio::time::timeout(deadline, wait).await.is_err() {
                    tracing::warn!(job = %id, "teardown did not confirm in time, deleting anyway");
                }
            }
        }

        self.state.lock().remove_job(id);
        self.broker.close(id);
        self.store.delete(id, &self.clock).await?;
        Ok(())
    }

    /// Snapshot one job plus its advisory queue position.
    pub fn get(&self, id: &JobId) -> Option<(Job, Option<usize>)> {
        let state = self.state.lock();
        state.job(id).map(|job| (job.clone(), state.queue_position(id)))
    }

    pub fn list(&self) -> Vec<Job> {
        self.state.lock().jobs_snapshot()
    }

    /// Record a staged upload on the live job and persist.
    ///
    /// Re-checks the status under the lock: the file was written outside
    /// it, and the job may have been admitted in between.
    pub async fn record_upload(
        &self,
        id: &JobId,
        record: mill_core::UploadedFile,
    ) -> Result<Job, EngineError> {
        let job = {
            let mut state = self.state.lock();
            let job = state.job_mut(id).ok_or_else(|| EngineError::NotFound(id.clone()))?;
            if job.status != JobStatus::Created {
                return Err(EngineError::Conflict(format!(
                    "job is {}, uploads are closed",
                    job.status
                )));
            }
            job.uploads.retain(|u| u.original_name != record.original_name);
            job.uploads.push(record);
            job.clone()
        };
        self.store.save(&job).await?;
        Ok(job)
    }

    pub fn repo_in_use(&self, repo_name: &str) -> bool {
        self.state.lock().repo_in_use(repo_name)
    }

    /// The engine loop: drains events until shutdown, then runs the drain
    /// protocol (cancel running jobs, bounded wait, record stragglers as
    /// `failed(shutdown)`).
    pub async fn run(
        self: Arc<Self>,
        mut event_rx: mpsc::Receiver<Event>,
        shutdown: CancellationToken,
        drain_window: Duration,
    ) {
        loop {
            // The receiver is only borrowed inside the select, leaving it
            // free for the drain pass afterwards.
            let next = tokio::select! {
                event = event_rx.recv() => Some(event),
                _ = shutdown.cancelled() => None,
            };
            match next {
                Some(Some(event)) => self.apply_event(event).await,
                Some(None) => break,
                None => {
                    self.drain(&mut event_rx, drain_window).await;
                    break;
                }
            }
        }
        tracing::info!("engine loop stopped");
    }

    async fn apply_event(&self, event: Event) {
        tracing::debug!(event = event.name(), job = %event.job_id(), "applying event");
        match event {
            Event::WorkspaceReady { id, path, mode } => self.on_workspace_ready(id, path, mode).await,
            Event::WorkspaceFailed { id, reason } => self.on_workspace_failed(id, reason).await,
            Event::JobSpawned { id, pid } => self.on_spawned(id, pid).await,
            Event::JobFinished { id, outcome } => self.on_finished(id, outcome).await,
        }
    }

    async fn on_workspace_ready(&self, id: JobId, path: std::path::PathBuf, mode: mill_core::CowMode) {
        let handoff = {
            let mut state = self.state.lock();
            let stale = match state.job(&id) {
                Some(job) => job.is_terminal() || !state.holds_slot(&id),
                None => true,
            };
            if stale {
                None
            } else {
                let token = CancellationToken::new();
                state.insert_token(&id, token.clone());
                let job = state.job_mut(&id).map(|job| {
                    job.set_workspace(path.clone(), mode);
                    job.mark_running();
                    job.clone()
                });
                job.map(|job| (job, token))
            }
        };

        let Some((job, token)) = handoff else {
            // Cancelled or deleted while materializing: the tree is unowned.
            tracing::info!(job = %id, "discarding workspace for inactive job");
            tokio::spawn(async move {
                if let Err(e) = mill_cowfs::destroy_workspace(&path).await {
                    tracing::warn!(error = %e, "orphan workspace removal failed");
                }
            });
            return;
        };

        self.persist(&job).await;
        self.publish(&job);

        let spec = executor::build_launch_spec(&self.exec, &job, &path);
        let timeout = executor::job_timeout(&self.exec, &job);
        tokio::spawn(executor::execute(
            id,
            spec,
            self.store.output_path(&job.id),
            timeout,
            self.exec.grace,
            self.exec.scrub_env.clone(),
            token,
            self.broker.clone(),
            self.event_tx.clone(),
        ));
    }

    async fn on_workspace_failed(&self, id: JobId, reason: String) {
        tracing::error!(job = %id, reason, "workspace materialization failed");
        let now = self.clock.epoch_ms();
        let job = {
            let mut state = self.state.lock();
            state.release_slot(&id);
            state.job_mut(&id).filter(|j| !j.is_terminal()).map(|job| {
                job.fail(FailReason::Workspace, now);
                job.clone()
            })
        };
        if let Some(job) = job {
            self.broker.finish(&id);
            self.persist(&job).await;
            self.publish(&job);
        }
        self.pump().await;
    }

    async fn on_spawned(&self, id: JobId, pid: u32) {
        let job = {
            let mut state = self.state.lock();
            state
                .job_mut(&id)
                .filter(|j| j.status == JobStatus::Running)
                .map(|job| {
                    job.set_pid(pid);
                    job.clone()
                })
        };
        if let Some(job) = job {
            self.persist(&job).await;
        }
    }

    async fn on_finished(&self, id: JobId, outcome: ExecOutcome) {
        let now = self.clock.epoch_ms();
        let job = {
            let mut state = self.state.lock();
            state.release_slot(&id);
            state.job_mut(&id).filter(|j| !j.is_terminal()).map(|job| {
                match &outcome {
                    ExecOutcome::Exited { code: 0 } => job.complete(now),
                    ExecOutcome::Exited { code } => {
                        job.fail(FailReason::Nonzero { code: *code }, now)
                    }
                    ExecOutcome::TimedOut => job.fail(FailReason::Timeout, now),
                    ExecOutcome::Cancelled => job.cancel(now),
                    ExecOutcome::SpawnFailed { reason } => {
                        tracing::error!(job = %id, reason, "executor handoff failed");
                        job.fail(FailReason::Dispatch, now);
                    }
                }
                job.clone()
            })
        };
        if let Some(job) = job {
            self.broker.finish(&id);
            self.persist(&job).await;
            self.publish(&job);
        }
        self.pump().await;
    }

    /// Dispatch queue heads into free slots and kick off their workspace
    /// clones in detached tasks.
    async fn pump(&self) {
        let batch = self.state.lock().dispatch(self.clock.epoch_ms());
        for job in batch {
            // Stamp started_at before the clone begins.
            self.persist(&job).await;

            let Some(source) = self.registry.local_path(&job.repo_name) else {
                let _ = self
                    .event_tx
                    .send(Event::WorkspaceFailed {
                        id: job.id.clone(),
                        reason: format!("repo {} is not available", job.repo_name),
                    })
                    .await;
                continue;
            };

            let dest = self.store.workspace_dir(&job.id);
            let clone_engine = self.clone_engine.clone();
            let event_tx = self.event_tx.clone();
            let id = job.id.clone();
            tokio::spawn(async move {
                let event = match clone_engine.create_workspace(&source, &dest).await {
                    Ok(mode) => Event::WorkspaceReady { id, path: dest, mode },
                    Err(e) => Event::WorkspaceFailed { id, reason: e.to_string() },
                };
                if event_tx.send(event).await.is_err() {
                    tracing::warn!("engine loop gone before workspace event could be posted");
                }
            });
        }
    }

    /// Shutdown drain: stop admissions, cancel everything active, process
    /// events until the running set empties or the window closes, then
    /// record stragglers as `failed(shutdown)`.
    async fn drain(&self, event_rx: &mut mpsc::Receiver<Event>, window: Duration) {
        let now = self.clock.epoch_ms();
        let cancelled_while_materializing = {
            let mut state = self.state.lock();
            state.stop_accepting();
            let mut flipped = Vec::new();
            for id in state.running_ids() {
                match state.token(&id) {
                    Some(token) => token.cancel(),
                    None => {
                        // Still materializing: no subprocess to signal, flip directly.
                        if let Some(job) = state.job_mut(&id).filter(|j| !j.is_terminal()) {
                            job.cancel(now);
                            flipped.push(job.clone());
                        }
                        state.release_slot(&id);
                    }
                }
            }
            flipped
        };
        for job in &cancelled_while_materializing {
            self.broker.finish(&job.id);
            self.persist(job).await;
            self.publish(job);
        }

        tracing::info!(window_secs = window.as_secs(), "draining running jobs");
        let deadline = tokio::time::Instant::now() + window;
        while self.state.lock().running_count() > 0 {
            match tokio::time::timeout_at(deadline, event_rx.recv()).await {
                Ok(Some(event)) => self.apply_event(event).await,
                Ok(None) => break,
                Err(_) => break,
            }
        }

        let stragglers = {
            let mut state = self.state.lock();
            let mut failed = Vec::new();
            for id in state.running_ids() {
                state.release_slot(&id);
                if let Some(job) = state.job_mut(&id).filter(|j| !j.is_terminal()) {
                    job.fail(FailReason::Shutdown, self.clock.epoch_ms());
                    failed.push(job.clone());
                }
            }
            failed
        };
        for job in &stragglers {
            tracing::warn!(job = %job.id, "job did not drain before shutdown window closed");
            self.broker.finish(&job.id);
            self.persist(job).await;
            self.publish(job);
        }
    }

    async fn persist(&self, job: &Job) {
        if let Err(e) = self.store.save(job).await {
            // The store already retried once; state stays authoritative in
            // memory and the next transition retries the write.
            tracing::error!(job = %job.id, error = %e, "state persist failed");
        }
    }

    fn publish(&self, job: &Job) {
        let _ = self.bus.send(StatusChange {
            id: job.id.clone(),
            status: job.status,
            fail_reason: job.fail_reason,
        });
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
