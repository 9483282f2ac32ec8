// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! In-memory scheduler state: job map, FIFO queue, bounded running set.
//!
//! This struct is pure bookkeeping. It lives behind a single
//! `parking_lot::Mutex` in the engine and is never held across I/O: the
//! engine locks, applies a transition, clones what it needs, and unlocks
//! before persisting or spawning work.

use mill_core::{Job, JobId, JobStatus};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio_util::sync::CancellationToken;

pub struct SchedulerState {
    jobs: HashMap<JobId, Job>,
    queue: VecDeque<JobId>,
    /// Jobs holding a concurrency slot: dispatched (workspace materializing)
    /// or running. Bounded by `max_concurrent`.
    running: HashSet<JobId>,
    /// Cooperative cancellation handles for active executor tasks.
    tokens: HashMap<JobId, CancellationToken>,
    max_concurrent: usize,
    accepting: bool,
}

impl SchedulerState {
    pub fn new(max_concurrent: usize) -> Self {
        debug_assert!(max_concurrent >= 1);
        Self {
            jobs: HashMap::new(),
            queue: VecDeque::new(),
            running: HashSet::new(),
            tokens: HashMap::new(),
            max_concurrent,
            accepting: true,
        }
    }

    /// Adopt recovered records at startup. Jobs persisted as `queued`
    /// re-enter the queue in creation order; everything else is just
    /// indexed. The store has already demoted `running` records.
    pub fn adopt(&mut self, jobs: Vec<Job>) {
        for job in jobs {
            if job.status == JobStatus::Queued {
                self.queue.push_back(job.id.clone());
            }
            self.jobs.insert(job.id.clone(), job);
        }
    }

    pub fn insert_job(&mut self, job: Job) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn job(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn job_mut(&mut self, id: &JobId) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    pub fn remove_job(&mut self, id: &JobId) -> Option<Job> {
        self.queue.retain(|q| q != id);
        self.running.remove(id);
        self.tokens.remove(id);
        self.jobs.remove(id)
    }

    pub fn jobs_snapshot(&self) -> Vec<Job> {
        let mut all: Vec<Job> = self.jobs.values().cloned().collect();
        all.sort_by_key(|j| j.created_at_ms);
        all
    }

    /// Zero-based queue index at this instant. Advisory: may be stale by
    /// the time the caller sees it.
    pub fn queue_position(&self, id: &JobId) -> Option<usize> {
        self.queue.iter().position(|q| q == id)
    }

    /// Admit a created job to the queue tail.
    pub fn enqueue(&mut self, id: &JobId) {
        debug_assert!(self.jobs.contains_key(id));
        self.queue.push_back(id.clone());
    }

    /// Drop a job from the queue without dispatching it (cancellation).
    pub fn remove_queued(&mut self, id: &JobId) {
        self.queue.retain(|q| q != id);
    }

    /// Pop queue heads into the running set while capacity allows.
    ///
    /// Each popped job gets its dispatch stamp and a concurrency slot;
    /// returned clones tell the engine which workspaces to materialize.
    /// FIFO is the only cross-owner guarantee; per owner, program order is
    /// preserved because admission order is program order.
    pub fn dispatch(&mut self, now_ms: u64) -> Vec<Job> {
        let mut dispatched = Vec::new();
        while self.accepting && self.running.len() < self.max_concurrent {
            let Some(id) = self.queue.pop_front() else { break };
            let Some(job) = self.jobs.get_mut(&id) else { continue };
            job.assign_started(now_ms);
            self.running.insert(id);
            dispatched.push(job.clone());
        }
        dispatched
    }

    /// Release a concurrency slot.
    pub fn release_slot(&mut self, id: &JobId) {
        self.running.remove(id);
        self.tokens.remove(id);
    }

    pub fn holds_slot(&self, id: &JobId) -> bool {
        self.running.contains(id)
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn running_ids(&self) -> Vec<JobId> {
        self.running.iter().cloned().collect()
    }

    pub fn insert_token(&mut self, id: &JobId, token: CancellationToken) {
        self.tokens.insert(id.clone(), token);
    }

    pub fn token(&self, id: &JobId) -> Option<CancellationToken> {
        self.tokens.get(id).cloned()
    }

    pub fn stop_accepting(&mut self) {
        self.accepting = false;
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    /// True while any non-terminal job references the repo; unregistration
    /// must wait for them.
    pub fn repo_in_use(&self, repo_name: &str) -> bool {
        self.jobs.values().any(|j| j.repo_name == repo_name && !j.is_terminal())
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
