// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Background janitor: periodic cleanup of on-disk leftovers.
//!
//! Each sweep is idempotent and tolerant of concurrent scheduler activity:
//! anything belonging to a job the scheduler still tracks as non-terminal
//! is off limits. Token validation is stateless, so there is no token
//! cache to evict here.

use crate::engine::scheduler::SchedulerState;
use mill_core::{Clock, JobId};
use mill_storage::JobStore;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct Janitor<C: Clock> {
    store: JobStore,
    state: Arc<Mutex<SchedulerState>>,
    interval: Duration,
    /// How long a deleted job's uploads linger before removal.
    upload_retention: Duration,
    clock: C,
}

impl<C: Clock> Janitor<C> {
    pub fn new(
        store: JobStore,
        state: Arc<Mutex<SchedulerState>>,
        interval: Duration,
        upload_retention: Duration,
        clock: C,
    ) -> Self {
        Self { store, state, interval, upload_retention, clock }
    }

    /// Run sweeps until shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep().await,
                _ = shutdown.cancelled() => break,
            }
        }
        tracing::debug!("janitor stopped");
    }

    /// One cleanup pass over the jobs root.
    pub async fn sweep(&self) {
        let mut entries = match tokio::fs::read_dir(self.store.jobs_root()).await {
            Ok(entries) => entries,
            Err(_) => return,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let id = JobId::from_string(entry.file_name().to_string_lossy().into_owned());

            // Never touch anything the scheduler still considers live.
            let live = {
                let state = self.state.lock();
                state.job(&id).map(|j| !j.is_terminal()).unwrap_or(false)
            };
            if live {
                continue;
            }

            if dir.join("state.json").exists() {
                // A record exists (terminal or unknown to this process).
                // The record owns its tree; nothing to clean.
                continue;
            }

            if let Some(deleted_at_ms) = read_tombstone(&dir.join("deleted.json")).await {
                self.reap_deleted(&id, &dir, deleted_at_ms).await;
            } else {
                // No record, no tombstone: an orphan from a half-created or
                // externally damaged job directory.
                tracing::info!(job = %id, "removing orphan job directory");
                if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                    tracing::warn!(job = %id, error = %e, "orphan removal failed");
                }
            }
        }
    }

    async fn reap_deleted(&self, id: &JobId, dir: &Path, deleted_at_ms: u64) {
        let age_ms = self.clock.epoch_ms().saturating_sub(deleted_at_ms);
        if age_ms < self.upload_retention.as_millis() as u64 {
            return;
        }
        tracing::info!(job = %id, "removing expired upload directory of deleted job");
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            tracing::warn!(job = %id, error = %e, "upload reap failed");
        }
    }
}

async fn read_tombstone(path: &Path) -> Option<u64> {
    let bytes = tokio::fs::read(path).await.ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value.get("deleted_at_ms")?.as_u64()
}

#[cfg(test)]
#[path = "janitor_tests.rs"]
mod tests;
