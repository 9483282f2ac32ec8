// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Daemon lifecycle: startup, recovery, shutdown.

mod startup;
pub use startup::startup;

use crate::config::ConfigError;
use crate::service::Service;
use crate::Config;
use mill_auth::TokenError;
use mill_core::SystemClock;
use mill_storage::StoreError;
use std::fs::File;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine state directory")]
    NoStateDir,

    #[error("failed to acquire pid lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("token issuer: {0}")]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("registry: {0}")]
    Registry(#[from] crate::registry::RegistryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A started daemon: the service facade plus its background tasks.
///
/// Dropping the handle without calling [`DaemonHandle::shutdown`] leaves
/// tasks running until the runtime exits; the pid lock releases when the
/// handle drops.
pub struct DaemonHandle {
    pub config: Config,
    service: Arc<Service<SystemClock>>,
    shutdown: CancellationToken,
    engine_task: tokio::task::JoinHandle<()>,
    janitor_task: tokio::task::JoinHandle<()>,
    // NOTE(lifetime): held to maintain the exclusive pid lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
}

impl DaemonHandle {
    pub(crate) fn new(
        config: Config,
        service: Arc<Service<SystemClock>>,
        shutdown: CancellationToken,
        engine_task: tokio::task::JoinHandle<()>,
        janitor_task: tokio::task::JoinHandle<()>,
        lock_file: File,
    ) -> Self {
        Self { config, service, shutdown, engine_task, janitor_task, lock_file }
    }

    pub fn service(&self) -> Arc<Service<SystemClock>> {
        Arc::clone(&self.service)
    }

    /// Graceful shutdown: stop admissions, cancel running jobs with grace,
    /// drain up to the configured window, persist final state, return.
    pub async fn shutdown(self) {
        info!("shutting down daemon");
        self.shutdown.cancel();
        if let Err(e) = self.engine_task.await {
            warn!(error = %e, "engine task ended abnormally");
        }
        self.janitor_task.abort();
        let _ = self.janitor_task.await;

        let pid_path = self.config.pid_path();
        if let Err(e) = std::fs::remove_file(&pid_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove pid file");
            }
        }
        info!("daemon shutdown complete");
    }

    /// Abort everything immediately: no drain, no final persists.
    ///
    /// Simulates a host crash; recovery paths are exercised by starting a
    /// fresh daemon over the same state directory.
    pub async fn hard_stop(self) {
        warn!("hard stop: aborting daemon tasks without drain");
        self.engine_task.abort();
        self.janitor_task.abort();
        let _ = self.engine_task.await;
        let _ = self.janitor_task.await;
        let _ = std::fs::remove_file(self.config.pid_path());
    }
}
