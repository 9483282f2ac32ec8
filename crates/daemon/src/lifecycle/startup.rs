// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Daemon startup: lock, recover, wire, spawn.

use super::{DaemonHandle, LifecycleError};
use crate::engine::Engine;
use crate::janitor::Janitor;
use crate::registry::RepoRegistry;
use crate::service::Service;
use crate::sessions::SessionLocator;
use crate::Config;
use fs2::FileExt;
use mill_auth::{TokenIssuer, UserDb};
use mill_core::SystemClock;
use mill_cowfs::CloneEngine;
use mill_storage::{JobStore, RepoCatalog};
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Bring a daemon up over a validated configuration.
///
/// Order matters: the pid lock comes first so two daemons never recover
/// the same state directory; job recovery runs before the engine loop so
/// queued work survives restarts; the janitor starts last.
pub async fn startup(config: Config) -> Result<DaemonHandle, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;
    std::fs::create_dir_all(config.jobs_root())?;
    std::fs::create_dir_all(&config.repos_root)?;

    let lock_file = acquire_pid_lock(&config)?;
    let clock = SystemClock;

    let store = JobStore::new(config.jobs_root());
    let recovered = store.recover(&clock).await?;
    info!(jobs = recovered.len(), "job records recovered");

    let registry = RepoRegistry::open(
        RepoCatalog::new(config.repo_catalog_path()),
        config.repos_root.clone(),
        config.indexer_command.clone(),
        CloneEngine::new(),
        clock.clone(),
    )
    .await?;

    let (engine, event_rx) = Engine::new(
        config.max_concurrent,
        config.exec_config(),
        store.clone(),
        Arc::clone(&registry),
        CloneEngine::new(),
        clock.clone(),
    );
    engine.adopt(recovered).await;

    let shutdown = CancellationToken::new();
    let engine_task = tokio::spawn(Arc::clone(&engine).run(
        event_rx,
        shutdown.clone(),
        config.drain_window(),
    ));
    let janitor = Janitor::new(
        store,
        engine.state(),
        config.janitor_interval(),
        config.upload_retention(),
        clock.clone(),
    );
    let janitor_task = tokio::spawn(janitor.run(shutdown.clone()));

    let users = UserDb::new(&config.passwd_file, &config.shadow_file);
    let tokens =
        TokenIssuer::new(config.token_secret.clone(), config.token_lifetime_seconds, clock)?;
    let sessions = SessionLocator::new(&config.sessions_root);
    let service = Arc::new(Service::new(engine, registry, users, tokens, sessions));

    info!(
        state_dir = %config.state_dir.display(),
        jobs_root = %config.jobs_root().display(),
        repos_root = %config.repos_root.display(),
        max_concurrent = config.max_concurrent,
        "daemon started"
    );
    Ok(DaemonHandle::new(config, service, shutdown, engine_task, janitor_task, lock_file))
}

/// One daemon per state directory, enforced with an advisory lock.
fn acquire_pid_lock(config: &Config) -> Result<File, LifecycleError> {
    let path = config.pid_path();
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(LifecycleError::Io)?;
    file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(file)
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
