// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Job executor: runs the assistant CLI in a job's workspace.
//!
//! The child gets its own process group so descendants are signalled
//! together, pipes for stdout/stderr merged in arrival order into the
//! job's `output.log`, and an environment scrubbed of daemon secrets.
//! Cancellation and timeout share one termination protocol: SIGTERM to
//! the group, a grace window, then SIGKILL. The executor task owns no
//! locks; results travel back to the engine as events.

use crate::engine::broker::OutputBroker;
use mill_core::{Event, ExecOutcome, Job, JobId, LaunchSpec};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Pipe read buffer size.
const PIPE_BUF: usize = 8 * 1024;

/// Executor-wide settings derived from daemon configuration.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Assistant program plus fixed leading arguments.
    pub assistant_argv: Vec<String>,
    pub default_timeout: Duration,
    pub grace: Duration,
    /// Environment variable names that must never reach a child.
    pub scrub_env: Vec<String>,
}

/// Build the typed launch descriptor for a job.
///
/// The prompt is the final argv element, preceded by `--resume <session>`
/// when the job continues an existing assistant session. Nothing is ever
/// routed through a shell.
pub fn build_launch_spec(cfg: &ExecConfig, job: &Job, workspace: &Path) -> LaunchSpec {
    let mut argv = cfg.assistant_argv.clone();
    if let Some(session) = &job.options.resume_session {
        argv.push("--resume".to_string());
        argv.push(session.clone());
    }
    argv.push(job.prompt.clone());
    LaunchSpec::new(argv, workspace.to_path_buf())
}

pub fn job_timeout(cfg: &ExecConfig, job: &Job) -> Duration {
    job.options.timeout_secs.map(Duration::from_secs).unwrap_or(cfg.default_timeout)
}

/// Run one job's subprocess to an end state and report it.
///
/// Always posts exactly one `JobFinished`; the engine loop translates the
/// outcome into the terminal status.
#[allow(clippy::too_many_arguments)]
pub async fn execute(
    id: JobId,
    spec: LaunchSpec,
    log_path: PathBuf,
    timeout: Duration,
    grace: Duration,
    scrub_env: Vec<String>,
    cancel: CancellationToken,
    broker: OutputBroker,
    event_tx: mpsc::Sender<Event>,
) {
    let outcome = run_child(
        &id, &spec, &log_path, timeout, grace, &scrub_env, &cancel, &broker, &event_tx,
    )
    .await;
    tracing::info!(job = %id, outcome = %outcome, "execution finished");
    if event_tx.send(Event::JobFinished { id, outcome }).await.is_err() {
        tracing::warn!("engine loop gone before execution result could be posted");
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_child(
    id: &JobId,
    spec: &LaunchSpec,
    log_path: &Path,
    timeout: Duration,
    grace: Duration,
    scrub_env: &[String],
    cancel: &CancellationToken,
    broker: &OutputBroker,
    event_tx: &mpsc::Sender<Event>,
) -> ExecOutcome {
    let mut cmd = Command::new(spec.program());
    cmd.args(spec.args())
        .current_dir(&spec.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);
    for (key, val) in &spec.env {
        cmd.env(key, val);
    }
    for key in scrub_env {
        cmd.env_remove(key);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ExecOutcome::SpawnFailed {
                reason: format!("{}: {e}", spec.program()),
            }
        }
    };
    let pid = child.id().unwrap_or_default();
    tracing::info!(job = %id, pid, program = %spec.program(), cwd = %spec.cwd.display(), "child spawned");
    let _ = event_tx.send(Event::JobSpawned { id: id.clone(), pid }).await;

    // Single writer: both pipes feed one channel, one task appends to the
    // log and publishes offsets. Chunk order is arrival order.
    let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>(64);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_pipe(stdout, chunk_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_pipe(stderr, chunk_tx.clone()));
    }
    drop(chunk_tx);
    let writer = tokio::spawn(append_output(
        log_path.to_path_buf(),
        chunk_rx,
        broker.clone(),
        id.clone(),
    ));

    // Resolve the cause first; `child` is only borrowed by the wait branch,
    // so the termination protocol can take it mutably afterwards.
    enum Cause {
        Exited(std::io::Result<std::process::ExitStatus>),
        Cancelled,
        TimedOut,
    }
    let cause = tokio::select! {
        status = child.wait() => Cause::Exited(status),
        _ = cancel.cancelled() => Cause::Cancelled,
        _ = tokio::time::sleep(timeout) => Cause::TimedOut,
    };
    let outcome = match cause {
        Cause::Exited(Ok(status)) => {
            ExecOutcome::Exited { code: status.code().unwrap_or(-1) }
        }
        Cause::Exited(Err(e)) => {
            ExecOutcome::SpawnFailed { reason: format!("wait failed: {e}") }
        }
        Cause::Cancelled => {
            terminate_group(pid, &mut child, grace).await;
            ExecOutcome::Cancelled
        }
        Cause::TimedOut => {
            tracing::warn!(job = %id, timeout_secs = timeout.as_secs(), "job timed out");
            terminate_group(pid, &mut child, grace).await;
            ExecOutcome::TimedOut
        }
    };

    // Pipes reach EOF once the group is dead; wait for the writer so every
    // captured byte is on disk before the terminal status lands.
    let _ = writer.await;
    outcome
}

/// SIGTERM the group, wait out the grace window, then SIGKILL what remains.
async fn terminate_group(pid: u32, child: &mut Child, grace: Duration) {
    signal_group(pid, Signal::SIGTERM);
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        tracing::warn!(pid, grace_secs = grace.as_secs(), "grace expired, killing group");
        signal_group(pid, Signal::SIGKILL);
        let _ = child.wait().await;
    }
}

fn signal_group(pid: u32, signal: Signal) {
    if pid == 0 {
        return;
    }
    // The child was spawned with process_group(0), so its pid is the pgid.
    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        tracing::debug!(pid, %signal, error = %e, "group signal not delivered");
    }
}

async fn pump_pipe(mut pipe: impl tokio::io::AsyncRead + Unpin, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; PIPE_BUF];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// The single log writer. Appends chunks in arrival order and notifies the
/// broker by offset after every write; never blocked by readers.
async fn append_output(
    log_path: PathBuf,
    mut chunk_rx: mpsc::Receiver<Vec<u8>>,
    broker: OutputBroker,
    id: JobId,
) {
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .await;
    let mut file = match file {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(job = %id, path = %log_path.display(), error = %e, "cannot open output log");
            // Drain the pipes so the child never blocks on a full pipe.
            while chunk_rx.recv().await.is_some() {}
            return;
        }
    };
    let mut offset = file.metadata().await.map(|m| m.len()).unwrap_or(0);

    while let Some(chunk) = chunk_rx.recv().await {
        match file.write_all(&chunk).await {
            Ok(()) => {
                offset += chunk.len() as u64;
                let _ = file.flush().await;
                broker.advance(&id, offset);
            }
            Err(e) => {
                tracing::error!(job = %id, error = %e, "output append failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
