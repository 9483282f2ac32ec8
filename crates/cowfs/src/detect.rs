// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Filesystem capability detection.

use crate::CloneError;
use mill_core::CowMode;
use std::path::Path;
use tokio::process::Command;

/// Probe what the filesystem under `dir` supports.
///
/// Reflink is probed empirically with a throwaway `cp --reflink=always`;
/// btrfs is recognized via `stat -f`. The result is only meaningful for
/// `dir`'s filesystem, so callers cache per directory.
pub async fn detect_mode(dir: &Path) -> CowMode {
    if probe_reflink(dir).await {
        return CowMode::Reflink;
    }
    if is_btrfs(dir).await && tool_exists("btrfs").await {
        return CowMode::Snapshot;
    }
    if tool_exists("rsync").await {
        return CowMode::Rsync;
    }
    CowMode::Copy
}

/// Try an actual reflink copy of a scratch file inside `dir`.
async fn probe_reflink(dir: &Path) -> bool {
    let probe = dir.join(format!(".reflink-probe-{}", std::process::id()));
    let probe_copy = probe.with_extension("copy");

    let prepared = tokio::fs::write(&probe, b"probe").await.is_ok();
    let supported = if prepared {
        Command::new("cp")
            .arg("--reflink=always")
            .arg(&probe)
            .arg(&probe_copy)
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    } else {
        false
    };

    let _ = tokio::fs::remove_file(&probe).await;
    let _ = tokio::fs::remove_file(&probe_copy).await;
    supported
}

async fn is_btrfs(dir: &Path) -> bool {
    let output = Command::new("stat").args(["-f", "-c", "%T"]).arg(dir).output().await;
    match output {
        Ok(out) if out.status.success() => {
            String::from_utf8_lossy(&out.stdout).trim() == "btrfs"
        }
        _ => false,
    }
}

async fn tool_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run an external copy tool, mapping failures onto [`CloneError`].
pub(crate) async fn run_tool(
    program: &str,
    args: &[&std::ffi::OsStr],
) -> Result<(), CloneError> {
    let output = match Command::new(program).args(args).output().await {
        Ok(out) => out,
        // A missing tool reads as a failed attempt so fallback chains engage.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CloneError::CopyFailed(format!("{program}: not found")));
        }
        Err(e) => return Err(CloneError::io(program, e)),
    };

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("No space left on device") {
        return Err(CloneError::NoSpace);
    }
    Err(CloneError::CopyFailed(format!("{program}: {}", stderr.trim())))
}

#[cfg(test)]
#[path = "detect_tests.rs"]
mod tests;
