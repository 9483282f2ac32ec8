// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Centralized environment variable access for the daemon crate.

use crate::lifecycle::LifecycleError;
use std::path::{Path, PathBuf};

/// Overrides the config-file token secret when set.
pub const TOKEN_SECRET_ENV: &str = "MILL_TOKEN_SECRET";

/// Resolve the state directory:
/// `MILL_STATE_DIR` > `$XDG_STATE_HOME/taskmill` > `~/.local/state/taskmill`.
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("MILL_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("taskmill"));
    }
    dirs::home_dir()
        .map(|home| home.join(".local/state/taskmill"))
        .ok_or(LifecycleError::NoStateDir)
}

/// Default config file location inside a state directory.
pub fn config_path(state_dir: &Path) -> PathBuf {
    state_dir.join("config.toml")
}
