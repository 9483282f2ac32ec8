// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Assistant-CLI session discovery.
//!
//! The assistant CLI records each conversation under a per-directory
//! folder of session files named by UUID:
//!
//! ```text
//! <sessions_root>/<munged-directory-path>/<uuid>.jsonl
//! ```
//!
//! where munging replaces `/` and `.` in the absolute directory path with
//! `-`. We discover ids to support prompt continuation but never interpret
//! file contents. Missing layouts and unreadable files all read as "no
//! session" rather than errors.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionLocator {
    sessions_root: PathBuf,
}

impl SessionLocator {
    pub fn new(sessions_root: impl Into<PathBuf>) -> Self {
        Self { sessions_root: sessions_root.into() }
    }

    /// The per-directory session folder for `dir`.
    pub fn session_dir(&self, dir: &Path) -> PathBuf {
        self.sessions_root.join(munge_path(dir))
    }

    /// Most recently modified session id for `dir`, if any.
    pub fn latest(&self, dir: &Path) -> Option<Uuid> {
        self.scan(dir)
            .into_iter()
            .max_by_key(|(_, mtime)| *mtime)
            .map(|(id, _)| id)
    }

    /// All session ids for `dir`, newest first.
    pub fn list(&self, dir: &Path) -> Vec<Uuid> {
        let mut sessions = self.scan(dir);
        sessions.sort_by(|a, b| b.1.cmp(&a.1));
        sessions.into_iter().map(|(id, _)| id).collect()
    }

    pub fn exists(&self, dir: &Path, id: &Uuid) -> bool {
        self.scan(dir).iter().any(|(found, _)| found == id)
    }

    fn scan(&self, dir: &Path) -> Vec<(Uuid, SystemTime)> {
        let session_dir = self.session_dir(dir);
        let Ok(entries) = std::fs::read_dir(&session_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let path = entry.path();
                let id: Uuid = path.file_stem()?.to_str()?.parse().ok()?;
                let mtime = entry.metadata().ok()?.modified().ok()?;
                Some((id, mtime))
            })
            .collect()
    }
}

/// `/work/my.repo` → `-work-my-repo`
fn munge_path(dir: &Path) -> String {
    dir.display()
        .to_string()
        .chars()
        .map(|c| if c == '/' || c == '.' { '-' } else { c })
        .collect()
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
