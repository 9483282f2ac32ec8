// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Typed subprocess launch descriptor.

use std::path::PathBuf;

/// Everything needed to start a child process.
///
/// The argv vector is passed to the OS as-is; user input (prompts, paths)
/// is never interpolated into a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Program followed by its arguments. Never empty.
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    /// Extra environment on top of the inherited one. Server secrets are
    /// scrubbed by the executor, not listed here.
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn new(argv: Vec<String>, cwd: PathBuf) -> Self {
        debug_assert!(!argv.is_empty(), "launch spec needs a program");
        Self { argv, cwd, env: Vec::new() }
    }

    pub fn env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.env.push((key.into(), val.into()));
        self
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }
}
