// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Daemon configuration: one TOML document plus environment overrides.
//!
//! Absent required values fail startup loudly; nothing falls back to a
//! guessed secret or an implicit directory.

use crate::engine::executor::ExecConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("cannot parse config {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("missing required config value: {0}")]
    Missing(&'static str),

    #[error("invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Daemon state directory (pid file, log, repo catalog).
    pub state_dir: PathBuf,
    /// Global concurrency cap for running jobs.
    pub max_concurrent: usize,
    pub job_timeout_seconds_default: u64,
    pub cancel_grace_seconds: u64,
    /// Jobs root: each job directory (state, output, workspace, uploads)
    /// lives directly under it.
    pub workspace_root: PathBuf,
    /// Canonical clones root.
    pub repos_root: PathBuf,
    pub token_secret: Vec<u8>,
    pub token_lifetime_seconds: u64,
    pub janitor_interval_seconds: u64,
    pub upload_retention_hours: u64,
    /// Assistant program (absolute path or name on PATH).
    pub assistant_cli_command: String,
    /// Fixed arguments inserted before the per-job prompt.
    pub assistant_cli_args: Vec<String>,
    /// Absent disables semantic index builds entirely.
    pub indexer_command: Option<String>,
    pub passwd_file: PathBuf,
    pub shadow_file: PathBuf,
    /// Root of the assistant CLI's on-disk session layout.
    pub sessions_root: PathBuf,
    /// Shutdown drain window.
    pub drain_seconds: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    max_concurrent: Option<usize>,
    job_timeout_seconds_default: Option<u64>,
    cancel_grace_seconds: Option<u64>,
    workspace_root: Option<PathBuf>,
    repos_root: Option<PathBuf>,
    token_secret: Option<String>,
    token_lifetime_seconds: Option<u64>,
    janitor_interval_seconds: Option<u64>,
    upload_retention_hours: Option<u64>,
    assistant_cli_command: Option<String>,
    assistant_cli_args: Option<Vec<String>>,
    indexer_command: Option<String>,
    passwd_file: Option<PathBuf>,
    shadow_file: Option<PathBuf>,
    sessions_root: Option<PathBuf>,
    drain_seconds: Option<u64>,
}

impl Config {
    /// Load and validate the config file at `path`.
    ///
    /// A missing file is treated as an empty document, which then fails on
    /// the first required value, so a misconfigured service cannot start
    /// half-blind. `MILL_TOKEN_SECRET` overrides the file's secret.
    pub fn load(path: &Path, state_dir: PathBuf) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str::<RawConfig>(&text)
                .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RawConfig::default(),
            Err(source) => return Err(ConfigError::Read { path: path.to_path_buf(), source }),
        };
        Self::from_raw(raw, state_dir)
    }

    fn from_raw(raw: RawConfig, state_dir: PathBuf) -> Result<Self, ConfigError> {
        let secret = std::env::var(crate::env::TOKEN_SECRET_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .or(raw.token_secret)
            .ok_or(ConfigError::Missing("token_secret"))?;

        let config = Self {
            state_dir,
            max_concurrent: raw.max_concurrent.unwrap_or(4),
            job_timeout_seconds_default: raw.job_timeout_seconds_default.unwrap_or(300),
            cancel_grace_seconds: raw.cancel_grace_seconds.unwrap_or(5),
            workspace_root: raw.workspace_root.ok_or(ConfigError::Missing("workspace_root"))?,
            repos_root: raw.repos_root.ok_or(ConfigError::Missing("repos_root"))?,
            token_secret: secret.into_bytes(),
            token_lifetime_seconds: raw.token_lifetime_seconds.unwrap_or(3600),
            janitor_interval_seconds: raw.janitor_interval_seconds.unwrap_or(300),
            upload_retention_hours: raw.upload_retention_hours.unwrap_or(24),
            assistant_cli_command: raw
                .assistant_cli_command
                .ok_or(ConfigError::Missing("assistant_cli_command"))?,
            assistant_cli_args: raw.assistant_cli_args.unwrap_or_default(),
            indexer_command: raw.indexer_command,
            passwd_file: raw.passwd_file.ok_or(ConfigError::Missing("passwd_file"))?,
            shadow_file: raw.shadow_file.ok_or(ConfigError::Missing("shadow_file"))?,
            sessions_root: match raw.sessions_root {
                Some(root) => root,
                None => default_sessions_root()?,
            },
            drain_seconds: raw.drain_seconds.unwrap_or(5),
        };
        config.validate()?;
        Ok(config)
    }

    /// Range and shape checks; every violation names its field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| ConfigError::Invalid {
            field,
            reason: reason.to_string(),
        };
        if self.max_concurrent < 1 {
            return Err(invalid("max_concurrent", "must be at least 1"));
        }
        if self.job_timeout_seconds_default < 1 {
            return Err(invalid("job_timeout_seconds_default", "must be at least 1"));
        }
        if self.token_secret.is_empty() {
            return Err(invalid("token_secret", "must not be empty"));
        }
        if self.token_lifetime_seconds < 60 {
            return Err(invalid("token_lifetime_seconds", "must be at least 60"));
        }
        if self.janitor_interval_seconds < 1 {
            return Err(invalid("janitor_interval_seconds", "must be at least 1"));
        }
        if self.upload_retention_hours < 1 {
            return Err(invalid("upload_retention_hours", "must be at least 1"));
        }
        if self.assistant_cli_command.is_empty() {
            return Err(invalid("assistant_cli_command", "must not be empty"));
        }
        for (field, path) in [
            ("workspace_root", &self.workspace_root),
            ("repos_root", &self.repos_root),
        ] {
            if !path.is_absolute() {
                return Err(invalid(field, "must be an absolute path"));
            }
        }
        Ok(())
    }

    pub fn exec_config(&self) -> ExecConfig {
        let mut argv = vec![self.assistant_cli_command.clone()];
        argv.extend(self.assistant_cli_args.iter().cloned());
        ExecConfig {
            assistant_argv: argv,
            default_timeout: Duration::from_secs(self.job_timeout_seconds_default),
            grace: Duration::from_secs(self.cancel_grace_seconds),
            scrub_env: vec![crate::env::TOKEN_SECRET_ENV.to_string()],
        }
    }

    pub fn jobs_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn repo_catalog_path(&self) -> PathBuf {
        self.state_dir.join("repos.json")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.state_dir.join("milld.pid")
    }

    pub fn log_path(&self) -> PathBuf {
        self.state_dir.join("milld.log")
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_seconds)
    }

    pub fn upload_retention(&self) -> Duration {
        Duration::from_secs(self.upload_retention_hours * 3600)
    }

    pub fn drain_window(&self) -> Duration {
        Duration::from_secs(self.drain_seconds)
    }
}

fn default_sessions_root() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().map(|home| home.join(".claude/projects")).ok_or(ConfigError::Invalid {
        field: "sessions_root",
        reason: "unset and no home directory to derive a default from".to_string(),
    })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
