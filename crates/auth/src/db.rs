// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! File-backed user database over a passwd/shadow pair.
//!
//! Readers go straight to the files; writers serialize on an advisory
//! lock, rewrite through a temp file + rename, and leave a timestamped
//! backup beside each modified file. Torn writes are therefore impossible
//! to observe: a reader sees either the old file or the new one.

use crate::crypt;
use crate::passwd::{PasswdEntry, ShadowEntry};
use crate::AuthError;
use fs2::FileExt;
use mill_core::{validate_username, User};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const SECONDS_PER_DAY: u64 = 86_400;

/// Result of a credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Ok(User),
    NotFound,
    BadPassword,
    /// Passwd entry exists but no shadow entry matches it.
    NoShadow,
}

/// A passwd entry paired with whether a shadow entry backs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user: User,
    pub has_shadow: bool,
    pub last_change_days: Option<u64>,
}

/// Inputs for creating a user. Unset fields get conventional defaults.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub home: Option<String>,
    pub shell: Option<String>,
}

/// The passwd/shadow pair at a configured location.
///
/// Cheap to clone; all state lives on disk.
#[derive(Debug, Clone)]
pub struct UserDb {
    passwd_path: PathBuf,
    shadow_path: PathBuf,
    lock_path: PathBuf,
}

impl UserDb {
    pub fn new(passwd_path: impl Into<PathBuf>, shadow_path: impl Into<PathBuf>) -> Self {
        let passwd_path = passwd_path.into();
        let lock_path = passwd_path.with_extension("lock");
        Self { passwd_path, shadow_path: shadow_path.into(), lock_path }
    }

    /// Check `username:password` against the pair.
    ///
    /// Malformed usernames are rejected before any file is read.
    pub fn verify(&self, username: &str, password: &str) -> Result<VerifyOutcome, AuthError> {
        validate_username(username)?;

        let passwd = self.read_passwd()?;
        let Some(entry) = passwd.iter().find(|e| e.username == username) else {
            return Ok(VerifyOutcome::NotFound);
        };

        let shadow = self.read_shadow()?;
        let Some(shadow_entry) = shadow.iter().find(|e| e.username == username) else {
            tracing::warn!(username, "passwd entry has no shadow entry");
            return Ok(VerifyOutcome::NoShadow);
        };

        if crypt::verify_password(password, &shadow_entry.password_hash) {
            Ok(VerifyOutcome::Ok(entry.to_user()))
        } else {
            Ok(VerifyOutcome::BadPassword)
        }
    }

    /// List all users with their shadow linkage.
    pub fn list(&self) -> Result<Vec<UserRecord>, AuthError> {
        let passwd = self.read_passwd()?;
        let shadow = self.read_shadow()?;
        Ok(passwd
            .iter()
            .map(|e| {
                let shadow_entry = shadow.iter().find(|s| s.username == e.username);
                UserRecord {
                    user: e.to_user(),
                    has_shadow: shadow_entry.is_some(),
                    last_change_days: shadow_entry.and_then(|s| s.last_change_days),
                }
            })
            .collect())
    }

    /// Create a user with a hashed password.
    pub fn add(&self, username: &str, password: &str, opts: NewUser) -> Result<User, AuthError> {
        validate_username(username)?;
        let hash = crypt::hash_password(password)?;

        let _guard = self.write_lock()?;
        let mut passwd = self.read_passwd()?;
        if passwd.iter().any(|e| e.username == username) {
            return Err(AuthError::UserExists(username.to_string()));
        }
        let mut shadow = self.read_shadow()?;

        let uid = opts.uid.unwrap_or_else(|| next_uid(&passwd));
        let entry = PasswdEntry {
            username: username.to_string(),
            uid,
            gid: opts.gid.unwrap_or(uid),
            gecos: String::new(),
            home: opts.home.unwrap_or_else(|| format!("/home/{username}")),
            shell: opts.shell.unwrap_or_else(|| "/bin/sh".to_string()),
        };
        let user = entry.to_user();
        passwd.push(entry);
        shadow.retain(|s| s.username != username);
        shadow.push(ShadowEntry::new(username, hash, today()));

        self.write_pair(&passwd, &shadow)?;
        tracing::info!(username, uid, "user added");
        Ok(user)
    }

    /// Remove a user from both files.
    pub fn remove(&self, username: &str) -> Result<(), AuthError> {
        validate_username(username)?;

        let _guard = self.write_lock()?;
        let mut passwd = self.read_passwd()?;
        let before = passwd.len();
        passwd.retain(|e| e.username != username);
        if passwd.len() == before {
            return Err(AuthError::UserNotFound(username.to_string()));
        }
        let mut shadow = self.read_shadow()?;
        shadow.retain(|s| s.username != username);

        self.write_pair(&passwd, &shadow)?;
        tracing::info!(username, "user removed");
        Ok(())
    }

    /// Replace a user's password hash.
    pub fn update_password(&self, username: &str, password: &str) -> Result<(), AuthError> {
        validate_username(username)?;
        let hash = crypt::hash_password(password)?;

        let _guard = self.write_lock()?;
        let passwd = self.read_passwd()?;
        if !passwd.iter().any(|e| e.username == username) {
            return Err(AuthError::UserNotFound(username.to_string()));
        }
        let mut shadow = self.read_shadow()?;
        shadow.retain(|s| s.username != username);
        shadow.push(ShadowEntry::new(username, hash, today()));

        self.write_shadow(&shadow)?;
        tracing::info!(username, "password updated");
        Ok(())
    }

    fn read_passwd(&self) -> Result<Vec<PasswdEntry>, AuthError> {
        let content = read_or_empty(&self.passwd_path)?;
        content
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, l)| PasswdEntry::parse(l, i + 1))
            .collect()
    }

    fn read_shadow(&self) -> Result<Vec<ShadowEntry>, AuthError> {
        let content = read_or_empty(&self.shadow_path)?;
        content
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, l)| ShadowEntry::parse(l, i + 1))
            .collect()
    }

    /// One writer at a time across all admin operations.
    fn write_lock(&self) -> Result<fs::File, AuthError> {
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| io_err(&self.lock_path, e))?;
        file.lock_exclusive().map_err(|e| io_err(&self.lock_path, e))?;
        Ok(file)
    }

    fn write_pair(
        &self,
        passwd: &[PasswdEntry],
        shadow: &[ShadowEntry],
    ) -> Result<(), AuthError> {
        let passwd_text: String = passwd.iter().map(|e| e.to_line() + "\n").collect();
        let shadow_text: String = shadow.iter().map(|e| e.to_line() + "\n").collect();
        atomic_replace(&self.passwd_path, &passwd_text)?;
        atomic_replace(&self.shadow_path, &shadow_text)?;
        Ok(())
    }

    fn write_shadow(&self, shadow: &[ShadowEntry]) -> Result<(), AuthError> {
        let shadow_text: String = shadow.iter().map(|e| e.to_line() + "\n").collect();
        atomic_replace(&self.shadow_path, &shadow_text)
    }
}

fn today() -> u64 {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    secs / SECONDS_PER_DAY
}

fn next_uid(passwd: &[PasswdEntry]) -> u32 {
    passwd.iter().map(|e| e.uid).filter(|&uid| uid >= 1000).max().map_or(1000, |uid| uid + 1)
}

fn read_or_empty(path: &Path) -> Result<String, AuthError> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Write-temp-then-rename, leaving a timestamped backup of the old file.
fn atomic_replace(path: &Path, content: &str) -> Result<(), AuthError> {
    if path.exists() {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
        let backup = path.with_extension(format!("bak.{stamp}"));
        fs::copy(path, &backup).map_err(|e| io_err(&backup, e))?;
    }

    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
        file.write_all(content.as_bytes()).map_err(|e| io_err(&tmp, e))?;
        file.sync_all().map_err(|e| io_err(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

fn io_err(path: &Path, source: std::io::Error) -> AuthError {
    AuthError::Io { path: path.display().to_string(), source }
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
