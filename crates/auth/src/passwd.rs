// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Classical colon-separated passwd and shadow line formats.

use crate::AuthError;
use mill_core::User;

/// One line of the passwd file: `name:x:uid:gid:gecos:home:shell`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub home: String,
    pub shell: String,
}

impl PasswdEntry {
    pub fn parse(line: &str, lineno: usize) -> Result<Self, AuthError> {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 7 {
            return Err(AuthError::Malformed {
                file: "passwd",
                line: lineno,
                reason: format!("expected 7 fields, got {}", fields.len()),
            });
        }
        let uid = parse_u32(fields[2], "passwd", lineno, "uid")?;
        let gid = parse_u32(fields[3], "passwd", lineno, "gid")?;
        Ok(Self {
            username: fields[0].to_string(),
            uid,
            gid,
            gecos: fields[4].to_string(),
            home: fields[5].to_string(),
            shell: fields[6].to_string(),
        })
    }

    /// The password field is always `x`: real hashes live in shadow.
    pub fn to_line(&self) -> String {
        format!(
            "{}:x:{}:{}:{}:{}:{}",
            self.username, self.uid, self.gid, self.gecos, self.home, self.shell
        )
    }

    pub fn to_user(&self) -> User {
        User {
            username: self.username.clone(),
            uid: self.uid,
            gid: self.gid,
            home: self.home.clone(),
            shell: self.shell.clone(),
        }
    }
}

/// One line of the shadow file:
/// `name:hash:lastchange:min:max:warn:inactive:expire:flag`.
///
/// The aging fields are optional and preserved verbatim semantics-wise;
/// only `last_change_days` is interpreted by this system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowEntry {
    pub username: String,
    pub password_hash: String,
    pub last_change_days: Option<u64>,
    pub min_days: Option<u64>,
    pub max_days: Option<u64>,
    pub warn_days: Option<u64>,
    pub inactive_days: Option<u64>,
    pub expire_days: Option<u64>,
}

impl ShadowEntry {
    /// A new entry stamped with today's day number.
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>, now_days: u64) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
            last_change_days: Some(now_days),
            min_days: None,
            max_days: None,
            warn_days: None,
            inactive_days: None,
            expire_days: None,
        }
    }

    pub fn parse(line: &str, lineno: usize) -> Result<Self, AuthError> {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 9 {
            return Err(AuthError::Malformed {
                file: "shadow",
                line: lineno,
                reason: format!("expected 9 fields, got {}", fields.len()),
            });
        }
        Ok(Self {
            username: fields[0].to_string(),
            password_hash: fields[1].to_string(),
            last_change_days: parse_opt_u64(fields[2], "shadow", lineno, "lastchange")?,
            min_days: parse_opt_u64(fields[3], "shadow", lineno, "min")?,
            max_days: parse_opt_u64(fields[4], "shadow", lineno, "max")?,
            warn_days: parse_opt_u64(fields[5], "shadow", lineno, "warn")?,
            inactive_days: parse_opt_u64(fields[6], "shadow", lineno, "inactive")?,
            expire_days: parse_opt_u64(fields[7], "shadow", lineno, "expire")?,
        })
    }

    pub fn to_line(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}:{}:",
            self.username,
            self.password_hash,
            fmt_opt(self.last_change_days),
            fmt_opt(self.min_days),
            fmt_opt(self.max_days),
            fmt_opt(self.warn_days),
            fmt_opt(self.inactive_days),
            fmt_opt(self.expire_days),
        )
    }
}

fn fmt_opt(v: Option<u64>) -> String {
    v.map(|n| n.to_string()).unwrap_or_default()
}

fn parse_u32(
    field: &str,
    file: &'static str,
    line: usize,
    name: &str,
) -> Result<u32, AuthError> {
    field.parse().map_err(|_| AuthError::Malformed {
        file,
        line,
        reason: format!("bad {name}: {field:?}"),
    })
}

fn parse_opt_u64(
    field: &str,
    file: &'static str,
    line: usize,
    name: &str,
) -> Result<Option<u64>, AuthError> {
    if field.is_empty() {
        return Ok(None);
    }
    field.parse().map(Some).map_err(|_| AuthError::Malformed {
        file,
        line,
        reason: format!("bad {name}: {field:?}"),
    })
}

#[cfg(test)]
#[path = "passwd_tests.rs"]
mod tests;
