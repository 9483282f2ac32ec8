// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! User account record and username validation.

use serde::{Deserialize, Serialize};

/// Username length bounds: 3 to 32 characters total.
pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 32;

/// Why a username was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsernameError {
    #[error("username must be {USERNAME_MIN_LEN}-{USERNAME_MAX_LEN} characters, got {0}")]
    Length(usize),
    #[error("username must start with a letter")]
    BadStart,
    #[error("username contains invalid character {0:?}")]
    BadChar(char),
}

/// Validate a username against `^[A-Za-z][A-Za-z0-9_-]{2,31}$`.
pub fn validate_username(name: &str) -> Result<(), UsernameError> {
    let len = name.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(UsernameError::Length(len));
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        Some(_) | None => return Err(UsernameError::BadStart),
    }
    for c in chars {
        if !(c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(UsernameError::BadChar(c));
        }
    }
    Ok(())
}

/// A passwd-side account record. The password hash lives in the shadow
/// file, never in this struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    pub shell: String,
}

#[cfg(test)]
#[path = "user_tests.rs"]
mod tests;
