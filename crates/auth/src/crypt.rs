// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! SHA-512 crypt password hashing.
//!
//! Hashes use the classical `$6$salt$hash` form so entries written by the
//! system `mkpasswd -m sha-512` (including `rounds=N` variants) verify the
//! same as our own.

use crate::AuthError;
use sha_crypt::{sha512_check, sha512_crypt_b64, Sha512Params, ROUNDS_DEFAULT};

/// Salt length for newly generated hashes: 16 url-safe characters.
pub const SALT_LEN: usize = 16;

/// Hash a password into `$6$salt$hash` with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = nanoid::nanoid!(SALT_LEN);
    let params =
        Sha512Params::new(ROUNDS_DEFAULT).map_err(|e| AuthError::Hash(format!("{e:?}")))?;
    let digest = sha512_crypt_b64(password.as_bytes(), salt.as_bytes(), &params)
        .map_err(|e| AuthError::Hash(format!("{e:?}")))?;
    Ok(format!("$6${salt}${digest}"))
}

/// Verify a password against a stored hash.
///
/// Only `$6$` (SHA-512 crypt) hashes are supported; anything else fails
/// verification rather than erroring, so a corrupted shadow entry reads as
/// a bad password instead of taking the store down.
pub fn verify_password(password: &str, stored: &str) -> bool {
    if !stored.starts_with("$6$") {
        return false;
    }
    sha512_check(password, stored).is_ok()
}

#[cfg(test)]
#[path = "crypt_tests.rs"]
mod tests;
