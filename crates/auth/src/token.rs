// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Stateless HMAC-signed bearer tokens.
//!
//! A token is `base64url(claims-json) "." base64url(hmac-sha256)`. Nothing
//! is stored server-side; validation re-derives the signature from the
//! process-wide secret.

use crate::TokenError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use mill_core::Clock;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Minimum configurable token lifetime.
pub const MIN_LIFETIME_SECS: u64 = 60;

/// A token is treated as expired this long before its recorded expiry, so
/// a caller holding a nearly-dead token never has it die mid-operation.
pub const EXPIRY_SKEW_SECS: u64 = 60;

/// Signed token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Authenticated subject (username).
    pub sub: String,
    /// Issue time, epoch seconds.
    pub iat: u64,
    /// Expiry, epoch seconds.
    pub exp: u64,
}

/// Mints and validates bearer tokens.
#[derive(Clone)]
pub struct TokenIssuer<C: Clock> {
    secret: Vec<u8>,
    lifetime_secs: u64,
    clock: C,
}

impl<C: Clock> TokenIssuer<C> {
    /// An unset or empty secret is a startup error, not a runtime fallback.
    pub fn new(secret: impl Into<Vec<u8>>, lifetime_secs: u64, clock: C) -> Result<Self, TokenError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        if lifetime_secs < MIN_LIFETIME_SECS {
            return Err(TokenError::LifetimeTooShort {
                min: MIN_LIFETIME_SECS,
                got: lifetime_secs,
            });
        }
        Ok(Self { secret, lifetime_secs, clock })
    }

    /// Mint a token for an authenticated subject.
    pub fn issue(&self, subject: &str) -> Result<String, TokenError> {
        if subject.is_empty() {
            return Err(TokenError::EmptySubject);
        }
        let now = self.clock.epoch_secs();
        let claims =
            TokenClaims { sub: subject.to_string(), iat: now, exp: now + self.lifetime_secs };
        let payload = serde_json::to_vec(&claims).map_err(|_| TokenError::Malformed)?;
        let encoded = URL_SAFE_NO_PAD.encode(payload);
        let sig = self.sign(encoded.as_bytes());
        Ok(format!("{encoded}.{}", URL_SAFE_NO_PAD.encode(sig)))
    }

    /// Validate a presented token and return its subject.
    pub fn validate(&self, token: &str) -> Result<String, TokenError> {
        let (payload, sig) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let sig_bytes = URL_SAFE_NO_PAD.decode(sig).map_err(|_| TokenError::Malformed)?;

        // Constant-time comparison via the Mac verifier.
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig_bytes).map_err(|_| TokenError::BadSignature)?;

        let claims_bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|_| TokenError::Malformed)?;
        let claims: TokenClaims =
            serde_json::from_slice(&claims_bytes).map_err(|_| TokenError::Malformed)?;
        if claims.sub.is_empty() {
            return Err(TokenError::EmptySubject);
        }
        let now = self.clock.epoch_secs();
        if now + EXPIRY_SKEW_SECS >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims.sub)
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = self.mac();
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any nonzero length; emptiness was rejected
        // in the constructor.
        #[allow(clippy::unwrap_used)]
        HmacSha256::new_from_slice(&self.secret).unwrap()
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
