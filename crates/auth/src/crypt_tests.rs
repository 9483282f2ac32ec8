// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

use super::*;

#[test]
fn hash_then_verify_round_trip() {
    let hash = hash_password("p@ss w0rd").unwrap();
    assert!(hash.starts_with("$6$"));
    assert!(verify_password("p@ss w0rd", &hash));
    assert!(!verify_password("p@ss w0rd!", &hash));
}

#[test]
fn salt_is_sixteen_urlsafe_chars() {
    let hash = hash_password("x").unwrap();
    let mut parts = hash.splitn(4, '$');
    parts.next(); // leading empty
    assert_eq!(parts.next(), Some("6"));
    let salt = parts.next().unwrap();
    assert_eq!(salt.len(), SALT_LEN);
    assert!(salt.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
}

#[test]
fn hashes_are_salted() {
    let a = hash_password("same").unwrap();
    let b = hash_password("same").unwrap();
    assert_ne!(a, b);
    assert!(verify_password("same", &a));
    assert!(verify_password("same", &b));
}

#[test]
fn accepts_external_mkpasswd_style_hash() {
    // mkpasswd -m sha-512 -S 0123456789abcdef -s <<< "secret"
    // (fixed salt so the vector is stable)
    let params = Sha512Params::new(ROUNDS_DEFAULT).unwrap();
    let digest = sha512_crypt_b64(b"secret", b"0123456789abcdef", &params).unwrap();
    let stored = format!("$6$0123456789abcdef${digest}");
    assert!(verify_password("secret", &stored));
}

#[test]
fn rejects_non_sha512_schemes() {
    assert!(!verify_password("x", "$1$abc$legacymd5hash"));
    assert!(!verify_password("x", "plaintext"));
    assert!(!verify_password("x", ""));
    assert!(!verify_password("x", "*"));
    assert!(!verify_password("x", "!locked"));
}
