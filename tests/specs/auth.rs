// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Authentication round-trip specs.

use super::prelude::*;
use mill_auth::{TokenError, TokenIssuer};
use mill_core::FakeClock;
use std::time::Duration;

#[tokio::test]
async fn add_user_then_authenticate_and_use_the_token() {
    let env = SpecEnv::new();
    env.seed_user("alice", "p@ss");

    let daemon = env.start().await;
    let service = daemon.service();

    // Immediate validation succeeds.
    let token = service.authenticate("alice", "p@ss").expect("authenticate");
    assert_eq!(service.resolve(&token).expect("resolve"), "alice");

    // Wrong password and unknown user fail identically at the boundary.
    for (user, pass) in [("alice", "nope"), ("mallory", "p@ss")] {
        let err = service.authenticate(user, pass).expect_err("must fail");
        assert_eq!(err.kind(), "authentication_failed");
    }

    // Malformed usernames are rejected before any lookup.
    let err = service.authenticate("not:a:user", "x").expect_err("must fail");
    assert_eq!(err.kind(), "validation_failed");
    daemon.shutdown().await;
}

#[tokio::test]
async fn tokens_die_after_lifetime_plus_grace() {
    // Driven directly against the issuer with a controllable clock; the
    // daemon's issuer is the same type over the system clock.
    let clock = FakeClock::new();
    let issuer =
        TokenIssuer::new(b"spec-suite-secret".to_vec(), 3600, clock.clone()).expect("issuer");

    let token = issuer.issue("alice").expect("issue");
    assert_eq!(issuer.validate(&token).expect("fresh token"), "alice");

    clock.advance(Duration::from_secs(3600 + 60));
    assert_eq!(issuer.validate(&token), Err(TokenError::Expired));
}

#[tokio::test]
async fn authentication_failures_have_no_side_effects() {
    let env = SpecEnv::new();
    env.seed_user("alice", "p@ss");
    let source = env.seed_repo_source("README.md", "demo\n");

    let daemon = env.start().await;
    let service = daemon.service();
    let token = service.authenticate("alice", "p@ss").expect("login");
    register_ready(&service, &token, "demo", &source).await;

    // A forged token cannot create jobs, and nothing is left behind.
    let err = service
        .create_job("forged-token", "demo", "echo intrusion", mill_core::JobOptions::default())
        .await
        .expect_err("must fail");
    assert_eq!(err.kind(), "authentication_failed");
    assert!(service.list_jobs(&token).expect("list").is_empty());
    daemon.shutdown().await;
}
