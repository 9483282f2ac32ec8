// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! The boundary facade a transport adapter calls into.
//!
//! Every operation takes a bearer token, resolves it to a subject, and
//! returns tagged error kinds the adapter maps to protocol codes. Failed
//! authentication never has side effects; owners may only act on their own
//! jobs.

use crate::engine::broker::OutputSubscription;
use crate::engine::{Engine, EngineError};
use crate::registry::{RegistryError, RepoEntry, RepoRegistry};
use crate::sessions::SessionLocator;
use crate::uploads::{self, UploadError};
use mill_auth::{AuthError, TokenIssuer, UserDb, VerifyOutcome};
use mill_core::{
    Clock, Job, JobId, JobOptions, JobSpec, RepoKind, Repository, StatusChange, UploadedFile,
    User,
};
use mill_storage::StoreError;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Boundary error kinds (outcomes, not types). [`ServiceError::kind`]
/// yields the wire-level tag.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("not authorized to act on this resource")]
    AuthorizationFailed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("storage failed: {0}")]
    StorageFailed(String),
}

impl ServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::AuthenticationFailed => "authentication_failed",
            ServiceError::AuthorizationFailed => "authorization_failed",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::ValidationFailed(_) => "validation_failed",
            ServiceError::StorageFailed(_) => "storage_failed",
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(id) => ServiceError::NotFound(id.to_string()),
            EngineError::Conflict(reason) => ServiceError::Conflict(reason),
            EngineError::Storage(e) => ServiceError::StorageFailed(e.to_string()),
        }
    }
}

impl From<RegistryError> for ServiceError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(name) => ServiceError::NotFound(name),
            RegistryError::NoSuchPath(path) => ServiceError::NotFound(path),
            RegistryError::Exists(name) => {
                ServiceError::Conflict(format!("repo {name} already registered"))
            }
            RegistryError::Busy(name, reason) => {
                ServiceError::Conflict(format!("repo {name} is busy: {reason}"))
            }
            RegistryError::NotReady(name, status) => {
                ServiceError::Conflict(format!("repo {name} is not ready ({status})"))
            }
            RegistryError::InvalidName(reason) => ServiceError::ValidationFailed(reason),
            RegistryError::PathEscape(path) => {
                ServiceError::ValidationFailed(format!("path escapes repo root: {path}"))
            }
            RegistryError::Io { .. } => ServiceError::StorageFailed(e.to_string()),
            RegistryError::Store(e) => ServiceError::StorageFailed(e.to_string()),
        }
    }
}

impl From<UploadError> for ServiceError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::InvalidName(reason) => ServiceError::ValidationFailed(reason),
            UploadError::Conflict(name) => {
                ServiceError::Conflict(format!("upload {name} already exists"))
            }
            UploadError::WrongStatus(status) => {
                ServiceError::Conflict(format!("job is {status}, uploads are closed"))
            }
            UploadError::Io { .. } => ServiceError::StorageFailed(e.to_string()),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        ServiceError::StorageFailed(e.to_string())
    }
}

pub struct Service<C: Clock> {
    engine: Arc<Engine<C>>,
    registry: Arc<RepoRegistry<C>>,
    users: UserDb,
    tokens: TokenIssuer<C>,
    sessions: SessionLocator,
}

impl<C: Clock> Service<C> {
    pub fn new(
        engine: Arc<Engine<C>>,
        registry: Arc<RepoRegistry<C>>,
        users: UserDb,
        tokens: TokenIssuer<C>,
        sessions: SessionLocator,
    ) -> Self {
        Self { engine, registry, users, tokens, sessions }
    }

    // === Authentication ===

    /// Verify credentials and mint a bearer token.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<String, ServiceError> {
        let outcome = self.users.verify(username, password).map_err(auth_err)?;
        match outcome {
            VerifyOutcome::Ok(user) => {
                self.tokens.issue(&user.username).map_err(|_| ServiceError::AuthenticationFailed)
            }
            VerifyOutcome::NotFound | VerifyOutcome::BadPassword | VerifyOutcome::NoShadow => {
                tracing::info!(username, "authentication rejected");
                Err(ServiceError::AuthenticationFailed)
            }
        }
    }

    /// Resolve a token to its subject.
    pub fn resolve(&self, token: &str) -> Result<String, ServiceError> {
        self.tokens.validate(token).map_err(|_| ServiceError::AuthenticationFailed)
    }

    // === User administration ===

    pub fn list_users(&self, token: &str) -> Result<Vec<User>, ServiceError> {
        self.resolve(token)?;
        let listing = self.users.list().map_err(auth_err)?;
        Ok(listing.into_iter().map(|record| record.user).collect())
    }

    pub fn add_user(
        &self,
        token: &str,
        username: &str,
        password: &str,
    ) -> Result<User, ServiceError> {
        self.resolve(token)?;
        self.users.add(username, password, mill_auth::db::NewUser::default()).map_err(auth_err)
    }

    pub fn remove_user(&self, token: &str, username: &str) -> Result<(), ServiceError> {
        self.resolve(token)?;
        self.users.remove(username).map_err(auth_err)
    }

    pub fn update_password(
        &self,
        token: &str,
        username: &str,
        password: &str,
    ) -> Result<(), ServiceError> {
        self.resolve(token)?;
        self.users.update_password(username, password).map_err(auth_err)
    }

    // === Jobs ===

    /// Create a job record against a registered repo. No workspace yet.
    pub async fn create_job(
        &self,
        token: &str,
        repo_name: &str,
        prompt: &str,
        options: JobOptions,
    ) -> Result<Job, ServiceError> {
        let subject = self.resolve(token)?;
        if prompt.trim().is_empty() {
            return Err(ServiceError::ValidationFailed("prompt must not be empty".to_string()));
        }
        let repo = self
            .registry
            .get(repo_name)
            .ok_or_else(|| ServiceError::NotFound(repo_name.to_string()))?;
        if !repo.registration_status.is_usable() {
            return Err(ServiceError::Conflict(format!(
                "repo {repo_name} is not ready ({})",
                repo.registration_status
            )));
        }
        repo.effective_index_aware(options.index_aware)
            .map_err(|e| ServiceError::ValidationFailed(e.to_string()))?;

        let spec = JobSpec {
            owner: subject,
            repo_name: repo_name.to_string(),
            prompt: prompt.to_string(),
            options,
        };
        Ok(self.engine.create(spec).await?)
    }

    /// Admit a job to the queue. Idempotent while queued.
    pub async fn start_job(&self, token: &str, id: &JobId) -> Result<Job, ServiceError> {
        self.owned_job(token, id)?;
        Ok(self.engine.start(id).await?)
    }

    /// Cancel a job; no-op success when already cancelled.
    pub async fn cancel_job(&self, token: &str, id: &JobId) -> Result<Job, ServiceError> {
        self.owned_job(token, id)?;
        Ok(self.engine.cancel(id).await?)
    }

    /// Destroy a job and its workspace; running jobs are cancelled first.
    pub async fn delete_job(&self, token: &str, id: &JobId) -> Result<(), ServiceError> {
        self.owned_job(token, id)?;
        Ok(self.engine.delete(id).await?)
    }

    /// The workspace record of a materialized job.
    pub fn get_workspace(
        &self,
        token: &str,
        id: &JobId,
    ) -> Result<Option<mill_core::Workspace>, ServiceError> {
        Ok(self.owned_job(token, id)?.workspace())
    }

    /// One job with its advisory queue position.
    pub fn get_job(
        &self,
        token: &str,
        id: &JobId,
    ) -> Result<(Job, Option<usize>), ServiceError> {
        let job = self.owned_job(token, id)?;
        let position = self.engine.get(id).and_then(|(_, position)| position);
        Ok((job, position))
    }

    /// All jobs belonging to the caller, oldest first.
    pub fn list_jobs(&self, token: &str) -> Result<Vec<Job>, ServiceError> {
        let subject = self.resolve(token)?;
        Ok(self.engine.list().into_iter().filter(|j| j.owner == subject).collect())
    }

    /// Attach a pre-start upload to a job.
    pub async fn upload(
        &self,
        token: &str,
        id: &JobId,
        name: &str,
        bytes: &[u8],
        content_type: &str,
        overwrite: bool,
    ) -> Result<UploadedFile, ServiceError> {
        let mut job = self.owned_job(token, id)?;
        let record =
            uploads::store_upload(self.engine.store(), &mut job, name, bytes, content_type, overwrite)
                .await?;
        match self.engine.record_upload(id, record.clone()).await {
            Ok(_) => Ok(record),
            Err(e) => {
                // The job moved on between the snapshot and the record;
                // unstage the bytes so nothing dangles.
                let _ = tokio::fs::remove_file(&record.stored_path).await;
                Err(e.into())
            }
        }
    }

    /// Follow a job's output log. Yields existing bytes, then appends,
    /// then ends after the job reaches a terminal status.
    pub fn subscribe_output(
        &self,
        token: &str,
        id: &JobId,
    ) -> Result<OutputSubscription, ServiceError> {
        self.owned_job(token, id)?;
        Ok(self.engine.broker().subscribe(id, self.engine.store().output_path(id)))
    }

    /// Job status change notifications (all jobs; consumers filter).
    pub fn events(&self) -> broadcast::Receiver<StatusChange> {
        self.engine.subscribe_events()
    }

    // === Assistant sessions ===

    /// Most recent assistant session recorded in a job's workspace.
    pub fn latest_session(&self, token: &str, id: &JobId) -> Result<Option<Uuid>, ServiceError> {
        let job = self.owned_job(token, id)?;
        Ok(job.workspace_path.as_deref().and_then(|dir| self.sessions.latest(dir)))
    }

    pub fn list_sessions(&self, token: &str, id: &JobId) -> Result<Vec<Uuid>, ServiceError> {
        let job = self.owned_job(token, id)?;
        Ok(job
            .workspace_path
            .as_deref()
            .map(|dir| self.sessions.list(dir))
            .unwrap_or_default())
    }

    pub fn session_exists(
        &self,
        token: &str,
        id: &JobId,
        session: &Uuid,
    ) -> Result<bool, ServiceError> {
        let job = self.owned_job(token, id)?;
        Ok(job
            .workspace_path
            .as_deref()
            .map(|dir| self.sessions.exists(dir, session))
            .unwrap_or(false))
    }

    // === Repositories ===

    pub async fn register_repo(
        &self,
        token: &str,
        name: &str,
        kind: RepoKind,
        source_url: &str,
        index_aware: bool,
    ) -> Result<Repository, ServiceError> {
        self.resolve(token)?;
        Ok(self.registry.register(name, kind, source_url.to_string(), index_aware).await?)
    }

    /// Unregister a repo. Refused while any non-terminal job references it.
    pub async fn unregister_repo(&self, token: &str, name: &str) -> Result<(), ServiceError> {
        self.resolve(token)?;
        if self.engine.repo_in_use(name) {
            return Err(ServiceError::Conflict(format!(
                "repo {name} has jobs that must complete first"
            )));
        }
        Ok(self.registry.unregister(name).await?)
    }

    pub fn get_repo(&self, token: &str, name: &str) -> Result<Repository, ServiceError> {
        self.resolve(token)?;
        self.registry.get(name).ok_or_else(|| ServiceError::NotFound(name.to_string()))
    }

    pub fn list_repos(&self, token: &str) -> Result<Vec<Repository>, ServiceError> {
        self.resolve(token)?;
        Ok(self.registry.list())
    }

    /// List a directory of the canonical clone (never a job workspace).
    pub async fn browse_repo(
        &self,
        token: &str,
        name: &str,
        path: &str,
    ) -> Result<Vec<RepoEntry>, ServiceError> {
        self.resolve(token)?;
        Ok(self.registry.list_dir(name, path).await?)
    }

    /// Read a file from the canonical clone.
    pub async fn read_repo_file(
        &self,
        token: &str,
        name: &str,
        path: &str,
    ) -> Result<Vec<u8>, ServiceError> {
        self.resolve(token)?;
        Ok(self.registry.read_content(name, path).await?)
    }

    /// Resolve, authorize, and snapshot a job in one step.
    fn owned_job(&self, token: &str, id: &JobId) -> Result<Job, ServiceError> {
        let subject = self.resolve(token)?;
        let (job, _) =
            self.engine.get(id).ok_or_else(|| ServiceError::NotFound(id.to_string()))?;
        if job.owner != subject {
            return Err(ServiceError::AuthorizationFailed);
        }
        Ok(job)
    }
}

fn auth_err(e: AuthError) -> ServiceError {
    match e {
        AuthError::InvalidUsername(e) => ServiceError::ValidationFailed(e.to_string()),
        AuthError::UserExists(name) => {
            ServiceError::Conflict(format!("user {name} already exists"))
        }
        AuthError::UserNotFound(name) => ServiceError::NotFound(name),
        other => ServiceError::StorageFailed(other.to_string()),
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
