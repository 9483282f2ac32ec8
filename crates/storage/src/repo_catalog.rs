// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Persistent map of registered repositories.

use crate::{write_atomic, StoreError};
use mill_core::{IndexStatus, RegistrationStatus, Repository};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Default)]
struct CatalogDoc {
    repos: BTreeMap<String, Repository>,
}

/// One JSON document holding every repository record, written atomically
/// on each registry mutation.
#[derive(Debug, Clone)]
pub struct RepoCatalog {
    path: PathBuf,
}

impl RepoCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the catalog; a missing file is an empty catalog.
    pub async fn load(&self) -> Result<BTreeMap<String, Repository>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        let doc: CatalogDoc =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::corrupt(&self.path, e))?;
        Ok(doc.repos)
    }

    /// Load and demote registrations interrupted by a restart: the clone or
    /// index task died with the host, so their repos land in the matching
    /// terminal failure state.
    pub async fn load_recovered(&self) -> Result<BTreeMap<String, Repository>, StoreError> {
        let mut repos = self.load().await?;
        let mut dirty = false;
        for repo in repos.values_mut() {
            match repo.registration_status {
                RegistrationStatus::Registering | RegistrationStatus::Cloning => {
                    tracing::warn!(repo = %repo.name, "clone interrupted by restart");
                    repo.registration_status = RegistrationStatus::CloneFailed;
                    dirty = true;
                }
                RegistrationStatus::Indexing => {
                    tracing::warn!(repo = %repo.name, "index build interrupted by restart");
                    repo.registration_status = RegistrationStatus::IndexFailed;
                    repo.index_status = IndexStatus::Failed;
                    dirty = true;
                }
                _ => {}
            }
        }
        if dirty {
            self.save(&repos).await?;
        }
        Ok(repos)
    }

    /// Persist the full catalog atomically.
    pub async fn save(&self, repos: &BTreeMap<String, Repository>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| StoreError::io(parent, e))?;
        }
        let doc = CatalogDoc { repos: repos.clone() };
        let bytes =
            serde_json::to_vec_pretty(&doc).map_err(|e| StoreError::corrupt(&self.path, e))?;
        write_atomic(&self.path, &bytes).await
    }
}

#[cfg(test)]
#[path = "repo_catalog_tests.rs"]
mod tests;
