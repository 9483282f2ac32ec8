// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Pre-start file uploads.
//!
//! Files attach to a job only while it is still `created`. Names are
//! unique per job; replacing an existing name requires an explicit
//! overwrite request and otherwise conflicts.

use mill_core::{Job, JobStatus, UploadedFile};
use mill_storage::JobStore;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid upload name: {0}")]
    InvalidName(String),

    #[error("upload {0} already exists")]
    Conflict(String),

    #[error("uploads are only accepted while the job is created, not {0}")]
    WrongStatus(JobStatus),

    #[error("io error on {path}: {source}")]
    Io { path: String, source: std::io::Error },
}

/// Upload names are plain file names, never paths.
fn validate_name(name: &str) -> Result<(), UploadError> {
    let bad = |reason: &str| UploadError::InvalidName(format!("{name:?}: {reason}"));
    if name.is_empty() || name.len() > 255 {
        return Err(bad("must be 1-255 characters"));
    }
    if name == "." || name == ".." {
        return Err(bad("reserved name"));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(bad("must not contain path separators"));
    }
    Ok(())
}

/// Stage an upload for a job and record it on the job.
///
/// The caller persists the updated record afterwards. `overwrite=true`
/// replaces an existing upload of the same name; `overwrite=false`
/// conflicts on collision.
pub async fn store_upload(
    store: &JobStore,
    job: &mut Job,
    name: &str,
    bytes: &[u8],
    content_type: &str,
    overwrite: bool,
) -> Result<UploadedFile, UploadError> {
    validate_name(name)?;
    if job.status != JobStatus::Created {
        return Err(UploadError::WrongStatus(job.status));
    }
    if job.upload(name).is_some() && !overwrite {
        return Err(UploadError::Conflict(name.to_string()));
    }

    let dir = store.uploads_dir(&job.id);
    tokio::fs::create_dir_all(&dir).await.map_err(|e| io_err(&dir, e))?;
    let stored_path = dir.join(name);
    tokio::fs::write(&stored_path, bytes).await.map_err(|e| io_err(&stored_path, e))?;

    let record = UploadedFile {
        original_name: name.to_string(),
        stored_path,
        size: bytes.len() as u64,
        content_type: content_type.to_string(),
    };
    job.uploads.retain(|u| u.original_name != name);
    job.uploads.push(record.clone());
    tracing::info!(job = %job.id, name, size = record.size, "upload stored");
    Ok(record)
}

fn io_err(path: &Path, source: std::io::Error) -> UploadError {
    UploadError::Io { path: path.display().to_string(), source }
}

#[cfg(test)]
#[path = "uploads_tests.rs"]
mod tests;
