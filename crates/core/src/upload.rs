// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Pre-start uploaded file record.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A file attached to a job before it starts.
///
/// Uploads are only accepted while the job status is `created`; names are
/// unique per job, and replacing an existing name requires an explicit
/// overwrite request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub original_name: String,
    pub stored_path: PathBuf,
    pub size: u64,
    pub content_type: String,
}
