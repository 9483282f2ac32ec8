// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

//! Output stream broker: multiplexes one append-only log to many readers.
//!
//! The executor is the single writer; it appends to `output.log` on disk
//! and publishes the new byte offset here. Subscribers each hold their own
//! read offset and pull bytes from the file, so a stalled reader costs
//! nothing: the writer never waits, and readers never hold more than one
//! chunk in memory.

use mill_core::JobId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;

/// Read chunk ceiling; bounds per-subscriber memory.
const CHUNK_SIZE: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Progress {
    offset: u64,
    terminal: bool,
}

/// One record per live job: the published write offset and its watchers.
#[derive(Clone, Default)]
pub struct OutputBroker {
    inner: Arc<Mutex<HashMap<JobId, watch::Sender<Progress>>>>,
}

impl OutputBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live job, starting from however many bytes are already
    /// on disk (zero for fresh jobs).
    pub fn open(&self, id: &JobId, existing_len: u64) {
        let (tx, _) = watch::channel(Progress { offset: existing_len, terminal: false });
        self.inner.lock().insert(id.clone(), tx);
    }

    /// Publish a new write offset. Called by the executor after each append.
    pub fn advance(&self, id: &JobId, offset: u64) {
        if let Some(tx) = self.inner.lock().get(id) {
            tx.send_modify(|p| p.offset = p.offset.max(offset));
        }
    }

    /// Mark the job terminal. Subscribers drain whatever remains and end.
    pub fn finish(&self, id: &JobId) {
        if let Some(tx) = self.inner.lock().get(id) {
            tx.send_modify(|p| p.terminal = true);
        }
    }

    /// Drop the record entirely (job deletion).
    pub fn close(&self, id: &JobId) {
        self.inner.lock().remove(id);
    }

    /// Attach a reader to a job's output log.
    ///
    /// The returned subscription yields all bytes already on disk, then
    /// follows appends, and ends after a final flush once the job is
    /// terminal. For jobs with no live record (already terminal), it
    /// replays the log from disk and ends. Dropping a subscription affects
    /// nobody else.
    pub fn subscribe(&self, id: &JobId, log_path: PathBuf) -> OutputSubscription {
        let rx = self.inner.lock().get(id).map(|tx| tx.subscribe());
        OutputSubscription { log_path, rx, read_offset: 0 }
    }
}

/// An independent reader over one job's output log.
pub struct OutputSubscription {
    log_path: PathBuf,
    rx: Option<watch::Receiver<Progress>>,
    read_offset: u64,
}

impl OutputSubscription {
    /// Next chunk of output, or `None` once the stream is complete.
    ///
    /// Bytes arrive in log order; chunk boundaries are arbitrary.
    pub async fn next_chunk(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            let target = match &self.rx {
                Some(rx) => *rx.borrow(),
                None => Progress { offset: self.disk_len().await?, terminal: true },
            };

            if self.read_offset < target.offset {
                let chunk = self.read_range(target.offset).await?;
                if !chunk.is_empty() {
                    return Ok(Some(chunk));
                }
                // Published offset ran ahead of a visible write; fall through
                // and wait for the file to catch up.
            }

            if target.terminal {
                return Ok(None);
            }

            let Some(rx) = &mut self.rx else { return Ok(None) };
            if rx.changed().await.is_err() {
                // Record closed underneath us: final flush from disk, then end.
                self.rx = None;
            }
        }
    }

    /// Drain the remaining stream into one buffer. Test and small-log helper.
    pub async fn collect(mut self) -> std::io::Result<Vec<u8>> {
        let mut all = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            all.extend_from_slice(&chunk);
        }
        Ok(all)
    }

    async fn disk_len(&self) -> std::io::Result<u64> {
        match tokio::fs::metadata(&self.log_path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    async fn read_range(&mut self, target: u64) -> std::io::Result<Vec<u8>> {
        let want = (target - self.read_offset).min(CHUNK_SIZE);
        let mut file = match tokio::fs::File::open(&self.log_path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        file.seek(SeekFrom::Start(self.read_offset)).await?;
        let mut buf = vec![0u8; want as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        self.read_offset += filled as u64;
        Ok(buf)
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
