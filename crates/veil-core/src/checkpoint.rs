//! Download checkpoints: `<file>.ckpt` holding `{"downloaded": n}`.
//!
//! Chunks complete out of order, so the recorded offset is the contiguous
//! floor: every byte below it is on disk. A single writer task owns the file
//! and replaces it atomically (temp file + rename), so readers never see a
//! torn record and the value never decreases within one run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::models::CheckpointRecord;

/// Read a checkpoint. A missing or unreadable record means "start over".
pub async fn load(path: &Path) -> Option<CheckpointRecord> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Unreadable checkpoint, restarting");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Corrupt checkpoint, restarting");
            None
        }
    }
}

/// Atomically replace the checkpoint at `path`.
pub async fn store(path: &Path, record: CheckpointRecord) -> Result<(), AppError> {
    let tmp = temp_path(path);
    let body = serde_json::to_vec(&record)?;
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Delete the checkpoint, ignoring a missing file.
pub async fn remove(path: &Path) -> Result<(), AppError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Tracks completed inclusive ranges and the contiguous floor below which
/// everything is done.
#[derive(Debug)]
pub struct ContiguousProgress {
    floor: u64,
    /// start -> end (inclusive) of chunks finished above the floor.
    pending: BTreeMap<u64, u64>,
}

impl ContiguousProgress {
    pub fn new(floor: u64) -> Self {
        Self {
            floor,
            pending: BTreeMap::new(),
        }
    }

    pub fn floor(&self) -> u64 {
        self.floor
    }

    /// Record chunk `start..=end`. Returns the new floor if it advanced.
    pub fn complete(&mut self, start: u64, end: u64) -> Option<u64> {
        if end < self.floor {
            return None;
        }
        self.pending.insert(start, end);

        let before = self.floor;
        while let Some(end) = self.pending.remove(&self.floor) {
            self.floor = end + 1;
        }
        (self.floor > before).then_some(self.floor)
    }
}

/// Handle to the single checkpoint writer of one download.
pub struct CheckpointWriter {
    tx: mpsc::UnboundedSender<(u64, u64)>,
    handle: JoinHandle<Result<u64, AppError>>,
}

impl CheckpointWriter {
    /// Spawn the writer for `path`, starting at `floor`.
    pub fn spawn(path: PathBuf, floor: u64) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(u64, u64)>();
        let handle = tokio::spawn(async move {
            let mut progress = ContiguousProgress::new(floor);
            let mut write_error = None;
            while let Some((start, end)) = rx.recv().await {
                let Some(downloaded) = progress.complete(start, end) else {
                    continue;
                };
                if write_error.is_some() {
                    continue;
                }
                if let Err(e) = store(&path, CheckpointRecord { downloaded }).await {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to persist checkpoint");
                    write_error = Some(e);
                }
            }
            match write_error {
                Some(e) => Err(e),
                None => Ok(progress.floor()),
            }
        });
        Self { tx, handle }
    }

    /// A sender for completed chunk ranges.
    pub fn sender(&self) -> mpsc::UnboundedSender<(u64, u64)> {
        self.tx.clone()
    }

    /// Wait for all reported chunks to be persisted; returns the final floor.
    ///
    /// Every cloned sender must be dropped first.
    pub async fn finish(self) -> Result<u64, AppError> {
        drop(self.tx);
        self.handle
            .await
            .map_err(|e| AppError::Io(std::io::Error::other(format!("checkpoint writer: {e}"))))?
    }
}
