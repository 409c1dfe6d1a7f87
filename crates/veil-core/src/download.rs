//! Chunked, parallel, resumable downloads.
//!
//! ```text
//! content_length ──> DownloadJob ──> remaining_chunks ──> [semaphore: max_workers]
//!                       ^                                      │ fetch_range + positional write
//!                       │                                      v
//!                  <file>.ckpt  <──── CheckpointWriter (contiguous floor)
//! ```
//!
//! On the first failed chunk no further chunks are submitted, chunks already
//! in flight finish, and the error is returned with the checkpoint left in
//! place. A later call with `resume = true` continues from the floor.
//!
//! A server that answers a ranged request with the whole resource stops the
//! chunked transfer at once; the file is then fetched in one sequential
//! request instead.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::checkpoint::{self, CheckpointWriter};
use crate::config::DownloadConfig;
use crate::error::AppError;
use crate::models::{DownloadJob, MediaKind, checkpoint_path_for};
use crate::traits::RangeSource;

/// Fallback name when a URL has no usable last path segment.
pub const DEFAULT_FILE_NAME: &str = "index.html";

/// Downloads remote files into `download_dir` in parallel byte ranges.
#[derive(Clone)]
pub struct ResumableDownloader<S> {
    source: S,
    config: DownloadConfig,
    cancel: CancellationToken,
}

impl<S: RangeSource> ResumableDownloader<S> {
    pub fn new(source: S, config: DownloadConfig) -> Self {
        Self {
            source,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop submitting chunks when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Download `url` into the download directory and return the file path.
    ///
    /// `filename` defaults to the URL's last path segment, or
    /// [`DEFAULT_FILE_NAME`]. With `resume`, an existing checkpoint is honored.
    pub async fn download(
        &self,
        url: &str,
        filename: Option<&str>,
        resume: bool,
    ) -> Result<PathBuf, AppError> {
        let name = filename
            .and_then(sanitize_file_name)
            .or_else(|| file_name_from_url(url))
            .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());

        let total_size = self.source.content_length(url).await?;

        tokio::fs::create_dir_all(&self.config.download_dir).await?;
        let destination = self.config.download_dir.join(&name);
        let ckpt = checkpoint_path_for(&destination);

        let downloaded_offset = if resume {
            self.resume_offset(&destination, &ckpt, total_size).await
        } else {
            checkpoint::remove(&ckpt).await?;
            0
        };

        let job = DownloadJob {
            url: url.to_string(),
            destination,
            total_size,
            downloaded_offset,
            chunk_size: self.config.chunk_size.max(1),
        };

        tracing::info!(
            url = %job.url,
            file = %job.destination.display(),
            total = job.total_size,
            offset = job.downloaded_offset,
            "Starting download"
        );

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&job.destination)
            .await?;
        file.set_len(job.total_size).await?;
        drop(file);

        if !job.is_complete() {
            match self.transfer(&job).await {
                Err(AppError::RangeUnsupported(reason)) => {
                    tracing::warn!(url = %job.url, reason, "Ranges ignored, downloading sequentially");
                    self.transfer_whole(&job).await?;
                }
                other => other?,
            }
        }

        checkpoint::remove(&ckpt).await?;
        tracing::info!(file = %job.destination.display(), bytes = job.total_size, "Download complete");
        Ok(job.destination)
    }

    /// Download every URL in order, skipping failures.
    ///
    /// URLs without a usable file name are saved as `{kind}_{n}`, where `n`
    /// is the number of files saved so far.
    pub async fn download_many(&self, urls: &[String], kind: MediaKind) -> Vec<PathBuf> {
        let mut saved = Vec::new();
        for url in urls {
            if self.cancel.is_cancelled() {
                break;
            }
            let name = file_name_from_url(url).unwrap_or_else(|| format!("{kind}_{}", saved.len()));
            match self.download(url, Some(&name), true).await {
                Ok(path) => saved.push(path),
                Err(AppError::Cancelled) => break,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Skipping failed download");
                }
            }
        }
        saved
    }

    async fn resume_offset(&self, destination: &Path, ckpt: &Path, total_size: u64) -> u64 {
        let Some(record) = checkpoint::load(ckpt).await else {
            return 0;
        };
        if !tokio::fs::try_exists(destination).await.unwrap_or(false) {
            tracing::warn!(file = %destination.display(), "Checkpoint without data file, restarting");
            return 0;
        }
        if record.downloaded > total_size {
            tracing::warn!(
                file = %destination.display(),
                checkpoint = record.downloaded,
                total = total_size,
                "Checkpoint past end of resource, restarting"
            );
            return 0;
        }
        record.downloaded
    }

    /// Single-request fallback for servers without range support.
    async fn transfer_whole(&self, job: &DownloadJob) -> Result<(), AppError> {
        checkpoint::remove(&job.checkpoint_path()).await?;
        let written = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(AppError::Cancelled),
            written = self.source.fetch_all(&job.url, &job.destination) => written?,
        };
        if written != job.total_size {
            return Err(AppError::ChunkWriteFailure {
                start: 0,
                end: job.total_size.saturating_sub(1),
                message: format!("expected {} bytes, got {written}", job.total_size),
            });
        }
        Ok(())
    }

    async fn transfer(&self, job: &DownloadJob) -> Result<(), AppError> {
        let writer = CheckpointWriter::spawn(job.checkpoint_path(), job.downloaded_offset);
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let url: Arc<str> = Arc::from(job.url.as_str());
        let destination: Arc<Path> = Arc::from(job.destination.as_path());

        let mut tasks = JoinSet::new();
        let mut first_error: Option<AppError> = None;

        for (start, end) in job.remaining_chunks() {
            drain_finished(&mut tasks, &mut first_error);
            if first_error.is_some() {
                break;
            }

            let permit = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    first_error = Some(AppError::Cancelled);
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        first_error = Some(AppError::Cancelled);
                        break;
                    }
                },
            };

            // A chunk may have failed while we waited for the slot.
            drain_finished(&mut tasks, &mut first_error);
            if first_error.is_some() {
                break;
            }

            let source = self.source.clone();
            let url = Arc::clone(&url);
            let destination = Arc::clone(&destination);
            let done = writer.sender();
            tasks.spawn(async move {
                let _permit = permit;
                fetch_chunk(&source, &url, &destination, start, end, &done).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            record_outcome(joined, &mut first_error);
        }

        let floor = writer.finish().await?;

        match first_error {
            Some(e) => {
                tracing::warn!(
                    url = %job.url,
                    checkpoint = floor,
                    total = job.total_size,
                    error = %e,
                    "Download interrupted"
                );
                Err(e)
            }
            None if floor < job.total_size => Err(AppError::ChunkWriteFailure {
                start: floor,
                end: job.total_size - 1,
                message: "range never completed".to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn drain_finished(
    tasks: &mut JoinSet<Result<(), AppError>>,
    first_error: &mut Option<AppError>,
) {
    while let Some(joined) = tasks.try_join_next() {
        record_outcome(joined, first_error);
    }
}

fn record_outcome(
    joined: Result<Result<(), AppError>, tokio::task::JoinError>,
    first_error: &mut Option<AppError>,
) {
    let err = match joined {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(e) => AppError::Io(std::io::Error::other(format!("chunk task: {e}"))),
    };
    if first_error.is_none() {
        *first_error = Some(err);
    } else {
        tracing::debug!(error = %err, "Additional chunk failure");
    }
}

async fn fetch_chunk<S: RangeSource>(
    source: &S,
    url: &str,
    destination: &Path,
    start: u64,
    end: u64,
    done: &mpsc::UnboundedSender<(u64, u64)>,
) -> Result<(), AppError> {
    let chunk_error = |message: String| AppError::ChunkWriteFailure {
        start,
        end,
        message,
    };

    let bytes = source
        .fetch_range(url, start, end)
        .await
        .map_err(|e| match e {
            AppError::RangeUnsupported(_) => e,
            e => chunk_error(e.to_string()),
        })?;

    let expected = end - start + 1;
    if bytes.len() as u64 != expected {
        return Err(chunk_error(format!(
            "expected {expected} bytes, got {}",
            bytes.len()
        )));
    }

    write_at(destination, start, &bytes)
        .await
        .map_err(|e| chunk_error(e.to_string()))?;

    tracing::trace!(start, end, "Chunk written");
    let _ = done.send((start, end));
    Ok(())
}

async fn write_at(path: &Path, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(bytes).await?;
    file.flush().await
}

/// Last non-empty path segment of `url`, if it makes a safe file name.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    sanitize_file_name(segment)
}

fn sanitize_file_name(name: &str) -> Option<String> {
    let base = Path::new(name.trim()).file_name()?.to_str()?;
    (!base.is_empty() && base != "." && base != "..").then(|| base.to_string())
}
