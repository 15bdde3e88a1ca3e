//! Bounded-concurrency file transfer with per-file retries.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics;

use super::types::{BackendError, DownloadInfo, DownloadReporter, DownloaderOptions};

/// A file to transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFile {
    pub name: String,
    pub size: u64,
}

impl TransferFile {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Performs a single attempt at transferring one file.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    async fn fetch(&self, file: &TransferFile) -> Result<(), BackendError>;
}

/// Drives a set of files through a [`FileFetcher`].
///
/// At most `max_concurrency` transfers run at once. A file is attempted
/// `max_retries + 1` times before the whole transfer fails; the first file to
/// exhaust its budget stops the remaining transfers.
#[derive(Debug, Clone)]
pub struct TransferQueue {
    files: Vec<TransferFile>,
    max_concurrency: usize,
    max_retries: u32,
    retry_delay: Duration,
}

impl TransferQueue {
    pub fn new(files: Vec<TransferFile>, options: DownloaderOptions) -> Self {
        Self {
            files,
            max_concurrency: options.max_concurrency.max(1),
            max_retries: options.max_retries,
            retry_delay: Duration::from_millis(200),
        }
    }

    /// Sets the pause between attempts of one file.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn pending_count(&self) -> usize {
        self.files.len()
    }

    pub fn pending_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn files(&self) -> &[TransferFile] {
        &self.files
    }

    /// Transfer every file, reporting progress after each completed file and
    /// an error for the first file that runs out of retries.
    pub async fn run(
        &self,
        fetcher: &dyn FileFetcher,
        reporter: &DownloadReporter,
        cancel: &CancellationToken,
    ) -> Result<(), BackendError> {
        let total_count = self.files.len();
        let total_bytes = self.pending_bytes();
        if total_count == 0 {
            return Ok(());
        }

        info!(
            files = total_count,
            bytes = total_bytes,
            max_concurrency = self.max_concurrency,
            max_retries = self.max_retries,
            "Starting file transfer"
        );

        let semaphore = Semaphore::new(self.max_concurrency);
        // Child token stops in-flight transfers on the first hard failure
        // without cancelling the caller.
        let abort = cancel.child_token();

        let mut pending: FuturesUnordered<_> = self
            .files
            .iter()
            .map(|file| {
                let semaphore = &semaphore;
                let abort = &abort;
                async move {
                    let result = self.transfer_one(fetcher, file, semaphore, abort).await;
                    (file, result)
                }
            })
            .collect();

        let mut progress = DownloadInfo::totals(total_count, total_bytes);
        let mut failure: Option<BackendError> = None;

        while let Some((file, result)) = pending.next().await {
            match result {
                Ok(()) => {
                    progress.current_count += 1;
                    progress.current_bytes += file.size;
                    progress.current_file = Some(file.name.clone());
                    metrics::FILES_DOWNLOADED.inc();
                    metrics::BYTES_DOWNLOADED.inc_by(file.size);
                    reporter.progress(progress.clone());
                }
                Err(BackendError::Cancelled) => {}
                Err(e) if failure.is_none() => {
                    reporter.file_error(&file.name, e.to_string());
                    abort.cancel();
                    failure = Some(e);
                }
                Err(e) => {
                    debug!(file = %file.name, "Additional file failure after abort: {}", e);
                }
            }
        }

        if let Some(e) = failure {
            warn!(
                completed = progress.current_count,
                total = total_count,
                "File transfer failed: {}",
                e
            );
            return Err(BackendError::DownloadFailed(format!(
                "{} of {} files transferred",
                progress.current_count, total_count
            )));
        }

        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        info!(
            files = progress.current_count,
            bytes = progress.current_bytes,
            "File transfer complete"
        );
        Ok(())
    }

    async fn transfer_one(
        &self,
        fetcher: &dyn FileFetcher,
        file: &TransferFile,
        semaphore: &Semaphore,
        cancel: &CancellationToken,
    ) -> Result<(), BackendError> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BackendError::Cancelled),
            permit = semaphore.acquire() => {
                permit.map_err(|e| BackendError::Internal(e.to_string()))?
            }
        };

        let attempts = self.max_retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                metrics::DOWNLOAD_RETRIES.inc();
                debug!(file = %file.name, attempt, "Retrying file transfer");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(BackendError::Cancelled),
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BackendError::Cancelled),
                result = fetcher.fetch(file) => result,
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        file = %file.name,
                        attempt,
                        max_attempts = attempts,
                        "File transfer attempt failed: {}",
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BackendError::DownloadFailed(file.name.clone())))
    }
}
