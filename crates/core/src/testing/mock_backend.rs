//! Mock asset backend for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::backend::{
    AssetBackend, BackendError, CacheClearMode, DownloadReporter, DownloaderOptions,
    FileFetcher, InitParameters, PackageDownloader, TransferFile, TransferQueue,
};

/// Backend operations that can be made to fail or stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Initialize,
    RequestVersion,
    ApplyManifest,
    ClearCache,
}

/// A recorded backend call for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Initialize {
        package: String,
        params: InitParameters,
    },
    RequestVersion {
        package: String,
    },
    ApplyManifest {
        package: String,
        version: String,
    },
    CreateDownloader {
        package: String,
        options: DownloaderOptions,
    },
    ClearCache {
        package: String,
        mode: CacheClearMode,
    },
}

/// A file fetched by a mock downloader.
#[derive(Debug, Clone)]
pub struct RecordedFetch {
    pub file: String,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Shared state between the backend and the downloaders it creates.
#[derive(Debug, Default)]
struct FetchState {
    /// Remaining failures per file name; `u32::MAX` fails forever.
    failures: HashMap<String, u32>,
    fetched: Vec<RecordedFetch>,
    delay: Duration,
}

/// Mock implementation of the AssetBackend trait.
///
/// Provides controllable behavior for testing:
/// - Configure the latest version and the files pending download
/// - Fail or delay individual operations
/// - Fail individual files a number of times
/// - Record every call for assertions
///
/// # Example
///
/// ```rust,ignore
/// let backend = MockAssetBackend::new();
/// backend.set_pending_files(vec![TransferFile::new("ui.bundle", 1024)]).await;
/// backend.fail_file("ui.bundle", u32::MAX).await;
///
/// let mut op = PatchOperation::new("DefaultPackage", PlayMode::Host, config, Arc::new(backend.clone()))?;
/// let report = op.run().await?;
/// assert!(!report.succeeded());
/// ```
#[derive(Debug, Clone)]
pub struct MockAssetBackend {
    latest_version: Arc<RwLock<String>>,
    pending: Arc<RwLock<Vec<TransferFile>>>,
    errors: Arc<RwLock<HashMap<BackendOp, BackendError>>>,
    package_errors: Arc<RwLock<HashMap<(String, BackendOp), BackendError>>>,
    delays: Arc<RwLock<HashMap<BackendOp, Duration>>>,
    calls: Arc<RwLock<Vec<RecordedCall>>>,
    fetch: Arc<RwLock<FetchState>>,
    retry_delay: Duration,
}

impl Default for MockAssetBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAssetBackend {
    /// Create a backend reporting version `1.0.1` with nothing to download.
    pub fn new() -> Self {
        Self {
            latest_version: Arc::new(RwLock::new("1.0.1".to_string())),
            pending: Arc::new(RwLock::new(Vec::new())),
            errors: Arc::new(RwLock::new(HashMap::new())),
            package_errors: Arc::new(RwLock::new(HashMap::new())),
            delays: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            fetch: Arc::new(RwLock::new(FetchState::default())),
            retry_delay: Duration::from_millis(1),
        }
    }

    pub async fn set_latest_version(&self, version: impl Into<String>) {
        *self.latest_version.write().await = version.into();
    }

    /// Files the next downloader will report as pending.
    pub async fn set_pending_files(&self, files: Vec<TransferFile>) {
        *self.pending.write().await = files;
    }

    /// Make `op` fail with `error` on every call.
    pub async fn set_error(&self, op: BackendOp, error: BackendError) {
        self.errors.write().await.insert(op, error);
    }

    pub async fn clear_error(&self, op: BackendOp) {
        self.errors.write().await.remove(&op);
    }

    /// Make `op` fail with `error` for `package` only.
    pub async fn set_package_error(
        &self,
        package: impl Into<String>,
        op: BackendOp,
        error: BackendError,
    ) {
        self.package_errors
            .write()
            .await
            .insert((package.into(), op), error);
    }

    /// Make `op` take `delay` before completing.
    pub async fn set_delay(&self, op: BackendOp, delay: Duration) {
        self.delays.write().await.insert(op, delay);
    }

    /// Fail the next `times` attempts to fetch `file`.
    pub async fn fail_file(&self, file: impl Into<String>, times: u32) {
        self.fetch.write().await.failures.insert(file.into(), times);
    }

    /// Make each file fetch take `delay`.
    pub async fn set_fetch_delay(&self, delay: Duration) {
        self.fetch.write().await.delay = delay;
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    pub async fn fetched_files(&self) -> Vec<String> {
        self.fetch
            .read()
            .await
            .fetched
            .iter()
            .map(|f| f.file.clone())
            .collect()
    }

    async fn record(&self, call: RecordedCall) {
        self.calls.write().await.push(call);
    }

    async fn simulate(&self, package: &str, op: BackendOp) -> Result<(), BackendError> {
        let delay = self.delays.read().await.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let key = (package.to_string(), op);
        if let Some(error) = self.package_errors.read().await.get(&key) {
            return Err(error.clone());
        }
        match self.errors.read().await.get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AssetBackend for MockAssetBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn initialize_package(
        &self,
        package: &str,
        params: InitParameters,
    ) -> Result<(), BackendError> {
        self.record(RecordedCall::Initialize {
            package: package.to_string(),
            params,
        })
        .await;
        self.simulate(package, BackendOp::Initialize).await
    }

    async fn request_latest_version(&self, package: &str) -> Result<String, BackendError> {
        self.record(RecordedCall::RequestVersion {
            package: package.to_string(),
        })
        .await;
        self.simulate(package, BackendOp::RequestVersion).await?;
        Ok(self.latest_version.read().await.clone())
    }

    async fn apply_manifest(&self, package: &str, version: &str) -> Result<(), BackendError> {
        self.record(RecordedCall::ApplyManifest {
            package: package.to_string(),
            version: version.to_string(),
        })
        .await;
        self.simulate(package, BackendOp::ApplyManifest).await
    }

    async fn create_downloader(
        &self,
        package: &str,
        options: DownloaderOptions,
    ) -> Box<dyn PackageDownloader> {
        self.record(RecordedCall::CreateDownloader {
            package: package.to_string(),
            options,
        })
        .await;

        let files = self.pending.read().await.clone();
        Box::new(MockDownloader {
            queue: TransferQueue::new(files, options).with_retry_delay(self.retry_delay),
            fetcher: MockFetcher {
                state: Arc::clone(&self.fetch),
            },
        })
    }

    async fn clear_cache(&self, package: &str, mode: CacheClearMode) -> Result<(), BackendError> {
        self.record(RecordedCall::ClearCache {
            package: package.to_string(),
            mode,
        })
        .await;
        self.simulate(package, BackendOp::ClearCache).await
    }
}

struct MockFetcher {
    state: Arc<RwLock<FetchState>>,
}

#[async_trait]
impl FileFetcher for MockFetcher {
    async fn fetch(&self, file: &TransferFile) -> Result<(), BackendError> {
        let delay = self.state.read().await.delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        if let Some(left) = state.failures.get_mut(&file.name) {
            if *left > 0 {
                if *left != u32::MAX {
                    *left -= 1;
                }
                return Err(BackendError::ConnectionFailed(format!(
                    "{}: HTTP 503",
                    file.name
                )));
            }
        }

        state.fetched.push(RecordedFetch {
            file: file.name.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

/// Downloader returned by [`MockAssetBackend`], backed by a [`TransferQueue`].
pub struct MockDownloader {
    queue: TransferQueue,
    fetcher: MockFetcher,
}

#[async_trait]
impl PackageDownloader for MockDownloader {
    fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    fn pending_bytes(&self) -> u64 {
        self.queue.pending_bytes()
    }

    async fn begin(
        &mut self,
        reporter: DownloadReporter,
        cancel: CancellationToken,
    ) -> Result<(), BackendError> {
        self.queue.run(&self.fetcher, &reporter, &cancel).await
    }
}
