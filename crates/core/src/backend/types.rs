//! Types for the asset backend contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors reported by an asset backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Version request failed: {0}")]
    VersionRequestFailed(String),

    #[error("Manifest update failed: {0}")]
    ManifestFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Cache clear failed: {0}")]
    CacheClearFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How the package sources its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayMode {
    /// Content is simulated from the local build output.
    EditorSimulate,
    /// Only content shipped with the application.
    Offline,
    /// Shipped content plus a local cache fed from remote servers.
    Host,
    /// Content served from remote servers only.
    Web,
}

impl PlayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayMode::EditorSimulate => "editor_simulate",
            PlayMode::Offline => "offline",
            PlayMode::Host => "host",
            PlayMode::Web => "web",
        }
    }

    /// Whether this mode downloads from remote servers.
    pub fn is_remote(&self) -> bool {
        matches!(self, PlayMode::Host | PlayMode::Web)
    }
}

impl std::fmt::Display for PlayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "editor_simulate" | "simulate" => Ok(PlayMode::EditorSimulate),
            "offline" => Ok(PlayMode::Offline),
            "host" => Ok(PlayMode::Host),
            "web" => Ok(PlayMode::Web),
            other => Err(format!("unknown play mode: {}", other)),
        }
    }
}

/// Main and fallback base URLs for remote bundle files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteServices {
    pub main_url: String,
    pub fallback_url: String,
}

impl RemoteServices {
    pub fn new(main_url: impl Into<String>, fallback_url: impl Into<String>) -> Self {
        Self {
            main_url: main_url.into(),
            fallback_url: fallback_url.into(),
        }
    }

    /// URL of `file_name` on the main server.
    pub fn main_file_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.main_url.trim_end_matches('/'), file_name)
    }

    /// URL of `file_name` on the fallback server.
    pub fn fallback_file_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.fallback_url.trim_end_matches('/'), file_name)
    }
}

/// Mode-specific parameters for package initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitParameters {
    EditorSimulate,
    Offline,
    Host {
        remote: RemoteServices,
    },
    Web {
        remote: RemoteServices,
        /// Skip the platform's own web cache; the backend caches files itself.
        disable_web_cache: bool,
    },
}

impl InitParameters {
    /// Build parameters for `mode`. Remote services are only used by remote modes.
    pub fn for_mode(mode: PlayMode, remote: RemoteServices) -> Self {
        match mode {
            PlayMode::EditorSimulate => InitParameters::EditorSimulate,
            PlayMode::Offline => InitParameters::Offline,
            PlayMode::Host => InitParameters::Host { remote },
            PlayMode::Web => InitParameters::Web {
                remote,
                disable_web_cache: true,
            },
        }
    }

    pub fn play_mode(&self) -> PlayMode {
        match self {
            InitParameters::EditorSimulate => PlayMode::EditorSimulate,
            InitParameters::Offline => PlayMode::Offline,
            InitParameters::Host { .. } => PlayMode::Host,
            InitParameters::Web { .. } => PlayMode::Web,
        }
    }

    pub fn remote(&self) -> Option<&RemoteServices> {
        match self {
            InitParameters::Host { remote } | InitParameters::Web { remote, .. } => Some(remote),
            _ => None,
        }
    }
}

/// Which cached files to reclaim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheClearMode {
    ClearAllBundleFiles,
    #[default]
    ClearUnusedBundleFiles,
    ClearAllManifestFiles,
    ClearUnusedManifestFiles,
}

impl CacheClearMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheClearMode::ClearAllBundleFiles => "clear_all_bundle_files",
            CacheClearMode::ClearUnusedBundleFiles => "clear_unused_bundle_files",
            CacheClearMode::ClearAllManifestFiles => "clear_all_manifest_files",
            CacheClearMode::ClearUnusedManifestFiles => "clear_unused_manifest_files",
        }
    }
}

/// Limits for a downloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloaderOptions {
    /// Maximum files transferred at once.
    pub max_concurrency: usize,
    /// Retries per file after the first attempt.
    pub max_retries: u32,
}

/// Snapshot of download progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub total_count: usize,
    pub current_count: usize,
    pub total_bytes: u64,
    pub current_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
}

impl DownloadInfo {
    /// Totals only, nothing transferred yet.
    pub fn totals(total_count: usize, total_bytes: u64) -> Self {
        Self {
            total_count,
            total_bytes,
            ..Default::default()
        }
    }

    /// Fraction of files done, in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        if self.total_count == 0 {
            return 1.0;
        }
        (self.current_count as f32 / self.total_count as f32).clamp(0.0, 1.0)
    }
}

/// Signal sent from a running downloader.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadSignal {
    Progress(DownloadInfo),
    FileError { file_name: String, message: String },
}

/// Sending half of a downloader's report channel.
///
/// Sends never block. Signals sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct DownloadReporter {
    tx: mpsc::UnboundedSender<DownloadSignal>,
}

impl DownloadReporter {
    /// Create a reporter and the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DownloadSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn progress(&self, info: DownloadInfo) {
        let _ = self.tx.send(DownloadSignal::Progress(info));
    }

    pub fn file_error(&self, file_name: impl Into<String>, message: impl Into<String>) {
        let _ = self.tx.send(DownloadSignal::FileError {
            file_name: file_name.into(),
            message: message.into(),
        });
    }
}

/// Downloader for the files a package is missing.
#[async_trait]
pub trait PackageDownloader: Send {
    /// Files still to download.
    fn pending_count(&self) -> usize;

    /// Bytes still to download.
    fn pending_bytes(&self) -> u64;

    /// Download every pending file, reporting as it goes.
    ///
    /// Returns once all files are present, a file exhausts its retries, or
    /// `cancel` fires.
    async fn begin(
        &mut self,
        reporter: DownloadReporter,
        cancel: CancellationToken,
    ) -> Result<(), BackendError>;
}

/// Trait for asset storage backends.
#[async_trait]
pub trait AssetBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Resolve or create the package and initialize it for a play mode.
    async fn initialize_package(
        &self,
        package: &str,
        params: InitParameters,
    ) -> Result<(), BackendError>;

    /// Latest manifest version available for the package.
    async fn request_latest_version(&self, package: &str) -> Result<String, BackendError>;

    /// Load and activate the manifest at `version`.
    async fn apply_manifest(&self, package: &str, version: &str) -> Result<(), BackendError>;

    /// Downloader for every missing or stale file of the active manifest.
    async fn create_downloader(
        &self,
        package: &str,
        options: DownloaderOptions,
    ) -> Box<dyn PackageDownloader>;

    /// Remove cached files according to `mode`.
    async fn clear_cache(&self, package: &str, mode: CacheClearMode) -> Result<(), BackendError>;
}
