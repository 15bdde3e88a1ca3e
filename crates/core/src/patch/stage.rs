//! Pipeline stages.

use serde::{Deserialize, Serialize};

/// Stage of a patch run. Exactly one is current at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStage {
    #[default]
    None,
    InitializePackage,
    RequestPackageVersion,
    UpdatePackageManifest,
    CreateDownloader,
    DownloadPackageFiles,
    DownloadPackageOver,
    ClearCacheBundle,
    StartGame,
    Completed,
    Failed,
}

impl PatchStage {
    /// Stages backed by a pipeline node, in pipeline order.
    pub const PIPELINE: [PatchStage; 8] = [
        PatchStage::InitializePackage,
        PatchStage::RequestPackageVersion,
        PatchStage::UpdatePackageManifest,
        PatchStage::CreateDownloader,
        PatchStage::DownloadPackageFiles,
        PatchStage::DownloadPackageOver,
        PatchStage::ClearCacheBundle,
        PatchStage::StartGame,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatchStage::None => "none",
            PatchStage::InitializePackage => "initialize_package",
            PatchStage::RequestPackageVersion => "request_package_version",
            PatchStage::UpdatePackageManifest => "update_package_manifest",
            PatchStage::CreateDownloader => "create_downloader",
            PatchStage::DownloadPackageFiles => "download_package_files",
            PatchStage::DownloadPackageOver => "download_package_over",
            PatchStage::ClearCacheBundle => "clear_cache_bundle",
            PatchStage::StartGame => "start_game",
            PatchStage::Completed => "completed",
            PatchStage::Failed => "failed",
        }
    }

    /// Human-readable description, the default stage change message.
    pub fn description(&self) -> &'static str {
        match self {
            PatchStage::None => "Not started",
            PatchStage::InitializePackage => "Initializing package",
            PatchStage::RequestPackageVersion => "Requesting package version",
            PatchStage::UpdatePackageManifest => "Updating package manifest",
            PatchStage::CreateDownloader => "Creating downloader",
            PatchStage::DownloadPackageFiles => "Downloading package files",
            PatchStage::DownloadPackageOver => "Package files downloaded",
            PatchStage::ClearCacheBundle => "Clearing unused cache files",
            PatchStage::StartGame => "Starting game",
            PatchStage::Completed => "Completed",
            PatchStage::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PatchStage::Completed | PatchStage::Failed)
    }
}

impl std::fmt::Display for PatchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
