use serde::{Deserialize, Serialize};

use crate::backend::{CacheClearMode, DownloaderOptions, RemoteServices};
use crate::version::VersionCheckConfig;

/// Placeholder replaced by the app version in CDN path templates.
pub const VERSION_PLACEHOLDER: &str = "{version}";

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub version: VersionCheckConfig,
}

/// Patch server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_url")]
    pub main_url: String,
    #[serde(default = "default_server_url")]
    pub fallback_url: String,
    /// Version of the installed application. Selects the CDN directory and
    /// is the local side of version gating.
    #[serde(default = "default_app_version")]
    pub app_version: String,
    #[serde(default)]
    pub cdn: CdnConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            main_url: default_server_url(),
            fallback_url: default_server_url(),
            app_version: default_app_version(),
            cdn: CdnConfig::default(),
        }
    }
}

fn default_server_url() -> String {
    "http://127.0.0.1".to_string()
}

fn default_app_version() -> String {
    "v1.0".to_string()
}

/// Target platform, selects the CDN path template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Android,
    Ios,
    Webgl,
    Pc,
}

impl Platform {
    /// Platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "ios") {
            Platform::Ios
        } else if cfg!(target_family = "wasm") {
            Platform::Webgl
        } else {
            Platform::Pc
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Webgl => "webgl",
            Platform::Pc => "pc",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" | "iphone" => Ok(Platform::Ios),
            "webgl" => Ok(Platform::Webgl),
            "pc" | "windows" | "standalone" => Ok(Platform::Pc),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// Per-platform CDN path templates, each containing `{version}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CdnConfig {
    #[serde(default = "default_android_cdn")]
    pub android: String,
    #[serde(default = "default_ios_cdn")]
    pub ios: String,
    #[serde(default = "default_webgl_cdn")]
    pub webgl: String,
    #[serde(default = "default_pc_cdn")]
    pub pc: String,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            android: default_android_cdn(),
            ios: default_ios_cdn(),
            webgl: default_webgl_cdn(),
            pc: default_pc_cdn(),
        }
    }
}

fn default_android_cdn() -> String {
    "/CDN/Android/{version}".to_string()
}

fn default_ios_cdn() -> String {
    "/CDN/IPhone/{version}".to_string()
}

fn default_webgl_cdn() -> String {
    "/CDN/WebGL/{version}".to_string()
}

fn default_pc_cdn() -> String {
    "/CDN/PC/{version}".to_string()
}

impl CdnConfig {
    pub fn template(&self, platform: Platform) -> &str {
        match platform {
            Platform::Android => &self.android,
            Platform::Ios => &self.ios,
            Platform::Webgl => &self.webgl,
            Platform::Pc => &self.pc,
        }
    }
}

impl ServerConfig {
    /// CDN path for `platform` with the app version filled in.
    pub fn platform_cdn(&self, platform: Platform) -> String {
        self.cdn
            .template(platform)
            .replace(VERSION_PLACEHOLDER, &self.app_version)
    }

    /// Server base URL joined with the platform CDN path. A blank fallback
    /// URL resolves to the main URL.
    pub fn full_server_url(&self, use_fallback: bool, platform: Platform) -> String {
        let base = if use_fallback && !self.fallback_url.trim().is_empty() {
            &self.fallback_url
        } else {
            &self.main_url
        };
        format!("{}{}", base.trim_end_matches('/'), self.platform_cdn(platform))
    }

    /// Main and fallback locations for bundle files on `platform`.
    pub fn remote_services(&self, platform: Platform) -> RemoteServices {
        RemoteServices::new(
            self.full_server_url(false, platform),
            self.full_server_url(true, platform),
        )
    }
}

/// Download configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    /// Maximum files downloaded at once (1-20).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Retries per file after the first attempt (0-10).
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            retry_count: default_retry_count(),
        }
    }
}

fn default_max_concurrent() -> usize {
    10
}

fn default_retry_count() -> u32 {
    3
}

impl DownloadConfig {
    pub fn downloader_options(&self) -> DownloaderOptions {
        DownloaderOptions {
            max_concurrency: self.max_concurrent,
            max_retries: self.retry_count,
        }
    }
}

/// Cache reclamation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_auto_clear")]
    pub auto_clear: bool,
    #[serde(default)]
    pub clear_mode: CacheClearMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            auto_clear: default_auto_clear(),
            clear_mode: CacheClearMode::default(),
        }
    }
}

fn default_auto_clear() -> bool {
    true
}
