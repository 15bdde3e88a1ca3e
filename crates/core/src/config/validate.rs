use reqwest::Url;

use super::{types::Config, ConfigError};

/// Maximum concurrent downloads accepted.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 20;

/// Maximum per-file retries accepted.
pub const MAX_RETRY_COUNT: u32 = 10;

/// Validate configuration
/// Currently validates:
/// - Main server URL is non-empty and absolute
/// - Fallback server URL, when set, is absolute
/// - App version is non-empty
/// - Download concurrency and retry bounds
/// - Policy fetch makes at least one attempt
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let server = &config.server;

    if server.main_url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "server.main_url cannot be empty".to_string(),
        ));
    }
    Url::parse(&server.main_url).map_err(|e| {
        ConfigError::ValidationError(format!(
            "server.main_url is not a valid URL ({}): {}",
            server.main_url, e
        ))
    })?;

    if !server.fallback_url.trim().is_empty() {
        Url::parse(&server.fallback_url).map_err(|e| {
            ConfigError::ValidationError(format!(
                "server.fallback_url is not a valid URL ({}): {}",
                server.fallback_url, e
            ))
        })?;
    }

    if server.app_version.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "server.app_version cannot be empty".to_string(),
        ));
    }

    let download = &config.download;
    if download.max_concurrent == 0 || download.max_concurrent > MAX_CONCURRENT_DOWNLOADS {
        return Err(ConfigError::ValidationError(format!(
            "download.max_concurrent must be between 1 and {}",
            MAX_CONCURRENT_DOWNLOADS
        )));
    }

    if download.retry_count > MAX_RETRY_COUNT {
        return Err(ConfigError::ValidationError(format!(
            "download.retry_count cannot exceed {}",
            MAX_RETRY_COUNT
        )));
    }

    if config.version.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "version.retry.max_attempts must be at least 1".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DownloadConfig, Platform, ServerConfig};

    fn assert_invalid(config: &Config) {
        let result = validate_config(config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_empty_main_url_fails() {
        let config = Config {
            server: ServerConfig {
                main_url: "  ".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_invalid(&config);
    }

    #[test]
    fn test_validate_relative_main_url_fails() {
        let config = Config {
            server: ServerConfig {
                main_url: "cdn.example.com".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_invalid(&config);
    }

    #[test]
    fn test_validate_empty_fallback_allowed() {
        let config = Config {
            server: ServerConfig {
                fallback_url: String::new(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(validate_config(&config).is_ok());
        assert!(config
            .server
            .remote_services(Platform::Pc)
            .fallback_url
            .starts_with("http"));
    }

    #[test]
    fn test_validate_empty_app_version_fails() {
        let config = Config {
            server: ServerConfig {
                app_version: String::new(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_invalid(&config);
    }

    #[test]
    fn test_validate_download_bounds() {
        for (max_concurrent, retry_count, ok) in
            [(0, 3, false), (21, 3, false), (20, 10, true), (1, 0, true), (10, 11, false)]
        {
            let config = Config {
                download: DownloadConfig {
                    max_concurrent,
                    retry_count,
                },
                ..Default::default()
            };
            assert_eq!(
                validate_config(&config).is_ok(),
                ok,
                "max_concurrent={} retry_count={}",
                max_concurrent,
                retry_count
            );
        }
    }

    #[test]
    fn test_validate_policy_attempts() {
        let mut config = Config::default();
        config.version.retry.max_attempts = 0;
        assert_invalid(&config);
    }
}
