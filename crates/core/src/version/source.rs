//! Version policy sources.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics;

use super::config::RetryConfig;
use super::policy::ServerVersionPolicy;

/// Path of the policy document relative to the server base URL.
pub const POLICY_PATH: &str = "version/policy.json";

/// Errors that can occur while fetching the version policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Policy request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Failed to parse policy: {0}")]
    Parse(String),

    #[error("Policy request cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Trait for version policy backends.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Source name for logging.
    fn name(&self) -> &str;

    /// Fetch the policy, possibly from a cache.
    async fn fetch(&self) -> Result<ServerVersionPolicy, PolicyError>;

    /// Fetch the policy, bypassing any cache.
    async fn refresh(&self) -> Result<ServerVersionPolicy, PolicyError> {
        self.fetch().await
    }
}

#[derive(Debug, Clone)]
struct CachedPolicy {
    policy: ServerVersionPolicy,
    fetched_at: Instant,
}

/// Fetches `{base_url}/version/policy.json` over HTTP.
pub struct HttpPolicySource {
    client: Client,
    base_url: String,
    cache_ttl: Duration,
    cache: RwLock<Option<CachedPolicy>>,
}

impl HttpPolicySource {
    /// Create a source for the given server base URL.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        cache_ttl: Duration,
    ) -> Result<Self, PolicyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PolicyError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            cache_ttl,
            cache: RwLock::new(None),
        })
    }

    /// Full URL of the policy document.
    pub fn policy_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), POLICY_PATH)
    }

    /// Drop any cached policy.
    pub async fn clear_cache(&self) {
        *self.cache.write().await = None;
    }

    /// Check whether the policy endpoint answers a HEAD request.
    pub async fn is_available(&self) -> bool {
        match self
            .client
            .head(self.policy_url())
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %self.policy_url(), "Policy endpoint unavailable: {}", e);
                false
            }
        }
    }

    async fn cached(&self) -> Option<ServerVersionPolicy> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.cache_ttl)
            .map(|c| c.policy.clone())
    }

    async fn request(&self) -> Result<ServerVersionPolicy, PolicyError> {
        let url = self.policy_url();
        debug!(url = %url, "Requesting version policy");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                PolicyError::Timeout
            } else if e.is_connect() {
                PolicyError::ConnectionFailed(e.to_string())
            } else {
                PolicyError::Internal(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PolicyError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                PolicyError::Timeout
            } else {
                PolicyError::Internal(e.to_string())
            }
        })?;
        let policy: ServerVersionPolicy =
            serde_json::from_str(&body).map_err(|e| PolicyError::Parse(e.to_string()))?;

        *self.cache.write().await = Some(CachedPolicy {
            policy: policy.clone(),
            fetched_at: Instant::now(),
        });

        Ok(policy)
    }
}

#[async_trait]
impl PolicySource for HttpPolicySource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self) -> Result<ServerVersionPolicy, PolicyError> {
        if let Some(policy) = self.cached().await {
            metrics::POLICY_FETCHES.with_label_values(&["cached"]).inc();
            return Ok(policy);
        }
        self.request().await
    }

    async fn refresh(&self) -> Result<ServerVersionPolicy, PolicyError> {
        self.clear_cache().await;
        self.request().await
    }
}

/// Fetch the policy with bounded retries.
///
/// Returns `None` when every attempt fails or the token is cancelled; callers
/// fall back to the built-in rules.
pub async fn fetch_policy_with_retry(
    source: &dyn PolicySource,
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> Option<ServerVersionPolicy> {
    let attempts = retry.max_attempts.max(1);

    for attempt in 1..=attempts {
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(PolicyError::Cancelled),
            result = source.fetch() => result,
        };

        match result {
            Ok(policy) => {
                metrics::POLICY_FETCHES.with_label_values(&["success"]).inc();
                return Some(policy);
            }
            Err(PolicyError::Cancelled) => {
                debug!(source = source.name(), "Policy fetch cancelled");
                return None;
            }
            Err(e) => {
                metrics::POLICY_FETCHES.with_label_values(&["failed"]).inc();
                warn!(
                    source = source.name(),
                    attempt,
                    max_attempts = attempts,
                    "Version policy fetch failed: {}",
                    e
                );
            }
        }

        if attempt < attempts {
            let delay = retry.delay_after(attempt);
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    metrics::POLICY_FETCHES.with_label_values(&["fallback"]).inc();
    warn!(
        source = source.name(),
        "Version policy unavailable after {} attempts, using built-in rules", attempts
    );
    None
}
