//! Version gating configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for version gating inside the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionCheckConfig {
    /// Run the compatibility decision before applying a new manifest.
    /// Disabled by default since package versions are often not semantic.
    #[serde(default)]
    pub enabled: bool,

    /// Fetch the server policy before deciding.
    /// When disabled only the built-in rules apply.
    #[serde(default = "default_fetch_policy")]
    pub fetch_policy: bool,

    /// Policy request timeout in milliseconds.
    #[serde(default = "default_policy_timeout")]
    pub policy_timeout_ms: u64,

    /// How long a fetched policy stays valid, in seconds.
    #[serde(default = "default_policy_cache")]
    pub policy_cache_secs: u64,

    /// Retry settings for the policy fetch.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Delay growth between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    #[default]
    Exponential,
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default)]
    pub backoff: BackoffStrategy,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_fetch_policy() -> bool {
    true
}

fn default_policy_timeout() -> u64 {
    5000 // 5 seconds
}

fn default_policy_cache() -> u64 {
    300 // 5 minutes
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    5000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff: BackoffStrategy::default(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl Default for VersionCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fetch_policy: default_fetch_policy(),
            policy_timeout_ms: default_policy_timeout(),
            policy_cache_secs: default_policy_cache(),
            retry: RetryConfig::default(),
        }
    }
}

impl VersionCheckConfig {
    pub fn policy_timeout(&self) -> Duration {
        Duration::from_millis(self.policy_timeout_ms)
    }

    pub fn policy_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.policy_cache_secs)
    }
}

impl RetryConfig {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64;
        let millis = match self.backoff {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => {
                let exponent = attempt.saturating_sub(1).min(32) as i32;
                base * self.backoff_multiplier.max(1.0).powi(exponent)
            }
        };
        Duration::from_millis(millis.min(self.max_delay_ms as f64) as u64)
    }

    /// Sets the maximum attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay_ms(mut self, delay: u64) -> Self {
        self.initial_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }
}
