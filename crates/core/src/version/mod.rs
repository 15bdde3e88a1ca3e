//! Version model and compatibility decision.
//!
//! - [`VersionInfo`]: parsing, ordering and classification of version strings
//! - [`check_version`]: built-in rules plus optional [`ServerVersionPolicy`]
//! - [`PolicySource`]: where the server policy comes from, with a bounded-retry
//!   wrapper that falls back to the built-in rules

mod compat;
mod config;
mod info;
mod policy;
mod source;

pub use compat::{
    check_version, get_update_type, is_compatible, requires_force_update, rules,
    update_type_for, UpdateType, VersionCheckResult,
};
pub use config::{BackoffStrategy, RetryConfig, VersionCheckConfig};
pub use info::{
    format_version, is_valid_version, CompatibilityMode, VersionDelta, VersionError, VersionInfo,
    ERROR_SUFFIX, INVALID_SUFFIX,
};
pub use policy::ServerVersionPolicy;
pub use source::{
    fetch_policy_with_retry, HttpPolicySource, PolicyError, PolicySource, POLICY_PATH,
};
