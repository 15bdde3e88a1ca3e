//! Version compatibility decision.
//!
//! Combines the built-in rules with an optional [`ServerVersionPolicy`] to
//! decide whether a client at `local` may move to the server's `server`
//! version, and how strongly the update should be pushed.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::info::{VersionDelta, VersionInfo};
use super::policy::ServerVersionPolicy;

/// Built-in rules that apply regardless of server policy.
pub mod rules {
    /// Largest tolerated distance between major versions.
    pub const MAX_MAJOR_VERSION_DIFF: u32 = 1;
    /// Largest tolerated distance between minor versions of the same major.
    pub const MAX_MINOR_VERSION_DIFF: u32 = 2;
    /// Oldest client version that is still supported.
    pub const MIN_SUPPORTED_VERSION: &str = "v1.0.0";
}

/// How strongly an update should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    None,
    Optional,
    Recommended,
    ForceUpdate,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::None => "none",
            UpdateType::Optional => "optional",
            UpdateType::Recommended => "recommended",
            UpdateType::ForceUpdate => "force_update",
        }
    }

    /// Default user-facing text for the classification.
    pub fn description(&self) -> &'static str {
        match self {
            UpdateType::None => "Already up to date",
            UpdateType::Optional => "Patch update available (optional)",
            UpdateType::Recommended => "Minor update available (recommended)",
            UpdateType::ForceUpdate => "Major update required",
        }
    }
}

/// Outcome of a compatibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCheckResult {
    pub is_compatible: bool,
    pub reason: String,
    pub update_type: UpdateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VersionCheckResult {
    fn incompatible(reason: impl Into<String>) -> Self {
        Self {
            is_compatible: false,
            reason: reason.into(),
            update_type: UpdateType::ForceUpdate,
            message: None,
        }
    }

    /// Whether the pipeline may continue past version negotiation.
    pub fn allows_patching(&self) -> bool {
        self.is_compatible && self.update_type != UpdateType::ForceUpdate
    }
}

fn distance(a: u32, b: u32) -> u32 {
    a.abs_diff(b)
}

/// Check the built-in minimum floor.
fn meets_builtin_floor(local: &VersionInfo) -> bool {
    let floor = VersionInfo::parse_lenient(rules::MIN_SUPPORTED_VERSION);
    !local.is_older_than(&floor)
}

/// Check the built-in major/minor distance rules.
fn within_builtin_distance(local: &VersionInfo, server: &VersionInfo) -> Result<(), String> {
    if distance(local.major, server.major) > rules::MAX_MAJOR_VERSION_DIFF {
        return Err(format!(
            "major version gap too large: {} vs {}",
            local, server
        ));
    }
    if local.major == server.major
        && distance(local.minor, server.minor) > rules::MAX_MINOR_VERSION_DIFF
    {
        return Err(format!(
            "minor version gap too large: {} vs {}",
            local, server
        ));
    }
    Ok(())
}

/// Built-in compatibility rules alone.
pub fn is_compatible(local: &str, server: &str) -> bool {
    let local = VersionInfo::parse_lenient(local);
    let server = VersionInfo::parse_lenient(server);
    !local.is_sentinel()
        && !server.is_sentinel()
        && meets_builtin_floor(&local)
        && within_builtin_distance(&local, &server).is_ok()
}

/// Classify the update by the most significant differing component.
pub fn update_type_for(local: &VersionInfo, server: &VersionInfo) -> UpdateType {
    match local.delta(server) {
        VersionDelta::None => UpdateType::None,
        VersionDelta::Major => UpdateType::ForceUpdate,
        VersionDelta::Minor => UpdateType::Recommended,
        VersionDelta::Patch | VersionDelta::Build => UpdateType::Optional,
    }
}

/// Classify the update between two version strings.
pub fn get_update_type(local: &str, server: &str) -> UpdateType {
    update_type_for(
        &VersionInfo::parse_lenient(local),
        &VersionInfo::parse_lenient(server),
    )
}

/// Whether the client must update: the server is older than the client or the
/// client is below `min_required`.
pub fn requires_force_update(local: &str, server: &str, min_required: Option<&str>) -> bool {
    let local = VersionInfo::parse_lenient(local);
    let server = VersionInfo::parse_lenient(server);

    if server.is_older_than(&local) {
        warn!(%local, %server, "Server version is older than local version");
        return true;
    }

    if let Some(min) = min_required.filter(|m| !m.trim().is_empty()) {
        if local.is_older_than(&VersionInfo::parse_lenient(min)) {
            warn!(%local, min_required = min, "Local version below minimum required");
            return true;
        }
    }

    false
}

/// Decide whether `local` may move to `server`, optionally under a policy.
pub fn check_version(
    local: &str,
    server: &str,
    policy: Option<&ServerVersionPolicy>,
) -> VersionCheckResult {
    let local_v = VersionInfo::parse_lenient(local);
    let server_v = VersionInfo::parse_lenient(server);

    if local_v.is_sentinel() || server_v.is_sentinel() {
        return VersionCheckResult::incompatible(format!(
            "unparseable version (local={:?}, server={:?})",
            local, server
        ));
    }

    if !meets_builtin_floor(&local_v) {
        return VersionCheckResult::incompatible(format!(
            "local version {} is below minimum supported {}",
            local_v,
            rules::MIN_SUPPORTED_VERSION
        ));
    }

    let allow_list = policy.filter(|p| p.has_allow_list());
    match allow_list {
        // An allow-list replaces the distance rules.
        Some(p) => {
            if !p.allows(&local_v) {
                return VersionCheckResult::incompatible(format!(
                    "local version {} is not in the server allow-list",
                    local_v
                ));
            }
        }
        None => {
            if let Err(reason) = within_builtin_distance(&local_v, &server_v) {
                return VersionCheckResult::incompatible(reason);
            }
        }
    }

    if let Some(policy) = policy {
        if !policy.meets_minimum(&local_v) {
            return VersionCheckResult::incompatible(format!(
                "local version {} is below server minimum {}",
                local_v,
                policy.min_supported_version.as_deref().unwrap_or_default()
            ));
        }

        if policy.requires_force_update(&local_v) {
            return VersionCheckResult {
                is_compatible: true,
                reason: "below server force-update threshold".to_string(),
                update_type: UpdateType::ForceUpdate,
                message: policy.update_message.clone(),
            };
        }
    }

    let update_type = update_type_for(&local_v, &server_v);
    debug!(%local_v, %server_v, update_type = update_type.as_str(), "Version check passed");

    VersionCheckResult {
        is_compatible: true,
        reason: "compatible".to_string(),
        update_type,
        message: Some(update_type.description().to_string()),
    }
}
