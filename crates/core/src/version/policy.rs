//! Server-supplied version policy.

use serde::{Deserialize, Serialize};

use super::info::{is_valid_version, VersionInfo};

/// Version policy published by the server at `/version/policy.json`.
///
/// ```json
/// {
///   "MinSupportedVersion": "v1.0.0",
///   "ForceUpdateVersion": "v2.0.0",
///   "AllowDowngrade": false,
///   "CompatibleVersions": ["v1.0.0", "v1.0.1"],
///   "UpdateMessage": "A new version is available"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerVersionPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_supported_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_update_version: Option<String>,
    #[serde(default)]
    pub allow_downgrade: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compatible_versions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_message: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl ServerVersionPolicy {
    /// Whether `local` meets the policy minimum.
    pub fn meets_minimum(&self, local: &VersionInfo) -> bool {
        match non_empty(&self.min_supported_version) {
            Some(min) => !local.is_older_than(&VersionInfo::parse_lenient(min)),
            None => true,
        }
    }

    pub fn has_allow_list(&self) -> bool {
        !self.compatible_versions.is_empty()
    }

    /// Whether `local` exactly matches an entry of the allow-list.
    ///
    /// Malformed entries never match. An empty list allows everything.
    pub fn allows(&self, local: &VersionInfo) -> bool {
        if !self.has_allow_list() {
            return true;
        }
        self.compatible_versions
            .iter()
            .filter(|v| is_valid_version(v))
            .any(|v| VersionInfo::parse_lenient(v).is_same_as(local))
    }

    /// Combined minimum and allow-list check.
    pub fn is_compatible(&self, local: &VersionInfo) -> bool {
        self.meets_minimum(local) && self.allows(local)
    }

    /// Whether `local` is below the force-update threshold.
    pub fn requires_force_update(&self, local: &VersionInfo) -> bool {
        match non_empty(&self.force_update_version) {
            Some(threshold) => local.is_older_than(&VersionInfo::parse_lenient(threshold)),
            None => false,
        }
    }

    /// Whether moving from `local` to `server` is permitted under the
    /// downgrade flag. Informational; [`check_version`](super::check_version)
    /// does not gate on it.
    pub fn permits_transition(&self, local: &VersionInfo, server: &VersionInfo) -> bool {
        self.allow_downgrade || !server.is_older_than(local)
    }
}
