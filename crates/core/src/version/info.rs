//! Version string parsing and ordering.

use std::cmp::Ordering;
use std::fmt;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Suffix carried by the sentinel produced for unparseable input.
pub const INVALID_SUFFIX: &str = "invalid";

/// Suffix carried by the sentinel produced when a component overflows.
pub const ERROR_SUFFIX: &str = "error";

static VERSION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^v?(\d+)\.(\d+)(?:\.(\d+))?(?:\.(\d+))?(?:-([a-z0-9]+))?$")
        .expect("version regex is valid")
});

/// Errors produced by strict version parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("empty version string")]
    Empty,

    #[error("unrecognized version format: {0}")]
    Format(String),

    #[error("version component out of range: {0}")]
    Overflow(String),
}

/// A parsed version: `major.minor.patch.build-suffix`.
///
/// Equality is structural. Ordering is exposed through [`VersionInfo::compare`]
/// rather than `Ord` because suffixes compare case-insensitively, so two
/// versions can order as equal without being identical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionInfo {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: u32,
    #[serde(default)]
    pub suffix: String,
}

/// Which components must match for two versions to be considered compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityMode {
    MajorOnly,
    #[default]
    MajorMinor,
    MajorMinorPatch,
    All,
}

/// The most significant component that differs between two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionDelta {
    None,
    Build,
    Patch,
    Minor,
    Major,
}

impl VersionInfo {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            build: 0,
            suffix: String::new(),
        }
    }

    pub fn with_build(mut self, build: u32) -> Self {
        self.build = build;
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Sentinel for input that does not match the version grammar.
    pub fn invalid() -> Self {
        Self::default().with_suffix(INVALID_SUFFIX)
    }

    /// Sentinel for input that matched the grammar but overflowed.
    pub fn error() -> Self {
        Self::default().with_suffix(ERROR_SUFFIX)
    }

    /// Strictly parse a version string.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }

        let caps = VERSION_REGEX
            .captures(trimmed)
            .ok_or_else(|| VersionError::Format(input.to_string()))?;

        let component = |idx: usize| -> Result<u32, VersionError> {
            match caps.get(idx) {
                Some(m) => m
                    .as_str()
                    .parse::<u32>()
                    .map_err(|_| VersionError::Overflow(input.to_string())),
                None => Ok(0),
            }
        };

        Ok(Self {
            major: component(1)?,
            minor: component(2)?,
            patch: component(3)?,
            build: component(4)?,
            suffix: caps
                .get(5)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        })
    }

    /// Parse a version string, mapping failures to the `invalid`/`error` sentinels.
    pub fn parse_lenient(input: &str) -> Self {
        match Self::parse(input) {
            Ok(version) => version,
            Err(VersionError::Overflow(_)) => {
                warn!(version = input, "Version component out of range");
                Self::error()
            }
            Err(e) => {
                if !input.trim().is_empty() {
                    warn!(version = input, "Unable to parse version: {}", e);
                }
                Self::invalid()
            }
        }
    }

    /// Whether this value is one of the parse-failure sentinels.
    pub fn is_sentinel(&self) -> bool {
        self.suffix.eq_ignore_ascii_case(INVALID_SUFFIX)
            || self.suffix.eq_ignore_ascii_case(ERROR_SUFFIX)
    }

    /// Total order over (major, minor, patch, build), then suffix ignoring case.
    pub fn compare(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch, self.build)
            .cmp(&(other.major, other.minor, other.patch, other.build))
            .then_with(|| {
                self.suffix
                    .to_ascii_lowercase()
                    .cmp(&other.suffix.to_ascii_lowercase())
            })
    }

    pub fn is_older_than(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Less
    }

    pub fn is_same_as(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }

    pub fn is_compatible_with(&self, other: &Self, mode: CompatibilityMode) -> bool {
        match mode {
            CompatibilityMode::MajorOnly => self.major == other.major,
            CompatibilityMode::MajorMinor => {
                self.major == other.major && self.minor == other.minor
            }
            CompatibilityMode::MajorMinorPatch => {
                self.major == other.major
                    && self.minor == other.minor
                    && self.patch == other.patch
            }
            CompatibilityMode::All => self.is_same_as(other),
        }
    }

    /// The most significant component that differs from `other`.
    pub fn delta(&self, other: &Self) -> VersionDelta {
        if self.is_same_as(other) {
            VersionDelta::None
        } else if self.major != other.major {
            VersionDelta::Major
        } else if self.minor != other.minor {
            VersionDelta::Minor
        } else if self.patch != other.patch {
            VersionDelta::Patch
        } else {
            // Only build or suffix differ.
            VersionDelta::Build
        }
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.build > 0 {
            write!(f, ".{}", self.build)?;
        }
        if !self.suffix.is_empty() {
            write!(f, "-{}", self.suffix)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for VersionInfo {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Whether `input` matches the version grammar.
pub fn is_valid_version(input: &str) -> bool {
    VersionInfo::parse(input).is_ok()
}

/// Normalize a version string for display (sentinels included).
pub fn format_version(input: &str) -> String {
    VersionInfo::parse_lenient(input).to_string()
}
