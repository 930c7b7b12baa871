//! Numeric `major.minor.patch` versions and dependency requirements.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::SkillError;

/// A three-part numeric version.
///
/// Ordering compares the components numerically, so `1.10.0 > 1.9.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
}

impl Version {
    /// Create a version from its components.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = SkillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SkillError::Validation(format!("invalid version: '{s}'"));

        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u64, SkillError> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };

        let version = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A dependency version requirement as written in a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionReq {
    /// `*` or empty: any version.
    Any,
    /// `=x.y.z`: exactly this version.
    Exact(Version),
    /// `^x.y.z`, `~x.y.z`, `>=x.y.z` or a bare version: at least this version.
    AtLeast(Version),
}

impl VersionReq {
    /// Parse a requirement string.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the version part is not `major.minor.patch`.
    pub fn parse(s: &str) -> Result<Self, SkillError> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Self::Any);
        }
        if let Some(rest) = s.strip_prefix('=') {
            return Ok(Self::Exact(rest.parse()?));
        }
        let rest = s
            .strip_prefix(">=")
            .or_else(|| s.strip_prefix('^'))
            .or_else(|| s.strip_prefix('~'))
            .unwrap_or(s);
        Ok(Self::AtLeast(rest.parse()?))
    }

    /// Whether `version` satisfies this requirement.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(v) => version == v,
            Self::AtLeast(v) => version.cmp(v) != Ordering::Less,
        }
    }
}
