//! Skill trait and core lifecycle types.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SkillResult;

/// An in-process skill instance.
///
/// Instances are created by a [`SkillFactory`](crate::SkillFactory) when the
/// loader loads the skill. Only [`Skill::execute`] is required; the other
/// hooks default to no-ops.
#[async_trait]
pub trait Skill: Send + Sync {
    /// Prepare resources after construction.
    ///
    /// A failure here leaves the skill in [`LoadStatus::Error`].
    async fn init(&mut self) -> SkillResult<()> {
        Ok(())
    }

    /// Release resources before the skill is unloaded.
    async fn destroy(&mut self) -> SkillResult<()> {
        Ok(())
    }

    /// Run the skill.
    ///
    /// `params` has already been validated against the manifest schema.
    /// Errors returned here reach the caller unmodified.
    async fn execute(&self, params: Value, context: Value) -> SkillResult<Value>;

    /// Report the skill's health.
    async fn health_check(&self) -> SkillResult<HealthReport> {
        Ok(HealthReport::ok())
    }
}

impl fmt::Debug for dyn Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Skill").finish_non_exhaustive()
    }
}

/// Result of a skill's own health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Free-form status, `ok` when healthy.
    pub status: String,
    /// Optional skill-specific details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl HealthReport {
    /// A healthy report with no details.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            details: None,
        }
    }
}

/// Load status of a skill in the loader.
///
/// `Unloaded → Loaded → {Error | Unloaded}`. `Error` stays until an explicit
/// reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    /// Instantiated and ready to execute.
    Loaded,
    /// Loading or reloading failed.
    Error,
    /// Not loaded.
    Unloaded,
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Loaded => "loaded",
            Self::Error => "error",
            Self::Unloaded => "unloaded",
        })
    }
}

/// Install category of a skill, which also names its directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillKind {
    /// Shipped with the host and trusted.
    Builtin,
    /// Installed from a third-party source.
    #[default]
    Community,
    /// Written locally by the user.
    Custom,
}

impl SkillKind {
    /// All kinds, in load order.
    pub const ALL: [Self; 3] = [Self::Builtin, Self::Community, Self::Custom];

    /// Directory name under the skills root.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::Community => "community",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for SkillKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl std::str::FromStr for SkillKind {
    type Err = crate::error::SkillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "builtin" => Ok(Self::Builtin),
            "community" => Ok(Self::Community),
            "custom" => Ok(Self::Custom),
            other => Err(crate::error::SkillError::Validation(format!(
                "unknown skill kind '{other}': expected builtin, community or custom"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimal;

    #[async_trait]
    impl Skill for Minimal {
        async fn execute(&self, params: Value, _context: Value) -> SkillResult<Value> {
            Ok(params)
        }
    }

    #[tokio::test]
    async fn default_hooks_succeed() {
        let mut skill = Minimal;
        skill.init().await.unwrap();
        assert_eq!(skill.health_check().await.unwrap(), HealthReport::ok());
        skill.destroy().await.unwrap();
    }

    #[test]
    fn kind_round_trips_through_dir_name() {
        for kind in SkillKind::ALL {
            assert_eq!(kind.dir_name().parse::<SkillKind>().unwrap(), kind);
        }
        assert!("vendor".parse::<SkillKind>().is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&LoadStatus::Loaded).unwrap(),
            "\"loaded\""
        );
        assert_eq!(LoadStatus::Error.to_string(), "error");
    }
}
