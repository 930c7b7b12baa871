//! Configuration struct definitions.
//!
//! Every section has a `Default` matching `defaults.toml`, and every field
//! is `#[serde(default)]` so partial files deserialize.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filesystem layout.
    pub paths: PathsSection,
    /// Subprocess sandbox.
    pub sandbox: SandboxSection,
    /// Install and load behaviour.
    pub manager: ManagerSection,
    /// Marketplace index.
    pub marketplace: MarketplaceSection,
    /// Logging.
    pub logging: LoggingSection,
}

/// `[paths]`. Relative paths are taken from the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    /// Root of the skill tree.
    pub skills_dir: PathBuf,
    /// Persisted registry.
    pub registry_file: PathBuf,
    /// Staging and backup area.
    pub temp_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            skills_dir: PathBuf::from("skills"),
            registry_file: PathBuf::from("skills/registry.json"),
            temp_dir: PathBuf::from("temp/skills"),
        }
    }
}

/// `[sandbox]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    /// Default budget per sandboxed call.
    pub timeout_ms: u64,
    /// Budget per `eval`.
    pub eval_timeout_ms: u64,
    /// Directories sandboxed skills may live under.
    pub allowed_dirs: Vec<PathBuf>,
    /// Maximum size of one protocol message.
    pub max_payload_bytes: u64,
    /// Whether skills are told network access is allowed.
    pub network: bool,
    /// Address-space limit in MiB, 0 for none.
    pub memory_limit_mb: u64,
    /// Confine each child's filesystem view (Linux).
    pub restrict_filesystem: bool,
    /// Host environment variables passed to children.
    pub env_passthrough: Vec<String>,
    /// Interpreter command per entry file extension.
    pub interpreters: BTreeMap<String, Vec<String>>,
}

impl Default for SandboxSection {
    fn default() -> Self {
        let interpreters = [
            ("js", "node"),
            ("mjs", "node"),
            ("cjs", "node"),
            ("py", "python3"),
            ("sh", "sh"),
        ]
        .into_iter()
        .map(|(ext, cmd)| (ext.to_owned(), vec![cmd.to_owned()]))
        .collect();
        Self {
            timeout_ms: 30_000,
            eval_timeout_ms: 5_000,
            allowed_dirs: vec![
                PathBuf::from("skills"),
                PathBuf::from("/tmp/skills"),
                PathBuf::from("/opt/skills"),
            ],
            max_payload_bytes: 10 * 1024 * 1024,
            network: true,
            memory_limit_mb: 0,
            restrict_filesystem: false,
            env_passthrough: Vec::new(),
            interpreters,
        }
    }
}

/// `[manager]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSection {
    /// Load `builtin/` skills at startup.
    pub auto_load_builtin: bool,
    /// Run the package manager for skills that ship a `package.json`.
    pub install_packages: bool,
    /// Package manager program.
    pub npm_command: String,
    /// Budget for one package install.
    pub dependency_timeout_secs: u64,
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            auto_load_builtin: true,
            install_packages: true,
            npm_command: "npm".to_owned(),
            dependency_timeout_secs: 180,
        }
    }
}

/// `[marketplace]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceSection {
    /// Index URL or file path; empty disables the marketplace.
    pub index: String,
}

impl MarketplaceSection {
    /// The index location, if one is configured.
    #[must_use]
    pub fn index(&self) -> Option<&str> {
        Some(self.index.trim()).filter(|s| !s.is_empty())
    }
}

/// `[logging]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Level filter.
    pub level: String,
    /// `pretty`, `compact` or `json`.
    pub format: String,
    /// Write daily-rotated files here instead of stderr; empty for stderr.
    pub directory: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directory: String::new(),
        }
    }
}

impl LoggingSection {
    /// Log directory, if file logging is configured.
    #[must_use]
    pub fn directory(&self) -> Option<PathBuf> {
        Some(self.directory.trim())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }
}
