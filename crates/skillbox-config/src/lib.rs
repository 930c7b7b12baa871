//! Layered configuration for the skillbox runtime.
//!
//! Values are resolved from, in increasing precedence:
//!
//! 1. the embedded `defaults.toml`
//! 2. `~/.skillbox/config.toml` (or `$SKILLBOX_HOME/config.toml`)
//! 3. `<workspace>/.skillbox/config.toml`
//! 4. `SKILLBOX_*` environment variables
//!
//! Tables are deep-merged; scalars and arrays replace. The result is
//! validated before it is returned. This crate knows nothing about the
//! runtime; callers convert sections into their own option types.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod env;
pub mod error;
pub mod loader;
pub mod merge;
pub mod types;
pub mod validate;

use std::path::Path;

pub use error::{ConfigError, ConfigResult};
pub use loader::{CONFIG_DIR_NAME, CONFIG_FILE_NAME, LoadOptions, ResolvedConfig};
pub use merge::{ConfigLayer, FieldSources};
pub use types::{
    Config, LoggingSection, ManagerSection, MarketplaceSection, PathsSection, SandboxSection,
};

impl Config {
    /// Resolve every layer using the process environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a layer is malformed or the merged
    /// configuration is invalid.
    pub fn load(workspace_root: Option<&Path>) -> ConfigResult<ResolvedConfig> {
        loader::load(workspace_root)
    }

    /// Resolve with `home` replacing the user config directory.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_with_home(
        workspace_root: Option<&Path>,
        home: &Path,
    ) -> ConfigResult<ResolvedConfig> {
        let env_vars = std::env::vars()
            .filter(|(key, _)| key.starts_with("SKILLBOX_"))
            .collect();
        loader::load_with(&LoadOptions {
            workspace_root: workspace_root.map(Path::to_path_buf),
            home_override: Some(home.to_path_buf()),
            env_vars,
        })
    }

    /// Load one file over the defaults.
    ///
    /// # Errors
    ///
    /// See [`loader::load_file`].
    pub fn load_file(path: &Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }
}
