//! Config file discovery and layered loading.
//!
//! Precedence, lowest first: embedded defaults, the user file, the
//! workspace file, then `SKILLBOX_*` variables. The merged tree is
//! deserialized and validated before it is returned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{HOME_VAR, apply_env_overrides};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking};
use crate::types::Config;
use crate::validate;

const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Directory name under home and workspace roots.
pub const CONFIG_DIR_NAME: &str = ".skillbox";
/// Config file name inside [`CONFIG_DIR_NAME`].
pub const CONFIG_FILE_NAME: &str = "config.toml";

const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// A loaded configuration plus where each value came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The validated configuration.
    pub config: Config,
    /// Layer that last set each dotted field.
    pub field_sources: FieldSources,
    /// Files merged, in order.
    pub loaded_files: Vec<PathBuf>,
}

impl ResolvedConfig {
    /// Layer that set `field`, if any.
    #[must_use]
    pub fn source_of(&self, field: &str) -> Option<ConfigLayer> {
        self.field_sources.get(field).copied()
    }

    /// The configuration rendered as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SerializeError`] if rendering fails.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(&self.config)?)
    }
}

/// Inputs to [`load_with`]; the process environment is not read here.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Workspace root; its `.skillbox/config.toml` is the workspace layer.
    pub workspace_root: Option<PathBuf>,
    /// Directory holding the user `config.toml`, replacing `~/.skillbox`.
    pub home_override: Option<PathBuf>,
    /// Environment variables considered for overrides.
    pub env_vars: HashMap<String, String>,
}

/// Load with the process environment.
///
/// `SKILLBOX_HOME`, when set, replaces `~/.skillbox` as the user directory.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a file is malformed, a variable cannot be
/// applied, or the merged configuration fails validation.
pub fn load(workspace_root: Option<&Path>) -> ConfigResult<ResolvedConfig> {
    let env_vars: HashMap<String, String> = std::env::vars()
        .filter(|(key, _)| key.starts_with("SKILLBOX_"))
        .collect();
    let home_override = env_vars
        .get(HOME_VAR)
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from);
    load_with(&LoadOptions {
        workspace_root: workspace_root.map(Path::to_path_buf),
        home_override,
        env_vars,
    })
}

/// Load from explicit inputs.
///
/// # Errors
///
/// See [`load`].
pub fn load_with(options: &LoadOptions) -> ConfigResult<ResolvedConfig> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|source| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source,
        })?;
    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_defaults(&merged, "", &mut field_sources);

    let user_dir = match &options.home_override {
        Some(dir) => dir.clone(),
        None => user_config_dir()?,
    };
    let mut layers = vec![(user_dir.join(CONFIG_FILE_NAME), ConfigLayer::User)];
    if let Some(root) = &options.workspace_root {
        layers.push((
            root.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME),
            ConfigLayer::Workspace,
        ));
    }

    for (path, layer) in layers {
        if let Some(overlay) = try_load_file(&path)? {
            deep_merge_tracking(&mut merged, &overlay, "", layer, &mut field_sources);
            info!(path = %path.display(), %layer, "Loaded config file");
            loaded_files.push(path);
        }
    }

    let applied = apply_env_overrides(&mut merged, &mut field_sources, &options.env_vars)?;
    if applied > 0 {
        debug!(count = applied, "Applied environment overrides");
    }

    let config: Config = merged
        .try_into()
        .map_err(|source: toml::de::Error| ConfigError::ParseError {
            path: "<merged config>".to_owned(),
            source,
        })?;
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load a single file over the defaults, without other layers.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is missing, too large, malformed
/// or invalid.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
        path: path.display().to_string(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    })?;
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|source| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source,
        })?;
    deep_merge_tracking(
        &mut merged,
        &overlay,
        "",
        ConfigLayer::User,
        &mut FieldSources::new(),
    );
    let config: Config = merged
        .try_into()
        .map_err(|source: toml::de::Error| ConfigError::ParseError {
            path: path.display().to_string(),
            source,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

/// `~/.skillbox`.
///
/// # Errors
///
/// Returns [`ConfigError::NoHomeDir`] when no home directory is known.
pub fn user_config_dir() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(CONFIG_DIR_NAME))
        .ok_or(ConfigError::NoHomeDir)
}

fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source,
            });
        },
    };
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                metadata.len()
            ),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.display().to_string(),
        source,
    })?;
    let value = toml::from_str(&content).map_err(|source| ConfigError::ParseError {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Some(value))
}

fn record_defaults(value: &toml::Value, prefix: &str, sources: &mut FieldSources) {
    if let toml::Value::Table(table) = value {
        for (key, child) in table {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            record_defaults(child, &path, sources);
        }
    } else {
        sources.insert(prefix.to_owned(), ConfigLayer::Defaults);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, body: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(CONFIG_FILE_NAME), body).unwrap();
    }

    fn options(home: &Path, workspace: Option<&Path>) -> LoadOptions {
        LoadOptions {
            workspace_root: workspace.map(Path::to_path_buf),
            home_override: Some(home.to_path_buf()),
            env_vars: HashMap::new(),
        }
    }

    #[test]
    fn embedded_defaults_match_struct_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let resolved = load_with(&options(tmp.path(), None)).unwrap();
        assert_eq!(resolved.config, Config::default());
        assert!(resolved.loaded_files.is_empty());
        assert_eq!(
            resolved.source_of("sandbox.timeout_ms"),
            Some(ConfigLayer::Defaults)
        );
    }

    #[test]
    fn workspace_beats_user_and_env_beats_both() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path().join("home");
        let ws = tmp.path().join("ws");
        write(&home, "[sandbox]\ntimeout_ms = 1000\neval_timeout_ms = 700\n");
        write(
            &ws.join(CONFIG_DIR_NAME),
            "[sandbox]\ntimeout_ms = 2000\n[logging]\nlevel = \"debug\"\n",
        );

        let mut opts = options(&home, Some(&ws));
        opts.env_vars
            .insert("SKILLBOX_LOG_LEVEL".into(), "warn".into());
        let resolved = load_with(&opts).unwrap();

        assert_eq!(resolved.config.sandbox.timeout_ms, 2000);
        assert_eq!(resolved.config.sandbox.eval_timeout_ms, 700);
        assert_eq!(resolved.config.logging.level, "warn");
        assert_eq!(resolved.loaded_files.len(), 2);
        assert_eq!(
            resolved.source_of("sandbox.timeout_ms"),
            Some(ConfigLayer::Workspace)
        );
        assert_eq!(
            resolved.source_of("sandbox.eval_timeout_ms"),
            Some(ConfigLayer::User)
        );
        assert_eq!(
            resolved.source_of("logging.level"),
            Some(ConfigLayer::Environment)
        );
    }

    #[test]
    fn interpreters_table_merges_per_extension() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "[sandbox.interpreters]\nrb = [\"ruby\"]\npy = [\"python3.12\"]\n");
        let config = load_with(&options(tmp.path(), None)).unwrap().config;

        let interpreters = &config.sandbox.interpreters;
        assert_eq!(interpreters["rb"], vec!["ruby".to_owned()]);
        assert_eq!(interpreters["py"], vec!["python3.12".to_owned()]);
        assert_eq!(interpreters["sh"], vec!["sh".to_owned()]);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "[sandbox\ntimeout_ms = ");
        let err = load_with(&options(tmp.path(), None)).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }), "{err:?}");
    }

    #[test]
    fn wrong_type_is_reported_after_merge() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "[sandbox]\ntimeout_ms = \"soon\"\n");
        let err = load_with(&options(tmp.path(), None)).unwrap_err();
        assert!(
            matches!(err, ConfigError::ParseError { ref path, .. } if path == "<merged config>"),
            "{err:?}"
        );
    }

    #[test]
    fn invalid_values_fail_validation() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "[sandbox]\ntimeout_ms = 0\n");
        let err = load_with(&options(tmp.path(), None)).unwrap_err();
        assert!(
            matches!(err, ConfigError::ValidationError { ref field, .. } if field == "sandbox.timeout_ms")
        );
    }

    #[test]
    fn oversized_file_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let padding = "#".repeat(usize::try_from(MAX_CONFIG_FILE_SIZE).unwrap() + 1);
        write(tmp.path(), &padding);
        assert!(matches!(
            load_with(&options(tmp.path(), None)),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn load_file_layers_over_defaults_only() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("custom.toml");
        std::fs::write(&path, "[manager]\nnpm_command = \"pnpm\"\n").unwrap();

        let config = load_file(&path).unwrap();
        assert_eq!(config.manager.npm_command, "pnpm");
        assert!(config.manager.auto_load_builtin);

        let missing = load_file(&tmp.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::ReadError { .. }));
    }

    #[test]
    fn rendered_toml_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let resolved = load_with(&options(tmp.path(), None)).unwrap();
        let rendered = resolved.to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, resolved.config);
    }
}
