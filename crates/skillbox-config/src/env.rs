//! `SKILLBOX_*` environment overrides.
//!
//! Environment variables sit above every file layer: a set variable always
//! wins. The value is coerced to the type already present at the target
//! path, so `SKILLBOX_SANDBOX_TIMEOUT_MS=500` becomes an integer and
//! `SKILLBOX_SANDBOX_ALLOWED_DIRS=a,b` an array.

use std::collections::HashMap;
use std::hash::BuildHasher;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources};

/// Selects the directory holding the user config file.
pub const HOME_VAR: &str = "SKILLBOX_HOME";

/// Environment variable and the dotted field it sets.
const ENV_MAPPINGS: &[(&str, &str)] = &[
    ("SKILLBOX_SKILLS_DIR", "paths.skills_dir"),
    ("SKILLBOX_REGISTRY_FILE", "paths.registry_file"),
    ("SKILLBOX_TEMP_DIR", "paths.temp_dir"),
    ("SKILLBOX_SANDBOX_TIMEOUT_MS", "sandbox.timeout_ms"),
    ("SKILLBOX_SANDBOX_EVAL_TIMEOUT_MS", "sandbox.eval_timeout_ms"),
    ("SKILLBOX_SANDBOX_ALLOWED_DIRS", "sandbox.allowed_dirs"),
    ("SKILLBOX_SANDBOX_MAX_PAYLOAD_BYTES", "sandbox.max_payload_bytes"),
    ("SKILLBOX_SANDBOX_NETWORK", "sandbox.network"),
    ("SKILLBOX_SANDBOX_MEMORY_LIMIT_MB", "sandbox.memory_limit_mb"),
    ("SKILLBOX_SANDBOX_RESTRICT_FS", "sandbox.restrict_filesystem"),
    ("SKILLBOX_SANDBOX_ENV_PASSTHROUGH", "sandbox.env_passthrough"),
    ("SKILLBOX_AUTO_LOAD_BUILTIN", "manager.auto_load_builtin"),
    ("SKILLBOX_INSTALL_PACKAGES", "manager.install_packages"),
    ("SKILLBOX_NPM_COMMAND", "manager.npm_command"),
    ("SKILLBOX_DEPENDENCY_TIMEOUT_SECS", "manager.dependency_timeout_secs"),
    ("SKILLBOX_MARKETPLACE_INDEX", "marketplace.index"),
    ("SKILLBOX_LOG_LEVEL", "logging.level"),
    ("SKILLBOX_LOG_FORMAT", "logging.format"),
    ("SKILLBOX_LOG_DIR", "logging.directory"),
];

/// Apply every mapped variable present in `env_vars` on top of `merged`.
///
/// Returns the number of variables applied.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] when a value cannot be coerced to the
/// field's type.
pub fn apply_env_overrides<S: BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<usize> {
    let mut applied: usize = 0;
    for (var_name, field_path) in ENV_MAPPINGS {
        let Some(raw) = env_vars.get(*var_name) else {
            continue;
        };
        set_field(merged, field_path, raw).map_err(|message| ConfigError::EnvError {
            var_name: (*var_name).to_owned(),
            message,
        })?;
        debug!(var = var_name, field = field_path, "Applied environment override");
        sources.insert((*field_path).to_owned(), ConfigLayer::Environment);
        applied = applied.saturating_add(1);
    }
    Ok(applied)
}

/// Names of all recognised variables, for diagnostics.
#[must_use]
pub fn known_variables() -> Vec<&'static str> {
    let mut names: Vec<&str> = ENV_MAPPINGS.iter().map(|(name, _)| *name).collect();
    names.push(HOME_VAR);
    names
}

fn set_field(root: &mut toml::Value, path: &str, raw: &str) -> Result<(), String> {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };

    let mut table = root
        .as_table_mut()
        .ok_or_else(|| "configuration root is not a table".to_owned())?;
    for segment in parents.into_iter().flat_map(|p| p.split('.')) {
        table = table
            .entry(segment)
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()))
            .as_table_mut()
            .ok_or_else(|| format!("'{segment}' is not a table"))?;
    }

    let value = coerce(table.get(leaf), raw)?;
    table.insert(leaf.to_owned(), value);
    Ok(())
}

fn coerce(existing: Option<&toml::Value>, raw: &str) -> Result<toml::Value, String> {
    let raw = raw.trim();
    match existing {
        Some(toml::Value::Integer(_)) => raw
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|_| format!("expected an integer, got '{raw}'")),
        Some(toml::Value::Boolean(_)) => parse_bool(raw)
            .map(toml::Value::Boolean)
            .ok_or_else(|| format!("expected true or false, got '{raw}'")),
        Some(toml::Value::Array(_)) => Ok(toml::Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| toml::Value::String(s.to_owned()))
                .collect(),
        )),
        _ => Ok(toml::Value::String(raw.to_owned())),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> toml::Value {
        toml::from_str(
            "[sandbox]\ntimeout_ms = 30000\nnetwork = true\nallowed_dirs = [\"skills\"]\n\
             [logging]\nlevel = \"info\"\n",
        )
        .unwrap()
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn overrides_are_typed_by_existing_value() {
        let mut merged = base();
        let mut sources = FieldSources::new();
        let env = vars(&[
            ("SKILLBOX_SANDBOX_TIMEOUT_MS", "500"),
            ("SKILLBOX_SANDBOX_NETWORK", "off"),
            ("SKILLBOX_SANDBOX_ALLOWED_DIRS", "/a, /b"),
            ("SKILLBOX_LOG_LEVEL", "debug"),
        ]);

        let applied = apply_env_overrides(&mut merged, &mut sources, &env).unwrap();

        assert_eq!(applied, 4);
        assert_eq!(merged["sandbox"]["timeout_ms"].as_integer(), Some(500));
        assert_eq!(merged["sandbox"]["network"].as_bool(), Some(false));
        assert_eq!(merged["sandbox"]["allowed_dirs"].as_array().map(Vec::len), Some(2));
        assert_eq!(merged["logging"]["level"].as_str(), Some("debug"));
        assert_eq!(
            sources.get("sandbox.timeout_ms"),
            Some(&ConfigLayer::Environment)
        );
    }

    #[test]
    fn override_wins_over_file_layers() {
        let mut merged = base();
        let mut sources = FieldSources::new();
        sources.insert("logging.level".into(), ConfigLayer::Workspace);

        apply_env_overrides(&mut merged, &mut sources, &vars(&[("SKILLBOX_LOG_LEVEL", "warn")]))
            .unwrap();

        assert_eq!(merged["logging"]["level"].as_str(), Some("warn"));
        assert_eq!(sources.get("logging.level"), Some(&ConfigLayer::Environment));
    }

    #[test]
    fn bad_integer_names_the_variable() {
        let mut merged = base();
        let err = apply_env_overrides(
            &mut merged,
            &mut FieldSources::new(),
            &vars(&[("SKILLBOX_SANDBOX_TIMEOUT_MS", "soon")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::EnvError { ref var_name, .. } if var_name == "SKILLBOX_SANDBOX_TIMEOUT_MS"));
    }

    #[test]
    fn missing_sections_are_created() {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        apply_env_overrides(
            &mut merged,
            &mut FieldSources::new(),
            &vars(&[("SKILLBOX_MARKETPLACE_INDEX", "https://example.com/index.json")]),
        )
        .unwrap();
        assert_eq!(
            merged["marketplace"]["index"].as_str(),
            Some("https://example.com/index.json")
        );
    }

    #[test]
    fn unrelated_variables_are_ignored() {
        let mut merged = base();
        let applied = apply_env_overrides(
            &mut merged,
            &mut FieldSources::new(),
            &vars(&[("PATH", "/bin"), ("SKILLBOX_UNKNOWN", "x")]),
        )
        .unwrap();
        assert_eq!(applied, 0);
        assert!(known_variables().contains(&HOME_VAR));
    }
}
