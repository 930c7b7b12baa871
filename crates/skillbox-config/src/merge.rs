//! Layer merging with per-field provenance.

use std::collections::BTreeMap;
use std::fmt;

/// Where a configuration value came from, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigLayer {
    /// Embedded `defaults.toml`.
    Defaults,
    /// `~/.skillbox/config.toml`.
    User,
    /// `<workspace>/.skillbox/config.toml`.
    Workspace,
    /// A `SKILLBOX_*` variable.
    Environment,
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Defaults => "defaults",
            Self::User => "user (~/.skillbox/config.toml)",
            Self::Workspace => "workspace (.skillbox/config.toml)",
            Self::Environment => "environment variable",
        })
    }
}

/// Dotted field path to the layer that last set it.
pub type FieldSources = BTreeMap<String, ConfigLayer>;

/// Merge `overlay` into `base`.
///
/// Tables merge key by key; any other overlay value replaces the base value
/// wholesale, arrays included. Every leaf the overlay touches is recorded
/// in `sources` under its dotted path.
pub fn deep_merge_tracking(
    base: &mut toml::Value,
    overlay: &toml::Value,
    prefix: &str,
    layer: ConfigLayer,
    sources: &mut FieldSources,
) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                let path = join_path(prefix, key);
                match base_table.get_mut(key) {
                    Some(existing) if value.is_table() && existing.is_table() => {
                        deep_merge_tracking(existing, value, &path, layer, sources);
                    },
                    Some(existing) => {
                        *existing = value.clone();
                        sources.insert(path, layer);
                    },
                    None => {
                        base_table.insert(key.clone(), value.clone());
                        record_leaves(value, &path, layer, sources);
                    },
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
            sources.insert(prefix.to_owned(), layer);
        },
    }
}

fn record_leaves(value: &toml::Value, path: &str, layer: ConfigLayer, sources: &mut FieldSources) {
    match value {
        toml::Value::Table(table) => {
            for (key, child) in table {
                record_leaves(child, &join_path(path, key), layer, sources);
            }
        },
        _ => {
            sources.insert(path.to_owned(), layer);
        },
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}
