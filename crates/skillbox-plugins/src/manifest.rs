//! Skill manifest types.
//!
//! A skill manifest (`skill.json`) describes a skill's identity, its entry
//! point, the symbol its entry exports, and the parameters `execute` accepts.
//! Manifests are read during load and install, and copied into registry
//! entries.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SkillError, SkillResult};
use crate::version::Version;

/// Standard manifest file name inside a skill directory.
pub const MANIFEST_FILE_NAME: &str = "skill.json";

/// Optional per-skill configuration file passed to the skill factory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// A skill manifest loaded from `skill.json`.
///
/// Required string fields default to empty so that a missing field is
/// reported by [`SkillManifest::validate`] with the field name instead of a
/// generic parse error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillManifest {
    /// Unique skill identifier.
    #[serde(default)]
    pub id: String,
    /// Human-readable display name.
    #[serde(default)]
    pub name: String,
    /// `major.minor.patch` version string.
    #[serde(default)]
    pub version: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Entry file, relative to the skill directory.
    #[serde(default)]
    pub entry: String,
    /// Symbol exported by the entry (the catalog key for in-process skills).
    #[serde(default)]
    pub main: String,
    /// Search keywords, also used for category inference.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Optional author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Optional license identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Optional source repository URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Declared permissions (informational).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    /// Other skills this one depends on, id to version requirement.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    /// Host runtime requirements (e.g. `node`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub engines: BTreeMap<String, String>,
    /// Schema for the parameters accepted by `execute`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<ParameterSchema>,
}

/// Object schema for skill parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Always `object` in practice.
    #[serde(rename = "type", default = "default_schema_type")]
    pub schema_type: String,
    /// Declared properties.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    /// Names of required properties.
    #[serde(default)]
    pub required: Vec<String>,
}

fn default_schema_type() -> String {
    "object".to_string()
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self {
            schema_type: default_schema_type(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }
}

/// Schema for one parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// JSON type name (`string`, `number`, `integer`, `boolean`, `array`, `object`, `null`).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allowed values.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    /// Any other schema keywords, preserved as written.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ParameterSchema {
    /// Check call parameters against this schema.
    ///
    /// Required names are checked first, even when no properties are
    /// declared. Declared types are then checked for every present value.
    ///
    /// # Errors
    ///
    /// Returns [`SkillError::Validation`] naming the first offending parameter.
    pub fn validate(&self, params: &Value) -> SkillResult<()> {
        if self.required.is_empty() && self.properties.is_empty() {
            return Ok(());
        }

        let empty = serde_json::Map::new();
        let object = match params {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(SkillError::Validation(format!(
                    "Parameters must be an object, got {}",
                    json_type_name(other)
                )));
            },
        };

        for field in &self.required {
            if !object.contains_key(field) {
                return Err(SkillError::Validation(format!(
                    "Missing required parameter: {field}"
                )));
            }
        }

        for (key, spec) in &self.properties {
            let (Some(value), Some(expected)) = (object.get(key), spec.kind.as_deref()) else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(SkillError::Validation(format!(
                    "Invalid type for {key}: expected {expected}, got {}",
                    json_type_name(value)
                )));
            }
        }

        Ok(())
    }
}

/// JSON Schema type name of a value.
#[must_use]
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[allow(clippy::float_cmp)]
fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        // Any number without a fractional part, so `2.0` counts.
        "integer" => value.as_f64().is_some_and(|f| f.fract() == 0.0),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type names are not enforced.
        _ => true,
    }
}

/// Whether `id` is a well-formed skill identifier.
///
/// Lowercase ASCII letters, digits, `-` and `_`, not starting or ending with
/// a separator.
#[must_use]
pub fn is_valid_skill_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_'))
        && !id.starts_with(['-', '_'])
        && !id.ends_with(['-', '_'])
}

impl SkillManifest {
    /// Validate required fields and their formats.
    ///
    /// # Errors
    ///
    /// Returns [`SkillError::Validation`] describing the first problem found.
    pub fn validate(&self) -> SkillResult<()> {
        let required = [
            ("id", &self.id),
            ("name", &self.name),
            ("version", &self.version),
            ("entry", &self.entry),
            ("main", &self.main),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(SkillError::Validation(format!(
                    "Missing required field in {MANIFEST_FILE_NAME}: {field}"
                )));
            }
        }

        if !is_valid_skill_id(&self.id) {
            return Err(SkillError::Validation(format!(
                "invalid skill id '{}': use lowercase letters, digits, '-' or '_'",
                self.id
            )));
        }

        self.parsed_version()?;

        let entry = Path::new(&self.entry);
        let escapes = entry
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(SkillError::Validation(format!(
                "entry must be a relative path inside the skill directory: '{}'",
                self.entry
            )));
        }

        if let Some(schema) = &self.parameters
            && schema.schema_type != "object"
        {
            return Err(SkillError::Validation(format!(
                "parameters schema must have type 'object', got '{}'",
                schema.schema_type
            )));
        }

        Ok(())
    }

    /// Parse the manifest version.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the version is not `major.minor.patch`.
    pub fn parsed_version(&self) -> SkillResult<Version> {
        self.version.parse()
    }

    /// Validate call parameters against the declared schema, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SkillError::Validation`] on a missing or mistyped parameter.
    pub fn validate_params(&self, params: &Value) -> SkillResult<()> {
        match &self.parameters {
            Some(schema) => schema.validate(params),
            None => Ok(()),
        }
    }

    /// Content checksum over the canonical JSON encoding of the manifest.
    #[must_use]
    pub fn checksum(&self) -> String {
        // Struct field order is fixed and maps are ordered, so the encoding is stable.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        format!("blake3:{}", blake3::hash(&bytes).to_hex())
    }
}

/// Read and parse `skill.json` from a skill directory.
///
/// The manifest is parsed but not validated.
///
/// # Errors
///
/// Returns [`SkillError::Manifest`] if the file is missing or not valid JSON.
pub fn load_manifest(skill_dir: &Path) -> SkillResult<SkillManifest> {
    let path = skill_dir.join(MANIFEST_FILE_NAME);
    let content = std::fs::read_to_string(&path).map_err(|e| SkillError::Manifest {
        path: path.clone(),
        message: format!("failed to read: {e}"),
    })?;
    serde_json::from_str(&content).map_err(|e| SkillError::Manifest {
        path,
        message: e.to_string(),
    })
}

/// Read the optional `config.json` next to the manifest.
///
/// Returns an empty object when the file does not exist.
///
/// # Errors
///
/// Returns [`SkillError::Manifest`] if the file exists but is not valid JSON.
pub fn load_skill_config(skill_dir: &Path) -> SkillResult<Value> {
    let path = skill_dir.join(CONFIG_FILE_NAME);
    match std::fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content).map_err(|e| SkillError::Manifest {
            path,
            message: e.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(Value::Object(serde_json::Map::new()))
        },
        Err(e) => Err(SkillError::Manifest {
            path,
            message: format!("failed to read: {e}"),
        }),
    }
}
