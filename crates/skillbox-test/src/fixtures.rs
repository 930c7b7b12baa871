//! Skill manifest and directory fixtures.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};

/// Manifest file name written by the fixtures.
pub const MANIFEST_FILE: &str = "skill.json";

/// Builder for `skill.json` contents.
///
/// Defaults: name = ID, version `1.0.0`, entry `index.js`, main `Main`.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    fields: Map<String, Value>,
    properties: Map<String, Value>,
    required: Vec<String>,
    entry_source: Option<String>,
}

impl ManifestBuilder {
    /// Start a manifest for `id`.
    #[must_use]
    pub fn new(id: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("id".into(), json!(id));
        fields.insert("name".into(), json!(id));
        fields.insert("version".into(), json!("1.0.0"));
        fields.insert("entry".into(), json!("index.js"));
        fields.insert("main".into(), json!("Main"));
        Self {
            fields,
            properties: Map::new(),
            required: Vec::new(),
            entry_source: None,
        }
    }

    /// Set any top-level field.
    #[must_use]
    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Remove a top-level field, e.g. to produce an invalid manifest.
    #[must_use]
    pub fn without(mut self, key: &str) -> Self {
        self.fields.remove(key);
        self
    }

    /// Display name.
    #[must_use]
    pub fn name(self, name: &str) -> Self {
        self.field("name", json!(name))
    }

    /// Version string.
    #[must_use]
    pub fn version(self, version: &str) -> Self {
        self.field("version", json!(version))
    }

    /// Entry file, relative to the skill directory.
    #[must_use]
    pub fn entry(self, entry: &str) -> Self {
        self.field("entry", json!(entry))
    }

    /// Exported symbol.
    #[must_use]
    pub fn main(self, main: &str) -> Self {
        self.field("main", json!(main))
    }

    /// Description.
    #[must_use]
    pub fn description(self, description: &str) -> Self {
        self.field("description", json!(description))
    }

    /// Keywords.
    #[must_use]
    pub fn keywords(self, keywords: &[&str]) -> Self {
        self.field("keywords", json!(keywords))
    }

    /// Declared dependency on another skill.
    #[must_use]
    pub fn dependency(mut self, id: &str, requirement: &str) -> Self {
        let deps = self
            .fields
            .entry("dependencies")
            .or_insert_with(|| json!({}));
        if let Some(deps) = deps.as_object_mut() {
            deps.insert(id.into(), json!(requirement));
        }
        self
    }

    /// Optional parameter of the given JSON type.
    #[must_use]
    pub fn param(mut self, name: &str, kind: &str) -> Self {
        self.properties.insert(name.into(), json!({ "type": kind }));
        self
    }

    /// Required parameter of the given JSON type.
    #[must_use]
    pub fn required_param(mut self, name: &str, kind: &str) -> Self {
        self.required.push(name.into());
        self.param(name, kind)
    }

    /// Contents written to the entry file by [`ManifestBuilder::write_to`].
    #[must_use]
    pub fn entry_source(mut self, source: &str) -> Self {
        self.entry_source = Some(source.into());
        self
    }

    /// The manifest as JSON.
    #[must_use]
    pub fn build(&self) -> Value {
        let mut out = self.fields.clone();
        if !self.properties.is_empty() || !self.required.is_empty() {
            out.insert(
                "parameters".into(),
                json!({
                    "type": "object",
                    "properties": self.properties,
                    "required": self.required,
                }),
            );
        }
        Value::Object(out)
    }

    /// Write `<parent>/<id>/skill.json` plus the entry file.
    ///
    /// Returns the skill directory.
    ///
    /// # Panics
    ///
    /// Panics if the ID is missing or the files cannot be written.
    #[must_use]
    pub fn write_to(&self, parent: &Path) -> PathBuf {
        let id = self
            .fields
            .get("id")
            .and_then(Value::as_str)
            .expect("manifest fixture has no id");
        self.write_as(&parent.join(id))
    }

    /// Write the skill into `dir` regardless of its declared ID.
    ///
    /// # Panics
    ///
    /// Panics if the files cannot be written.
    #[must_use]
    pub fn write_as(&self, dir: &Path) -> PathBuf {
        write_manifest(dir, &self.build());
        if let Some(entry) = self.fields.get("entry").and_then(Value::as_str) {
            let source = self
                .entry_source
                .as_deref()
                .unwrap_or("module.exports = {};\n");
            write_file(dir, entry, source);
        }
        dir.to_path_buf()
    }
}

/// Write `manifest` as `<dir>/skill.json`, creating `dir`.
///
/// # Panics
///
/// Panics if the file cannot be written.
pub fn write_manifest(dir: &Path, manifest: &Value) -> PathBuf {
    let text = serde_json::to_string_pretty(manifest).expect("manifest fixture serializes");
    write_file(dir, MANIFEST_FILE, &text)
}

/// Write `<dir>/<name>`, creating parent directories.
///
/// # Panics
///
/// Panics if the file cannot be written.
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write file");
    path
}

/// Number of regular files beneath `dir`, or 0 if it does not exist.
#[must_use]
pub fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .map(|e| {
            let path = e.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let manifest = ManifestBuilder::new("echo").build();
        assert_eq!(manifest["id"], "echo");
        assert_eq!(manifest["name"], "echo");
        assert_eq!(manifest["entry"], "index.js");
        assert!(manifest.get("parameters").is_none());
    }

    #[test]
    fn builder_parameters_and_deps() {
        let manifest = ManifestBuilder::new("echo")
            .required_param("text", "string")
            .param("count", "integer")
            .dependency("base", ">=1.0.0")
            .build();
        assert_eq!(manifest["parameters"]["required"], json!(["text"]));
        assert_eq!(manifest["parameters"]["properties"]["count"]["type"], "integer");
        assert_eq!(manifest["dependencies"]["base"], ">=1.0.0");
    }

    #[test]
    fn write_to_creates_skill_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ManifestBuilder::new("echo").write_to(tmp.path());
        assert_eq!(dir, tmp.path().join("echo"));
        assert!(dir.join(MANIFEST_FILE).is_file());
        assert!(dir.join("index.js").is_file());
        assert_eq!(count_files(&dir), 2);
    }

    #[test]
    fn count_files_missing_dir() {
        assert_eq!(count_files(Path::new("/definitely/not/here")), 0);
    }
}
