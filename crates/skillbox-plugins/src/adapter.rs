//! Tool-calling protocol adapter.
//!
//! Exposes loaded skills as tools named `<skill id>_execute`, each with a
//! JSON Schema input description, and dispatches tool calls back to the
//! [`SkillLoader`]. The adapter only caches descriptors; the loader stays
//! the source of truth.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::error::{SkillError, SkillResult};
use crate::loader::{ExecutableSkill, ExecutionOutput, SkillLoader};
use crate::manifest::{ParameterSchema, is_valid_skill_id};

/// Suffix of every tool name.
pub const TOOL_SUFFIX: &str = "_execute";

/// Description used when a skill has none.
pub const DEFAULT_TOOL_DESCRIPTION: &str = "A skill plugin";

/// Primitive JSON Schema types passed through unchanged.
const SCHEMA_TYPES: &[&str] = &["string", "number", "integer", "boolean", "array", "object"];

/// A tool as advertised to the protocol peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// `<skill id>_execute`.
    pub name: String,
    /// Skill description.
    pub description: String,
    /// `{type: "object", properties, required}`.
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Describe a loaded skill.
    #[must_use]
    pub fn from_skill(skill: &ExecutableSkill) -> Self {
        Self {
            name: tool_name(&skill.id),
            description: skill
                .description
                .clone()
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| DEFAULT_TOOL_DESCRIPTION.to_string()),
            input_schema: input_schema(skill.parameters.as_ref()),
        }
    }
}

/// Tool name for a skill.
#[must_use]
pub fn tool_name(skill_id: &str) -> String {
    format!("{skill_id}{TOOL_SUFFIX}")
}

/// Skill ID named by a tool.
///
/// # Errors
///
/// Returns [`SkillError::Format`] unless the name is a valid skill ID
/// followed by `_execute`.
pub fn parse_tool_name(name: &str) -> SkillResult<&str> {
    name.strip_suffix(TOOL_SUFFIX)
        .filter(|id| is_valid_skill_id(id))
        .ok_or_else(|| SkillError::Format(format!("invalid tool name: '{name}'")))
}

fn map_type(kind: Option<&str>) -> &'static str {
    kind.map(str::to_ascii_lowercase)
        .and_then(|k| SCHEMA_TYPES.iter().find(|t| **t == k).copied())
        .unwrap_or("string")
}

fn input_schema(params: Option<&ParameterSchema>) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    if let Some(schema) = params {
        for (name, prop) in &schema.properties {
            let mut out = Map::new();
            out.insert("type".into(), json!(map_type(prop.kind.as_deref())));
            out.insert(
                "description".into(),
                json!(prop.description.clone().unwrap_or_default()),
            );
            if let Some(allowed) = &prop.allowed {
                out.insert("enum".into(), json!(allowed));
            }
            properties.insert(name.clone(), Value::Object(out));
        }
        required.clone_from(&schema.required);
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Translates between tool calls and skill executions.
#[derive(Debug, Clone)]
pub struct ProtocolAdapter {
    server_name: String,
    server_version: String,
    tools: BTreeMap<String, ToolDescriptor>,
}

impl Default for ProtocolAdapter {
    fn default() -> Self {
        Self::new("skillbox", env!("CARGO_PKG_VERSION"))
    }
}

impl ProtocolAdapter {
    /// Create an adapter advertising itself under `name` and `version`.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            server_name: name.into(),
            server_version: version.into(),
            tools: BTreeMap::new(),
        }
    }

    /// Rebuild the tool map from the skills currently loaded.
    ///
    /// Returns the number of tools.
    pub fn register_all(&mut self, loader: &SkillLoader) -> usize {
        self.tools = loader
            .executable()
            .iter()
            .map(ToolDescriptor::from_skill)
            .map(|tool| (tool.name.clone(), tool))
            .collect();
        info!(tools = self.tools.len(), "Registered skill tools");
        self.tools.len()
    }

    /// Every registered tool, by name.
    #[must_use]
    pub fn tools(&self) -> Vec<&ToolDescriptor> {
        self.tools.values().collect()
    }

    /// One tool by name.
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// Dispatch a tool call.
    ///
    /// The name format is checked before anything else, then the tool
    /// lookup, then the loader runs the skill with `{tool: name}` as its
    /// context.
    ///
    /// # Errors
    ///
    /// [`SkillError::Format`] for a malformed name, [`SkillError::NotFound`]
    /// for an unregistered tool, or the loader's error.
    pub async fn call_tool(
        &self,
        loader: &SkillLoader,
        name: &str,
        arguments: Value,
    ) -> SkillResult<ExecutionOutput> {
        let skill_id = parse_tool_name(name)?;
        if !self.tools.contains_key(name) {
            return Err(SkillError::NotFound(format!("tool {name}")));
        }
        debug!(tool = %name, skill_id = %skill_id, "Dispatching tool call");
        loader
            .execute(skill_id, arguments, json!({ "tool": name }))
            .await
    }

    /// Server description: name, version, tools and capabilities.
    #[must_use]
    pub fn server_manifest(&self) -> Value {
        json!({
            "name": self.server_name,
            "version": self.server_version,
            "tools": self.tools(),
            "capabilities": {
                "tools": { "list": true, "call": true }
            },
        })
    }

    /// Serve one protocol request.
    ///
    /// `tools/list` returns `{tools}`. `tools/call` takes `{name, arguments}`
    /// and returns the execution output as a single text content block.
    ///
    /// # Errors
    ///
    /// [`SkillError::Format`] for an unknown method or missing tool name,
    /// otherwise as for [`ProtocolAdapter::call_tool`].
    pub async fn handle_request(
        &self,
        loader: &SkillLoader,
        method: &str,
        params: Value,
    ) -> SkillResult<Value> {
        match method {
            "tools/list" => Ok(json!({ "tools": self.tools() })),
            "tools/call" => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| SkillError::Format("tools/call requires a tool name".into()))?;
                let arguments = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let output = self.call_tool(loader, name, arguments).await?;
                let text = serde_json::to_string_pretty(&output)?;
                Ok(json!({
                    "content": [{ "type": "text", "text": text }]
                }))
            },
            other => Err(SkillError::Format(format!("unknown method: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PropertySchema;

    #[test]
    fn tool_name_parsing() {
        assert_eq!(parse_tool_name("echo_execute").unwrap(), "echo");
        assert_eq!(parse_tool_name("web_search_execute").unwrap(), "web_search");
        for bad in ["echo", "_execute", "Echo_execute", "../x_execute", "echo_run"] {
            assert!(
                matches!(parse_tool_name(bad), Err(SkillError::Format(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn descriptor_maps_types_and_defaults() {
        let mut properties = BTreeMap::new();
        properties.insert(
            "city".to_string(),
            PropertySchema {
                kind: Some("String".into()),
                description: Some("City name".into()),
                ..PropertySchema::default()
            },
        );
        properties.insert(
            "units".to_string(),
            PropertySchema {
                kind: Some("enum-ish".into()),
                allowed: Some(vec![json!("metric"), json!("imperial")]),
                ..PropertySchema::default()
            },
        );
        let skill = ExecutableSkill {
            id: "weather".into(),
            name: "Weather".into(),
            description: None,
            parameters: Some(ParameterSchema {
                properties,
                required: vec!["city".into()],
                ..ParameterSchema::default()
            }),
        };

        let tool = ToolDescriptor::from_skill(&skill);
        assert_eq!(tool.name, "weather_execute");
        assert_eq!(tool.description, DEFAULT_TOOL_DESCRIPTION);
        assert_eq!(tool.input_schema["type"], "object");
        assert_eq!(tool.input_schema["properties"]["city"]["type"], "string");
        assert_eq!(tool.input_schema["properties"]["units"]["type"], "string");
        assert_eq!(tool.input_schema["properties"]["units"]["enum"][1], "imperial");
        assert_eq!(tool.input_schema["required"][0], "city");

        let wire = serde_json::to_value(&tool).unwrap();
        assert!(wire.get("inputSchema").is_some());
    }

    #[test]
    fn schemaless_skill_gets_empty_object_schema() {
        let skill = ExecutableSkill {
            id: "ping".into(),
            name: "Ping".into(),
            description: Some("Replies".into()),
            parameters: None,
        };
        let tool = ToolDescriptor::from_skill(&skill);
        assert_eq!(
            tool.input_schema,
            json!({"type": "object", "properties": {}, "required": []})
        );
    }

    #[test]
    fn manifest_advertises_capabilities() {
        let adapter = ProtocolAdapter::new("skillbox", "0.1.0");
        let manifest = adapter.server_manifest();
        assert_eq!(manifest["name"], "skillbox");
        assert_eq!(manifest["capabilities"]["tools"]["call"], true);
        assert_eq!(manifest["tools"], json!([]));
    }

    #[tokio::test]
    async fn format_is_checked_before_lookup() {
        let loader = SkillLoader::new("/nonexistent", crate::catalog::SkillCatalog::new());
        let adapter = ProtocolAdapter::default();

        let err = adapter
            .call_tool(&loader, "not a tool", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::Format(_)));

        let err = adapter
            .call_tool(&loader, "ghost_execute", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::NotFound(_)));

        let err = adapter
            .handle_request(&loader, "resources/list", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::Format(_)));
    }
}
