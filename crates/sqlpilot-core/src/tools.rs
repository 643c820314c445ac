use std::path::Path;

use serde::{Deserialize, Serialize};

/// Tool definition sent to the LLM as part of the context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolConfigError {
    #[error("failed to read tool config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse tool config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid tool config: {0}")]
    Invalid(String),
}

/// The externally maintained list of tool schemas, passed verbatim to the gateway.
///
/// Accepts the `{"tools": [{"toolSpec": {"name", "description", "inputSchema": {"json": ..}}}]}`
/// layout as well as a bare array of `{name, description, input_schema}` objects.
#[derive(Clone, Debug, Default)]
pub struct ToolConfig {
    tools: Vec<ToolDefinition>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawConfig {
    Wrapped { tools: Vec<RawTool> },
    Bare(Vec<RawTool>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTool {
    Spec {
        #[serde(rename = "toolSpec")]
        tool_spec: RawToolSpec,
    },
    Plain {
        name: String,
        description: String,
        #[serde(alias = "parameters_schema", alias = "inputSchema")]
        input_schema: serde_json::Value,
    },
}

#[derive(Deserialize)]
struct RawToolSpec {
    name: String,
    description: String,
    #[serde(rename = "inputSchema")]
    input_schema: RawInputSchema,
}

#[derive(Deserialize)]
struct RawInputSchema {
    json: serde_json::Value,
}

impl ToolConfig {
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        Self { tools }
    }

    pub fn load(path: &Path) -> Result<Self, ToolConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ToolConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ToolConfigError> {
        let raw: RawConfig = serde_json::from_str(content)?;
        let raw_tools = match raw {
            RawConfig::Wrapped { tools } | RawConfig::Bare(tools) => tools,
        };

        let mut tools = Vec::with_capacity(raw_tools.len());
        for raw_tool in raw_tools {
            let def = match raw_tool {
                RawTool::Spec { tool_spec } => ToolDefinition {
                    name: tool_spec.name,
                    description: tool_spec.description,
                    parameters_schema: tool_spec.input_schema.json,
                },
                RawTool::Plain {
                    name,
                    description,
                    input_schema,
                } => ToolDefinition {
                    name,
                    description,
                    parameters_schema: input_schema,
                },
            };
            if def.name.trim().is_empty() {
                return Err(ToolConfigError::Invalid("tool with empty name".into()));
            }
            if tools.iter().any(|t: &ToolDefinition| t.name == def.name) {
                return Err(ToolConfigError::Invalid(format!("duplicate tool: {}", def.name)));
            }
            tools.push(def);
        }

        if tools.is_empty() {
            return Err(ToolConfigError::Invalid("no tools defined".into()));
        }
        Ok(Self { tools })
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WRAPPED: &str = r#"{
        "tools": [
            {"toolSpec": {
                "name": "schema_exploration",
                "description": "Search column descriptions",
                "inputSchema": {"json": {"type": "object", "properties": {"keyword": {"type": "string"}}, "required": ["keyword"]}}
            }}
        ]
    }"#;

    #[test]
    fn parses_tool_spec_layout() {
        let config = ToolConfig::from_json(WRAPPED).unwrap();
        assert_eq!(config.names(), vec!["schema_exploration"]);
        let def = &config.definitions()[0];
        assert_eq!(def.parameters_schema["required"][0], "keyword");
    }

    #[test]
    fn parses_bare_array_layout() {
        let config = ToolConfig::from_json(
            r#"[{"name": "query_generation", "description": "d", "input_schema": {"type": "object"}}]"#,
        )
        .unwrap();
        assert_eq!(config.definitions()[0].name, "query_generation");
    }

    #[test]
    fn rejects_duplicates_and_empty() {
        let dup = r#"[{"name": "a", "description": "", "input_schema": {}},
                      {"name": "a", "description": "", "input_schema": {}}]"#;
        assert!(matches!(ToolConfig::from_json(dup), Err(ToolConfigError::Invalid(_))));
        assert!(matches!(ToolConfig::from_json("[]"), Err(ToolConfigError::Invalid(_))));
        assert!(matches!(ToolConfig::from_json("{oops"), Err(ToolConfigError::Json(_))));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ToolConfig::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ToolConfigError::Io { .. }));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools.json");
        std::fs::write(&path, WRAPPED).unwrap();
        let config = ToolConfig::load(&path).unwrap();
        assert_eq!(config.definitions().len(), 1);
    }

    #[test]
    fn shipped_config_declares_agent_tools() {
        let config = ToolConfig::from_json(include_str!("../../../config/db_tool_config.json")).unwrap();
        assert_eq!(
            config.names(),
            vec!["query_generation", "validate_and_run_queries", "schema_exploration"]
        );
        let required: Vec<&str> = config
            .definitions()
            .iter()
            .map(|d| d.parameters_schema["required"][0].as_str().unwrap())
            .collect();
        assert_eq!(required, vec!["input", "generated_query", "keyword"]);
    }
}
