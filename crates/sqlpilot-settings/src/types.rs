//! Settings groups. Every group deserializes with defaults for missing keys,
//! so a partial user file is always valid.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SqlPilotSettings {
    pub model: ModelSettings,
    pub database: DatabaseSettings,
    pub retrieval: RetrievalSettings,
    pub agent: AgentSettings,
    pub logging: LoggingSettings,
    pub server: ServerSettings,
}

/// Language model and gateway retry settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    pub model_id: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_id: "claude-sonnet-4-5-20250929".into(),
            api_key_env: "ANTHROPIC_API_KEY".into(),
            base_url: None,
            max_tokens: 4096,
            temperature: Some(0.0),
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// SQL dialect name, matched case-insensitively when building EXPLAIN statements.
    pub dialect: String,
    pub uri: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            dialect: "SQLite".into(),
            uri: "sqlite:///Chinook.db".into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalBackend {
    #[default]
    Opensearch,
    Memory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrievalSettings {
    pub backend: RetrievalBackend,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Name of the environment variable holding the OpenSearch password.
    pub password_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neural_model_id: Option<String>,
    pub sample_index: String,
    pub schema_index: String,
    pub text_field: String,
    pub vector_field: String,
    pub sample_k: usize,
    pub schema_k: usize,
    pub column_hit_cap: usize,
    /// JSON corpus for the `memory` backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixture_path: Option<String>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            backend: RetrievalBackend::Opensearch,
            endpoint: "http://localhost:9200".into(),
            username: None,
            password_env: "OPENSEARCH_PASSWORD".into(),
            neural_model_id: None,
            sample_index: "example_queries".into(),
            schema_index: "schema_descriptions".into(),
            text_field: "text".into(),
            vector_field: "vector_field".into(),
            sample_k: 10,
            schema_k: 5,
            column_hit_cap: 10,
            fixture_path: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Language the generated answers are written in.
    pub language: String,
    pub tool_config_path: String,
    pub result_dir: String,
    pub history_messages: usize,
    pub refine_prompt: bool,
    /// Hard cap on tool-dispatch rounds per turn. `None` leaves the retry
    /// ceiling advisory only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_rounds: Option<u32>,
    pub preview_rows: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            language: "English".into(),
            tool_config_path: "config/db_tool_config.json".into(),
            result_dir: "./result_files".into(),
            history_messages: 3,
            refine_prompt: false,
            max_tool_rounds: None,
            preview_rows: 20,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directives, e.g. `"info"` or `"info,sqlpilot_llm=debug"`.
    pub level: String,
    /// JSON lines on stderr; `false` gives human-readable output.
    pub json: bool,
    pub log_to_sqlite: bool,
    pub log_db_path: String,
    /// Application store for turn-log records. Empty disables persistence.
    pub turn_log_db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: true,
            log_to_sqlite: false,
            log_db_path: "./data/logs.db".into(),
            turn_log_db_path: "./data/sqlpilot.db".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Conversations whose chat history is kept in memory; the least
    /// recently used one is dropped beyond this.
    pub max_conversations: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            max_conversations: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = SqlPilotSettings::default();
        assert_eq!(s.database.dialect, "SQLite");
        assert_eq!(s.retrieval.sample_k, 10);
        assert_eq!(s.retrieval.schema_k, 5);
        assert_eq!(s.retrieval.column_hit_cap, 10);
        assert_eq!(s.agent.history_messages, 3);
        assert_eq!(s.agent.preview_rows, 20);
        assert!(s.agent.max_tool_rounds.is_none());
    }

    #[test]
    fn camel_case_partial_file() {
        let s: SqlPilotSettings = serde_json::from_value(serde_json::json!({
            "retrieval": {"backend": "memory", "fixturePath": "kb.json"},
            "agent": {"maxToolRounds": 6}
        }))
        .unwrap();
        assert_eq!(s.retrieval.backend, RetrievalBackend::Memory);
        assert_eq!(s.retrieval.fixture_path.as_deref(), Some("kb.json"));
        assert_eq!(s.retrieval.schema_index, "schema_descriptions");
        assert_eq!(s.agent.max_tool_rounds, Some(6));
    }
}
