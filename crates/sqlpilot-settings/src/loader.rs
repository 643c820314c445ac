//! Settings loading: compiled defaults, then a JSON file deep-merged on top,
//! then `SQLPILOT_*` environment overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{RetrievalBackend, SqlPilotSettings};

pub const CONFIG_ENV: &str = "SQLPILOT_CONFIG";
const DEFAULT_FILE: &str = "sqlpilot.json";

/// `$SQLPILOT_CONFIG`, or `./sqlpilot.json`.
pub fn settings_path() -> PathBuf {
    std::env::var(CONFIG_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_FILE), PathBuf::from)
}

pub fn load_settings() -> Result<SqlPilotSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` with env overrides. A missing file yields defaults;
/// invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SqlPilotSettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<SqlPilotSettings> {
    let defaults = serde_json::to_value(SqlPilotSettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_owned(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_owned(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

fn validate(settings: &SqlPilotSettings) -> Result<()> {
    if settings.retrieval.backend == RetrievalBackend::Memory
        && settings.retrieval.fixture_path.is_none()
    {
        return Err(SettingsError::Invalid {
            field: "retrieval.fixturePath",
            reason: "required for the memory backend".into(),
        });
    }
    if settings.agent.max_tool_rounds == Some(0) {
        return Err(SettingsError::Invalid {
            field: "agent.maxToolRounds",
            reason: "must be at least 1".into(),
        });
    }
    if settings.server.max_conversations == 0 {
        return Err(SettingsError::Invalid {
            field: "server.maxConversations",
            reason: "must be at least 1".into(),
        });
    }
    Ok(())
}

/// Invalid values are ignored with a warning, falling back to file/default.
pub fn apply_env_overrides(settings: &mut SqlPilotSettings) {
    // model
    if let Some(v) = read_env_string("SQLPILOT_MODEL_ID") {
        settings.model.model_id = v;
    }
    if let Some(v) = read_env_string("SQLPILOT_BASE_URL") {
        settings.model.base_url = Some(v);
    }
    if let Some(v) = read_env_number("SQLPILOT_MAX_TOKENS", 1u32..=200_000) {
        settings.model.max_tokens = v;
    }
    if let Some(v) = read_env_number("SQLPILOT_MAX_RETRIES", 0u32..=10) {
        settings.model.max_retries = v;
    }

    // database
    if let Some(v) = read_env_string("SQLPILOT_DIALECT") {
        settings.database.dialect = v;
    }
    if let Some(v) = read_env_string("SQLPILOT_DATABASE_URI") {
        settings.database.uri = v;
    }

    // retrieval
    if let Some(v) = read_env_string("SQLPILOT_RETRIEVAL_BACKEND") {
        match serde_json::from_value(Value::String(v.to_lowercase())) {
            Ok(backend) => settings.retrieval.backend = backend,
            Err(_) => warn!(key = "SQLPILOT_RETRIEVAL_BACKEND", value = %v, "unknown backend, ignoring"),
        }
    }
    if let Some(v) = read_env_string("SQLPILOT_OPENSEARCH_ENDPOINT") {
        settings.retrieval.endpoint = v;
    }
    if let Some(v) = read_env_string("SQLPILOT_OPENSEARCH_USERNAME") {
        settings.retrieval.username = Some(v);
    }
    if let Some(v) = read_env_string("SQLPILOT_NEURAL_MODEL_ID") {
        settings.retrieval.neural_model_id = Some(v);
    }
    if let Some(v) = read_env_string("SQLPILOT_FIXTURE_PATH") {
        settings.retrieval.fixture_path = Some(v);
    }

    // agent
    if let Some(v) = read_env_string("SQLPILOT_LANGUAGE") {
        settings.agent.language = v;
    }
    if let Some(v) = read_env_string("SQLPILOT_TOOL_CONFIG") {
        settings.agent.tool_config_path = v;
    }
    if let Some(v) = read_env_string("SQLPILOT_RESULT_DIR") {
        settings.agent.result_dir = v;
    }
    if let Some(v) = read_env_bool("SQLPILOT_REFINE_PROMPT") {
        settings.agent.refine_prompt = v;
    }
    if let Some(v) = read_env_number("SQLPILOT_MAX_TOOL_ROUNDS", 1u32..=1000) {
        settings.agent.max_tool_rounds = Some(v);
    }

    // logging
    if let Some(v) = read_env_string("SQLPILOT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("SQLPILOT_LOG_TO_SQLITE") {
        settings.logging.log_to_sqlite = v;
    }

    // server
    if let Some(v) = read_env_string("SQLPILOT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_number("SQLPILOT_PORT", 1u16..=u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_number("SQLPILOT_MAX_CONVERSATIONS", 1usize..=1_000_000) {
        settings.server.max_conversations = v;
    }
}

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `val` and keep it only if it falls inside `range`.
pub fn parse_in_range<T>(val: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim().parse().ok().filter(|n| range.contains(n))
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let parsed = parse_bool(&val);
    if parsed.is_none() {
        warn!(key = name, value = %val, "expected a boolean, ignoring");
    }
    parsed
}

fn read_env_number<T>(name: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd + Clone + std::fmt::Debug,
{
    let val = std::env::var(name).ok()?;
    let parsed = parse_in_range(&val, range.clone());
    if parsed.is_none() {
        warn!(key = name, value = %val, ?range, "out of range or not a number, ignoring");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_nested_keeps_siblings() {
        let merged = deep_merge(
            json!({"database": {"dialect": "SQLite", "uri": "a.db"}}),
            json!({"database": {"uri": "b.db"}}),
        );
        assert_eq!(merged["database"]["dialect"], "SQLite");
        assert_eq!(merged["database"]["uri"], "b.db");
    }

    #[test]
    fn merge_null_and_arrays() {
        let merged = deep_merge(json!({"a": 1, "xs": [1, 2, 3]}), json!({"a": null, "xs": [9]}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["xs"], json!([9]));
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn range_parsing() {
        assert_eq!(parse_in_range("8080", 1u16..=u16::MAX), Some(8080));
        assert_eq!(parse_in_range("0", 1u16..=u16::MAX), None);
        assert_eq!(parse_in_range::<u32>("-3", 0..=10), None);
        assert_eq!(parse_in_range::<u32>(" 7 ", 0..=10), Some(7));
        assert_eq!(parse_in_range::<u32>("11", 0..=10), None);
    }

    #[test]
    fn file_layer_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sqlpilot.json");
        std::fs::write(
            &path,
            r#"{"database": {"uri": "sqlite:///tmp/x.db"}, "agent": {"language": "French"}}"#,
        )
        .unwrap();

        let s = read_file_layer(&path).unwrap();
        assert_eq!(s.database.uri, "sqlite:///tmp/x.db");
        assert_eq!(s.database.dialect, "SQLite");
        assert_eq!(s.agent.language, "French");
        assert_eq!(s.agent.result_dir, "./result_files");
    }

    #[test]
    fn conversation_cap_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sqlpilot.json");
        std::fs::write(&path, r#"{"server": {"maxConversations": 50}}"#).unwrap();

        let s = read_file_layer(&path).unwrap();
        assert_eq!(s.server.max_conversations, 50);
        assert_eq!(s.server.port, 8080);
        assert_eq!(SqlPilotSettings::default().server.max_conversations, 1000);

        let mut zero = s;
        zero.server.max_conversations = 0;
        assert!(matches!(validate(&zero), Err(SettingsError::Invalid { field: "server.maxConversations", .. })));
    }

    #[test]
    fn missing_file_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = read_file_layer(&dir.path().join("absent.json")).unwrap();
        assert_eq!(s.retrieval.sample_k, 10);
    }

    #[test]
    fn invalid_json_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(read_file_layer(&path), Err(SettingsError::Parse { .. })));
    }

    #[test]
    fn memory_backend_needs_fixture() {
        let mut s = SqlPilotSettings::default();
        s.retrieval.backend = RetrievalBackend::Memory;
        assert!(matches!(validate(&s), Err(SettingsError::Invalid { field: "retrieval.fixturePath", .. })));
        s.retrieval.fixture_path = Some("kb.json".into());
        assert!(validate(&s).is_ok());
    }
}
