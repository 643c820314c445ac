use serde_json::Value;
use tracing::{info, instrument};

use sqlpilot_core::events::ProgressEvent;
use sqlpilot_core::messages::{Message, ToolCallBlock, ToolResultContent, ToolResultMessage};

use crate::error::EngineError;
use crate::explore::explore_schema;
use crate::pipeline::generate_query;
use crate::services::AgentServices;
use crate::turn::Turn;
use crate::validator::validate_and_run;

/// The tools the agent exposes to the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolKind {
    QueryGeneration,
    ValidateAndRunQueries,
    SchemaExploration,
    Unrecognized(String),
}

impl ToolKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "query_generation" => Self::QueryGeneration,
            "validate_and_run_queries" => Self::ValidateAndRunQueries,
            "schema_exploration" => Self::SchemaExploration,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::QueryGeneration => "query_generation",
            Self::ValidateAndRunQueries => "validate_and_run_queries",
            Self::SchemaExploration => "schema_exploration",
            Self::Unrecognized(name) => name,
        }
    }

    /// The argument each known tool reads.
    fn argument(&self) -> Option<&'static str> {
        match self {
            Self::QueryGeneration => Some("input"),
            Self::ValidateAndRunQueries => Some("generated_query"),
            Self::SchemaExploration => Some("keyword"),
            Self::Unrecognized(_) => None,
        }
    }
}

/// Run one tool call and wrap its output as the single result message for it.
///
/// Only gateway failures inside query generation escape as errors; everything
/// else, including unknown tools and missing arguments, is a tool result.
#[instrument(skip_all, fields(tool = %call.name, tool_call_id = %call.id))]
pub async fn dispatch(
    turn: &mut Turn,
    services: &AgentServices,
    call: &ToolCallBlock,
) -> Result<Message, EngineError> {
    let kind = ToolKind::from_name(&call.name);
    turn.emit(ProgressEvent::ToolStart {
        turn_id: turn.id.clone(),
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        retry: turn.state.retry().count(),
    });
    info!(retry = turn.state.retry().count(), "running tool");

    let content = match kind.argument() {
        None => ToolResultContent::Text {
            text: "Unknown tool name".into(),
        },
        Some(arg) => match string_argument(&call.arguments, arg) {
            None => ToolResultContent::Text {
                text: format!("Missing required argument `{arg}` for tool {}", kind.as_str()),
            },
            Some(value) => ToolResultContent::Json {
                json: run_tool(&kind, turn, services, &value).await?,
            },
        },
    };

    turn.emit(ProgressEvent::ToolResult {
        turn_id: turn.id.clone(),
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        content: content.to_value(),
    });
    Ok(Message::ToolResult(ToolResultMessage {
        tool_call_id: call.id.clone(),
        content: vec![content],
    }))
}

async fn run_tool(
    kind: &ToolKind,
    turn: &mut Turn,
    services: &AgentServices,
    arg: &str,
) -> Result<Value, EngineError> {
    Ok(match kind {
        ToolKind::QueryGeneration => generate_query(turn, services, arg).await?,
        ToolKind::ValidateAndRunQueries => validate_and_run(turn, services, arg).await,
        ToolKind::SchemaExploration => explore_schema(turn, services, arg).await,
        ToolKind::Unrecognized(name) => {
            return Err(EngineError::Internal(format!("no handler for tool {name}")))
        }
    })
}

fn string_argument(arguments: &Value, key: &str) -> Option<String> {
    match arguments.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::String(_) | Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_kinds_round_trip_names() {
        for name in ["query_generation", "validate_and_run_queries", "schema_exploration"] {
            let kind = ToolKind::from_name(name);
            assert!(!matches!(kind, ToolKind::Unrecognized(_)));
            assert_eq!(kind.as_str(), name);
        }
        assert_eq!(ToolKind::from_name("drop_tables"), ToolKind::Unrecognized("drop_tables".into()));
    }

    #[test]
    fn string_arguments() {
        let args = json!({"keyword": "email", "blank": "  ", "n": 3});
        assert_eq!(string_argument(&args, "keyword").as_deref(), Some("email"));
        assert_eq!(string_argument(&args, "blank"), None);
        assert_eq!(string_argument(&args, "n").as_deref(), Some("3"));
        assert_eq!(string_argument(&args, "missing"), None);
    }
}
