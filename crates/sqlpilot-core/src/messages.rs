use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ids::ToolCallId;
use crate::tokens::TokenUsage;

/// One entry of the conversation sent to the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    ToolResult(ToolResultMessage),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserMessage {
    pub text: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<AssistantContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

/// The answer to one tool call. Every call the model issues gets exactly one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResultMessage {
    pub tool_call_id: ToolCallId,
    pub content: Vec<ToolResultContent>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantContent {
    Text { text: String },
    ToolCall(ToolCallBlock),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContent {
    Text { text: String },
    Json { json: Value },
}

impl ToolResultContent {
    /// `{"json": ..}` or `{"text": ..}`, as progress listeners receive it.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Text { text } => json!({ "text": text }),
            Self::Json { json } => json!({ "json": json }),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Json { json } => json.to_string(),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallBlock {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

impl FromStr for StopReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string())).map_err(|_| format!("unknown stop reason {s:?}"))
    }
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User(UserMessage { text: text.into() })
    }

    pub fn tool_text(tool_call_id: ToolCallId, text: impl Into<String>) -> Self {
        Self::tool_result(tool_call_id, ToolResultContent::Text { text: text.into() })
    }

    pub fn tool_json(tool_call_id: ToolCallId, json: Value) -> Self {
        Self::tool_result(tool_call_id, ToolResultContent::Json { json })
    }

    pub fn tool_result(tool_call_id: ToolCallId, content: ToolResultContent) -> Self {
        Self::ToolResult(ToolResultMessage {
            tool_call_id,
            content: vec![content],
        })
    }
}

impl AssistantMessage {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![AssistantContent::Text { text: text.into() }],
            usage: None,
            stop_reason: Some(StopReason::EndTurn),
        }
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallBlock> + '_ {
        self.content.iter().filter_map(|c| match c {
            AssistantContent::ToolCall(call) => Some(call),
            AssistantContent::Text { .. } => None,
        })
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls().next().is_some()
    }

    /// All text blocks concatenated.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text { text } => Some(text.as_str()),
                AssistantContent::ToolCall(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_are_tagged() {
        let user = serde_json::to_value(Message::user("hello")).unwrap();
        assert_eq!(user, json!({"role": "user", "text": "hello"}));

        let id = ToolCallId::from_raw("toolu_9");
        let result = serde_json::to_value(Message::tool_json(id, json!({"message": "ok"}))).unwrap();
        assert_eq!(result["role"], "tool_result");
        assert_eq!(result["tool_call_id"], "toolu_9");
        assert_eq!(result["content"][0]["type"], "json");
        assert_eq!(result["content"][0]["json"]["message"], "ok");
    }

    #[test]
    fn tool_result_progress_shape() {
        let text = ToolResultContent::Text { text: "Unknown tool name".into() };
        assert_eq!(text.to_value(), json!({"text": "Unknown tool name"}));

        let found = ToolResultContent::Json { json: json!({"keyword": "email"}) };
        assert_eq!(found.to_value()["json"]["keyword"], "email");
        assert_eq!(found.as_text(), r#"{"keyword":"email"}"#);
    }

    #[test]
    fn text_and_calls_are_separated() {
        let msg = AssistantMessage {
            content: vec![
                AssistantContent::Text { text: "Let me ".into() },
                AssistantContent::ToolCall(ToolCallBlock {
                    id: ToolCallId::new(),
                    name: "query_generation".into(),
                    arguments: json!({"input": "count customers"}),
                }),
                AssistantContent::Text { text: "look.".into() },
            ],
            usage: None,
            stop_reason: Some(StopReason::ToolUse),
        };
        assert!(msg.has_tool_calls());
        assert_eq!(msg.tool_calls().map(|c| c.name.as_str()).collect::<Vec<_>>(), ["query_generation"]);
        assert_eq!(msg.text(), "Let me look.");
        assert!(!AssistantMessage::from_text("done").has_tool_calls());
    }

    #[test]
    fn stop_reason_parses_wire_names() {
        assert_eq!("tool_use".parse::<StopReason>(), Ok(StopReason::ToolUse));
        assert_eq!("end_turn".parse::<StopReason>(), Ok(StopReason::EndTurn));
        assert!("refusal".parse::<StopReason>().is_err());
    }
}
