use serde::{Deserialize, Serialize};

use crate::ids::{ToolCallId, TurnId};
use crate::tokens::TokenTotals;

/// Live progress notifications emitted while a turn runs.
///
/// Delivered over a broadcast channel; nothing in the turn depends on
/// whether anyone is listening.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    #[serde(rename = "turn_start")]
    TurnStart { turn_id: TurnId, prompt: String },

    #[serde(rename = "samples_selected")]
    SamplesSelected { turn_id: TurnId, count: usize },

    #[serde(rename = "text_delta")]
    TextDelta { turn_id: TurnId, delta: String },

    #[serde(rename = "tool_start")]
    ToolStart {
        turn_id: TurnId,
        tool_call_id: ToolCallId,
        tool_name: String,
        retry: u32,
    },

    /// Tool name plus the primary result payload (`{"json": ..}` or `{"text": ..}`).
    #[serde(rename = "tool_result")]
    ToolResult {
        turn_id: TurnId,
        tool_call_id: ToolCallId,
        tool_name: String,
        content: serde_json::Value,
    },

    #[serde(rename = "turn_complete")]
    TurnComplete { turn_id: TurnId, tokens: TokenTotals },
}

impl ProgressEvent {
    pub fn turn_id(&self) -> &TurnId {
        match self {
            Self::TurnStart { turn_id, .. }
            | Self::SamplesSelected { turn_id, .. }
            | Self::TextDelta { turn_id, .. }
            | Self::ToolStart { turn_id, .. }
            | Self::ToolResult { turn_id, .. }
            | Self::TurnComplete { turn_id, .. } => turn_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TurnStart { .. } => "turn_start",
            Self::SamplesSelected { .. } => "samples_selected",
            Self::TextDelta { .. } => "text_delta",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolResult { .. } => "tool_result",
            Self::TurnComplete { .. } => "turn_complete",
        }
    }
}
