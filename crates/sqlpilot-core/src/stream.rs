use crate::errors::GatewayError;
use crate::ids::ToolCallId;
use crate::messages::{AssistantMessage, StopReason, ToolCallBlock};

/// One step of a streamed model reply.
///
/// A well-formed stream opens with `Start`, interleaves text and tool call
/// blocks, and finishes with exactly one `Done`. `Error` may replace `Done`
/// at any point and nothing follows it.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Start,

    TextStart,
    TextDelta { delta: String },
    TextEnd { text: String },

    ToolCallStart { tool_call_id: ToolCallId, name: String },
    /// Partial JSON of the call's arguments.
    ToolCallDelta { tool_call_id: ToolCallId, arguments_delta: String },
    ToolCallEnd { tool_call: ToolCallBlock },

    Done { message: AssistantMessage, stop_reason: StopReason },
    Error { error: GatewayError },
}
