use serde_json::{json, Value};

use sqlpilot_core::context::{LlmContext, SystemBlock};
use sqlpilot_core::messages::{
    AssistantContent, AssistantMessage, Message, ToolCallBlock, ToolResultMessage, UserMessage,
};
use sqlpilot_core::provider::StreamOptions;

pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Convert a full LlmContext into the Anthropic Messages API request body.
pub fn build_request_body(context: &LlmContext, options: &StreamOptions, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "stream": true,
        "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
    });

    if let Some(temp) = options.temperature {
        body["temperature"] = json!(temp);
    }

    if !options.stop_sequences.is_empty() {
        body["stop_sequences"] = json!(options.stop_sequences);
    }

    let system = convert_system_blocks(&context.system_blocks);
    if !system.is_empty() {
        body["system"] = json!(system);
    }

    body["messages"] = json!(convert_messages(&context.messages));

    if !context.tools.is_empty() {
        let tools: Vec<Value> = context
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters_schema,
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    body
}

fn convert_system_blocks(blocks: &[SystemBlock]) -> Vec<Value> {
    blocks
        .iter()
        .filter(|b| !b.content.is_empty())
        .map(|b| json!({"type": "text", "text": b.content}))
        .collect()
}

/// Convert messages to Anthropic's alternating user/assistant format.
///
/// Consecutive tool results are folded into a single user message, since the
/// API expects every `tool_result` for one assistant turn in the same message.
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();
    let mut pending_results: Vec<Value> = Vec::new();

    for msg in messages {
        match msg {
            Message::ToolResult(tr) => {
                pending_results.push(convert_tool_result(tr));
                continue;
            }
            Message::User(user) => {
                flush_tool_results(&mut result, &mut pending_results);
                result.push(convert_user_message(user));
            }
            Message::Assistant(asst) => {
                flush_tool_results(&mut result, &mut pending_results);
                result.push(convert_assistant_message(asst));
            }
        }
    }
    flush_tool_results(&mut result, &mut pending_results);

    result
}

fn flush_tool_results(result: &mut Vec<Value>, pending: &mut Vec<Value>) {
    if pending.is_empty() {
        return;
    }
    let content = std::mem::take(pending);
    result.push(json!({"role": "user", "content": content}));
}

fn convert_user_message(msg: &UserMessage) -> Value {
    json!({"role": "user", "content": [{"type": "text", "text": msg.text}]})
}

fn convert_assistant_message(msg: &AssistantMessage) -> Value {
    let content: Vec<Value> = msg
        .content
        .iter()
        .filter_map(|c| match c {
            // The API rejects empty text blocks.
            AssistantContent::Text { text } if text.is_empty() => None,
            AssistantContent::Text { text } => Some(json!({"type": "text", "text": text})),
            AssistantContent::ToolCall(tc) => Some(convert_tool_call(tc)),
        })
        .collect();

    json!({"role": "assistant", "content": content})
}

fn convert_tool_call(tc: &ToolCallBlock) -> Value {
    json!({
        "type": "tool_use",
        "id": tc.id.as_str(),
        "name": tc.name,
        "input": tc.arguments,
    })
}

fn convert_tool_result(msg: &ToolResultMessage) -> Value {
    let content: Vec<Value> = msg
        .content
        .iter()
        .map(|c| json!({"type": "text", "text": c.as_text()}))
        .collect();

    json!({
        "type": "tool_result",
        "tool_use_id": msg.tool_call_id.as_str(),
        "content": content,
    })
}
