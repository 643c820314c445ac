use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use sqlpilot_core::errors::GatewayError;
use sqlpilot_core::ids::ToolCallId;
use sqlpilot_core::messages::{AssistantContent, AssistantMessage, StopReason, ToolCallBlock};
use sqlpilot_core::stream::StreamEvent;
use sqlpilot_core::tokens::TokenUsage;

/// One dispatched server-sent event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Splits a byte stream into SSE frames. Bytes are buffered until a full
/// line is available, so multi-byte characters may straddle chunks.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.line(line.trim_end_matches(['\n', '\r'])) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush whatever the server sent without a trailing blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest);
        let rest = rest.trim_end_matches('\r');
        if !rest.is_empty() {
            if let Some(frame) = self.line(rest) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take().unwrap_or_else(|| "message".into()),
            data: self.data.join("\n"),
        };
        self.data.clear();
        Some(frame)
    }
}

enum Block {
    Text(String),
    Tool { id: String, name: String, json: String },
}

impl Block {
    fn content(&self) -> AssistantContent {
        match self {
            Self::Text(text) => AssistantContent::Text { text: text.clone() },
            Self::Tool { id, name, json } => AssistantContent::ToolCall(ToolCallBlock {
                id: ToolCallId::from_raw(id.as_str()),
                name: name.clone(),
                // Providers send nothing for argument-less calls; keep it an object.
                arguments: serde_json::from_str(json).unwrap_or_else(|_| Value::Object(Map::new())),
            }),
        }
    }
}

/// Folds Messages API stream events into [`StreamEvent`]s and, on
/// `message_stop`, the complete assistant message. Blocks are keyed by
/// their wire index so text and tool calls keep their interleaving.
#[derive(Default)]
pub struct ReplyAssembler {
    blocks: BTreeMap<usize, Block>,
    usage: TokenUsage,
    stop_reason: Option<StopReason>,
}

impl ReplyAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the JSON payload of one frame.
    pub fn apply(&mut self, data: &str) -> Vec<StreamEvent> {
        let event = match serde_json::from_str::<WireEvent>(data) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "skipping unreadable stream payload");
                return Vec::new();
            }
        };

        match event {
            WireEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.usage = TokenUsage {
                        input_tokens: usage.input_tokens.unwrap_or(0),
                        output_tokens: usage.output_tokens.unwrap_or(0),
                        cache_read_tokens: usage.cache_read_input_tokens.unwrap_or(0),
                        cache_creation_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
                    };
                }
                vec![StreamEvent::Start]
            }
            WireEvent::ContentBlockStart { index, content_block } => match content_block {
                WireBlock::Text { text } => {
                    self.blocks.insert(index, Block::Text(text));
                    vec![StreamEvent::TextStart]
                }
                WireBlock::ToolUse { id, name } => {
                    let event = StreamEvent::ToolCallStart {
                        tool_call_id: ToolCallId::from_raw(id.as_str()),
                        name: name.clone(),
                    };
                    self.blocks.insert(index, Block::Tool { id, name, json: String::new() });
                    vec![event]
                }
                WireBlock::Other => Vec::new(),
            },
            WireEvent::ContentBlockDelta { index, delta } => match (self.blocks.get_mut(&index), delta) {
                (Some(Block::Text(text)), WireDelta::TextDelta { text: piece }) => {
                    text.push_str(&piece);
                    vec![StreamEvent::TextDelta { delta: piece }]
                }
                (Some(Block::Tool { id, json, .. }), WireDelta::InputJsonDelta { partial_json }) => {
                    json.push_str(&partial_json);
                    vec![StreamEvent::ToolCallDelta {
                        tool_call_id: ToolCallId::from_raw(id.as_str()),
                        arguments_delta: partial_json,
                    }]
                }
                _ => Vec::new(),
            },
            WireEvent::ContentBlockStop { index } => match self.blocks.get(&index) {
                Some(Block::Text(text)) => vec![StreamEvent::TextEnd { text: text.clone() }],
                Some(block @ Block::Tool { .. }) => match block.content() {
                    AssistantContent::ToolCall(tool_call) => vec![StreamEvent::ToolCallEnd { tool_call }],
                    AssistantContent::Text { .. } => Vec::new(),
                },
                None => Vec::new(),
            },
            WireEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    if let Some(input) = usage.input_tokens {
                        self.usage.input_tokens = input;
                    }
                    if let Some(output) = usage.output_tokens {
                        self.usage.output_tokens = output;
                    }
                }
                if let Some(reason) = delta.stop_reason.as_deref().and_then(|r| r.parse().ok()) {
                    self.stop_reason = Some(reason);
                }
                Vec::new()
            }
            WireEvent::MessageStop => {
                let content: Vec<AssistantContent> = self.blocks.values().map(Block::content).collect();
                let has_calls = content.iter().any(|c| matches!(c, AssistantContent::ToolCall(_)));
                let stop_reason = self.stop_reason.unwrap_or(if has_calls {
                    StopReason::ToolUse
                } else {
                    StopReason::EndTurn
                });
                let message = AssistantMessage {
                    content,
                    usage: Some(self.usage.clone()),
                    stop_reason: Some(stop_reason),
                };
                vec![StreamEvent::Done { message, stop_reason }]
            }
            WireEvent::Error { error } => vec![StreamEvent::Error {
                error: GatewayError::from_api_error(&error.kind, error.message),
            }],
            WireEvent::Ping | WireEvent::Unknown => Vec::new(),
        }
    }

    pub fn usage(&self) -> &TokenUsage {
        &self.usage
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart {
        message: WireMessage,
    },
    ContentBlockStart {
        index: usize,
        content_block: WireBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: WireDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        delta: WireStop,
        usage: Option<WireUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: WireError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct WireMessage {
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Default, Deserialize)]
struct WireStop {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    cache_read_input_tokens: Option<u32>,
    cache_creation_input_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_block(index: usize, text: &str) -> [String; 3] {
        [
            format!(r#"{{"type":"content_block_start","index":{index},"content_block":{{"type":"text","text":""}}}}"#),
            format!(
                r#"{{"type":"content_block_delta","index":{index},"delta":{{"type":"text_delta","text":{}}}}}"#,
                serde_json::to_string(text).unwrap()
            ),
            format!(r#"{{"type":"content_block_stop","index":{index}}}"#),
        ]
    }

    #[test]
    fn decoder_handles_split_lines_and_comments() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b": keep-alive\nevent: message_st").is_empty());
        assert!(decoder.push(b"art\r\ndata: {\"a\":").is_empty());
        let frames = decoder.push(b"1}\r\n\r\nevent: ping\ndata: {}\n\n");
        assert_eq!(
            frames,
            vec![
                SseFrame { event: "message_start".into(), data: "{\"a\":1}".into() },
                SseFrame { event: "ping".into(), data: "{}".into() },
            ]
        );
    }

    #[test]
    fn decoder_joins_data_lines_and_flushes_tail() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: first\ndata:second\n").is_empty());
        let tail = decoder.finish().unwrap();
        assert_eq!(tail.event, "message");
        assert_eq!(tail.data, "first\nsecond");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn decoder_keeps_multibyte_text_across_chunks() {
        let payload = "data: café\n\n".as_bytes();
        let split = payload.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&payload[..split]).is_empty());
        assert_eq!(decoder.push(&payload[split..])[0].data, "café");
    }

    #[test]
    fn text_reply_with_usage() {
        let mut asm = ReplyAssembler::new();
        let events = asm.apply(
            r#"{"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":100,"output_tokens":1,"cache_read_input_tokens":50}}}"#,
        );
        assert!(matches!(events[..], [StreamEvent::Start]));

        let [start, delta, stop] = text_block(0, "There are 59 customers.");
        assert!(matches!(asm.apply(&start)[..], [StreamEvent::TextStart]));
        assert!(matches!(&asm.apply(&delta)[..], [StreamEvent::TextDelta { delta }] if delta == "There are 59 customers."));
        assert!(matches!(&asm.apply(&stop)[..], [StreamEvent::TextEnd { text }] if text == "There are 59 customers."));

        asm.apply(r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":25}}"#);
        match &asm.apply(r#"{"type":"message_stop"}"#)[..] {
            [StreamEvent::Done { message, stop_reason }] => {
                assert_eq!(message.text(), "There are 59 customers.");
                assert_eq!(*stop_reason, StopReason::EndTurn);
                let usage = message.usage.as_ref().unwrap();
                assert_eq!((usage.input_tokens, usage.output_tokens, usage.cache_read_tokens), (100, 25, 50));
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn tool_call_after_text_keeps_order() {
        let mut asm = ReplyAssembler::new();
        asm.apply(r#"{"type":"message_start","message":{"usage":{"input_tokens":200}}}"#);
        for payload in text_block(0, "Generating SQL.") {
            asm.apply(&payload);
        }

        let events = asm.apply(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_abc","name":"query_generation","input":{}}}"#,
        );
        assert!(matches!(&events[..], [StreamEvent::ToolCallStart { name, .. }] if name == "query_generation"));
        asm.apply(r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"input\""}}"#);
        asm.apply(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":":\"count customers\"}"}}"#,
        );

        match &asm.apply(r#"{"type":"content_block_stop","index":1}"#)[..] {
            [StreamEvent::ToolCallEnd { tool_call }] => {
                assert_eq!(tool_call.id.as_str(), "toolu_abc");
                assert_eq!(tool_call.arguments["input"], "count customers");
            }
            other => panic!("expected ToolCallEnd, got {other:?}"),
        }

        match &asm.apply(r#"{"type":"message_stop"}"#)[..] {
            [StreamEvent::Done { message, stop_reason }] => {
                assert_eq!(*stop_reason, StopReason::ToolUse);
                assert!(matches!(message.content[0], AssistantContent::Text { .. }));
                assert!(matches!(message.content[1], AssistantContent::ToolCall(_)));
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn stop_reason_from_wire_is_kept() {
        let mut asm = ReplyAssembler::new();
        asm.apply(r#"{"type":"message_delta","delta":{"stop_reason":"max_tokens"},"usage":{"output_tokens":4096}}"#);
        assert_eq!(asm.usage().output_tokens, 4096);
        assert!(matches!(
            asm.apply(r#"{"type":"message_stop"}"#)[..],
            [StreamEvent::Done { stop_reason: StopReason::MaxTokens, .. }]
        ));
    }

    #[test]
    fn argument_less_tool_call_is_empty_object() {
        let mut asm = ReplyAssembler::new();
        asm.apply(r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"query_generation"}}"#);
        match &asm.apply(r#"{"type":"content_block_stop","index":0}"#)[..] {
            [StreamEvent::ToolCallEnd { tool_call }] => assert!(tool_call.arguments.as_object().unwrap().is_empty()),
            other => panic!("expected ToolCallEnd, got {other:?}"),
        }
    }

    #[test]
    fn unknown_and_ping_events_are_ignored() {
        let mut asm = ReplyAssembler::new();
        assert!(asm.apply(r#"{"type":"ping"}"#).is_empty());
        assert!(asm.apply(r#"{"type":"something_new","x":1}"#).is_empty());
        assert!(asm.apply("not json").is_empty());
        assert!(asm
            .apply(r#"{"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":""}}"#)
            .is_empty());
    }

    #[test]
    fn error_payloads_are_classified() {
        let mut asm = ReplyAssembler::new();
        let events = asm.apply(r#"{"type":"error","error":{"type":"overloaded_error","message":"busy"}}"#);
        assert!(matches!(&events[..], [StreamEvent::Error { error }] if error.is_retryable()));

        let events = asm.apply(r#"{"type":"error","error":{"type":"authentication_error","message":"invalid key"}}"#);
        assert!(matches!(&events[..], [StreamEvent::Error { error }] if error.is_fatal()));
    }
}
