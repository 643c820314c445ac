//! Scripted provider for tests: each call to `stream` consumes the next
//! queued response, so a whole multi-round turn can be replayed offline.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use serde_json::Value;

use sqlpilot_core::context::LlmContext;
use sqlpilot_core::errors::GatewayError;
use sqlpilot_core::ids::ToolCallId;
use sqlpilot_core::messages::{AssistantContent, AssistantMessage, StopReason, ToolCallBlock};
use sqlpilot_core::provider::{EventStream, LlmProvider, StreamOptions};
use sqlpilot_core::stream::StreamEvent;
use sqlpilot_core::tokens::TokenUsage;

pub enum MockResponse {
    /// Events handed back as the stream.
    Stream(Vec<StreamEvent>),
    /// Failure to open the stream at all.
    Error(GatewayError),
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn stream_text(text: &str) -> Self {
        Self::text_with_usage(text, 0, 0)
    }

    pub fn text_with_usage(text: &str, input_tokens: u32, output_tokens: u32) -> Self {
        let opening = vec![
            StreamEvent::Start,
            StreamEvent::TextStart,
            StreamEvent::TextDelta { delta: text.into() },
            StreamEvent::TextEnd { text: text.into() },
        ];
        let reply = AssistantMessage::from_text(text);
        finish(opening, reply, StopReason::EndTurn, TokenUsage::new(input_tokens, output_tokens))
    }

    /// One assistant message requesting each `(tool, arguments)` pair in order.
    pub fn tool_use(calls: Vec<(&str, Value)>, input_tokens: u32, output_tokens: u32) -> Self {
        let blocks: Vec<ToolCallBlock> = calls
            .into_iter()
            .map(|(name, arguments)| ToolCallBlock {
                id: ToolCallId::new(),
                name: name.into(),
                arguments,
            })
            .collect();

        let mut events = vec![StreamEvent::Start];
        for block in &blocks {
            events.push(StreamEvent::ToolCallStart {
                tool_call_id: block.id.clone(),
                name: block.name.clone(),
            });
            events.push(StreamEvent::ToolCallEnd {
                tool_call: block.clone(),
            });
        }
        let reply = AssistantMessage {
            content: blocks.into_iter().map(AssistantContent::ToolCall).collect(),
            usage: None,
            stop_reason: None,
        };
        finish(events, reply, StopReason::ToolUse, TokenUsage::new(input_tokens, output_tokens))
    }

    /// Opens fine, then reports `error` as its second event.
    pub fn stream_error(error: GatewayError) -> Self {
        Self::Stream(vec![StreamEvent::Start, StreamEvent::Error { error }])
    }

    /// Text that never reaches a `Done` event.
    pub fn truncated(text: &str) -> Self {
        Self::Stream(vec![
            StreamEvent::Start,
            StreamEvent::TextStart,
            StreamEvent::TextDelta { delta: text.into() },
        ])
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

fn finish(
    mut events: Vec<StreamEvent>,
    mut message: AssistantMessage,
    stop_reason: StopReason,
    usage: TokenUsage,
) -> MockResponse {
    message.usage = Some(usage);
    message.stop_reason = Some(stop_reason);
    events.push(StreamEvent::Done { message, stop_reason });
    MockResponse::Stream(events)
}

/// Plays back queued responses and remembers every context it was sent.
pub struct MockProvider {
    script: Mutex<VecDeque<MockResponse>>,
    seen: Mutex<Vec<LlmContext>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().len()
    }

    /// Contexts passed to `stream`, oldest first.
    pub fn contexts(&self) -> Vec<LlmContext> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream(&self, context: &LlmContext, _options: &StreamOptions) -> Result<EventStream, GatewayError> {
        let call = {
            let mut seen = self.seen.lock();
            seen.push(context.clone());
            seen.len()
        };
        let Some(mut next) = self.script.lock().pop_front() else {
            return Err(GatewayError::BadRequest(format!(
                "mock provider has no response for call {call}"
            )));
        };

        loop {
            match next {
                MockResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
                MockResponse::Error(error) => return Err(error),
                MockResponse::Delay(pause, inner) => {
                    tokio::time::sleep(pause).await;
                    next = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlpilot_core::messages::Message;
    use tokio_stream::StreamExt;

    async fn drain(mock: &MockProvider) -> Vec<StreamEvent> {
        mock.stream(&LlmContext::empty(), &StreamOptions::default())
            .await
            .unwrap()
            .collect()
            .await
    }

    #[tokio::test]
    async fn text_reply_ends_with_usage() {
        let mock = MockProvider::new(vec![MockResponse::text_with_usage("hello", 10, 2)]);
        let events = drain(&mock).await;

        assert_eq!(events.len(), 5);
        let Some(StreamEvent::Done { message, stop_reason }) = events.last() else {
            panic!("expected Done, got {:?}", events.last());
        };
        assert_eq!(*stop_reason, StopReason::EndTurn);
        assert_eq!(message.text(), "hello");
        assert_eq!(message.usage.as_ref().unwrap().input_tokens, 10);
    }

    #[tokio::test]
    async fn tool_calls_keep_their_order() {
        let mock = MockProvider::new(vec![MockResponse::tool_use(
            vec![
                ("query_generation", json!({"input": "a"})),
                ("schema_exploration", json!({"keyword": "b"})),
            ],
            5,
            1,
        )]);
        let events = drain(&mock).await;

        let Some(StreamEvent::Done { message, stop_reason }) = events.last() else {
            panic!("expected Done, got {:?}", events.last());
        };
        assert_eq!(*stop_reason, StopReason::ToolUse);
        let names: Vec<&str> = message.tool_calls().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["query_generation", "schema_exploration"]);
    }

    #[tokio::test]
    async fn runs_out_after_the_script() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("only one")]);
        let ctx = LlmContext::new(vec![], vec![Message::user("first")]);

        assert!(mock.stream(&ctx, &StreamOptions::default()).await.is_ok());
        assert!(matches!(
            mock.stream(&ctx, &StreamOptions::default()).await,
            Err(GatewayError::BadRequest(_))
        ));
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.contexts()[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn delay_wraps_an_error() {
        let mock = MockProvider::new(vec![MockResponse::delayed(
            Duration::from_millis(10),
            MockResponse::Error(GatewayError::Throttled { retry_after: None }),
        )]);

        let result = mock.stream(&LlmContext::empty(), &StreamOptions::default()).await;
        assert!(matches!(result, Err(GatewayError::Throttled { .. })));
    }
}
