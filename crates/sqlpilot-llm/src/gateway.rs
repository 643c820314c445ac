use futures::StreamExt;
use tracing::{debug, instrument, warn};

use sqlpilot_core::context::LlmContext;
use sqlpilot_core::errors::GatewayError;
use sqlpilot_core::messages::{AssistantMessage, StopReason};
use sqlpilot_core::provider::{LlmProvider, StreamOptions};
use sqlpilot_core::stream::StreamEvent;
use sqlpilot_core::tokens::TokenUsage;

/// One completed gateway call.
#[derive(Clone, Debug)]
pub struct Converse {
    pub stop_reason: StopReason,
    pub message: AssistantMessage,
    pub usage: TokenUsage,
}

impl Converse {
    pub fn text(&self) -> String {
        self.message.text()
    }
}

/// Drive a provider stream to completion and return the final assistant message.
///
/// Text deltas are forwarded to `on_delta` as they arrive. An error event in
/// the stream, or a stream that ends before `Done`, is returned as an error.
#[instrument(skip_all, fields(provider = provider.name(), model = provider.model()))]
pub async fn converse(
    provider: &dyn LlmProvider,
    context: &LlmContext,
    options: &StreamOptions,
    mut on_delta: Option<&mut (dyn FnMut(&str) + Send)>,
) -> Result<Converse, GatewayError> {
    let mut stream = provider.stream(context, options).await?;

    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::TextDelta { delta } => {
                if let Some(cb) = on_delta.as_mut() {
                    cb(&delta);
                }
            }
            StreamEvent::Done { message, stop_reason } => {
                let usage = message.usage.clone().unwrap_or_default();
                debug!(
                    ?stop_reason,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    tool_calls = message.tool_calls().count(),
                    "gateway call complete"
                );
                return Ok(Converse {
                    stop_reason,
                    message,
                    usage,
                });
            }
            StreamEvent::Error { error } => {
                warn!(error_kind = error.error_kind(), error = %error, "gateway stream failed");
                return Err(error);
            }
            _ => {}
        }
    }

    Err(GatewayError::IncompleteStream)
}
