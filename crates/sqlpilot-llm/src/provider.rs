use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use reqwest::Client;
use tracing::{debug, instrument};

use sqlpilot_core::context::LlmContext;
use sqlpilot_core::errors::GatewayError;
use sqlpilot_core::provider::{EventStream, LlmProvider, StreamOptions};
use sqlpilot_core::security::ApiKey;
use sqlpilot_core::stream::StreamEvent;

use crate::converter;
use crate::models;
use crate::sse::{ReplyAssembler, SseDecoder, SseFrame};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Streaming client for the Anthropic Messages API.
pub struct AnthropicProvider {
    client: Client,
    api_key: ApiKey,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: ApiKey, model_name: Option<&str>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Misconfigured(format!("failed to build HTTP client: {e}")))?;

        // Unknown model ids are passed through so newer models work without a catalog update.
        let model = match model_name {
            Some(name) => models::find_model(name).map_or(name, |info| info.id).to_string(),
            None => models::default_model().id.to_string(),
        };

        Ok(Self {
            client,
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn build_request(&self, context: &LlmContext, options: &StreamOptions) -> reqwest::RequestBuilder {
        let body = converter::build_request_body(context, options, &self.model);

        self.client
            .post(self.endpoint())
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", API_VERSION)
            .header("accept", "text/event-stream")
            .header("content-type", "application/json")
            .json(&body)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, context, options), fields(model = %self.model))]
    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let resp = self
            .build_request(context, options)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(CONNECT_TIMEOUT)
                } else {
                    GatewayError::Transport(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            debug!(status, "anthropic request rejected");
            return Err(GatewayError::from_status(status, body));
        }

        Ok(event_stream(Box::pin(resp.bytes_stream()), SSE_IDLE_TIMEOUT))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

struct Pump {
    bytes: ByteStream,
    decoder: SseDecoder,
    assembler: ReplyAssembler,
    queue: VecDeque<StreamEvent>,
    idle: Duration,
    finished: bool,
}

impl Pump {
    fn feed(&mut self, frames: impl IntoIterator<Item = SseFrame>) {
        for frame in frames {
            self.queue.extend(self.assembler.apply(&frame.data));
        }
    }
}

/// Turn the response body into stream events. A body that goes quiet for
/// `idle` ends with a `StreamInterrupted` error.
fn event_stream(bytes: ByteStream, idle: Duration) -> EventStream {
    let pump = Pump {
        bytes,
        decoder: SseDecoder::default(),
        assembler: ReplyAssembler::new(),
        queue: VecDeque::new(),
        idle,
        finished: false,
    };

    Box::pin(stream::unfold(pump, |mut pump| async move {
        loop {
            if let Some(event) = pump.queue.pop_front() {
                return Some((event, pump));
            }
            if pump.finished {
                return None;
            }
            match tokio::time::timeout(pump.idle, pump.bytes.next()).await {
                Ok(Some(Ok(chunk))) => {
                    let frames = pump.decoder.push(&chunk);
                    pump.feed(frames);
                }
                Ok(Some(Err(e))) => {
                    pump.finished = true;
                    pump.queue.push_back(StreamEvent::Error {
                        error: GatewayError::StreamInterrupted(e.to_string()),
                    });
                }
                Ok(None) => {
                    pump.finished = true;
                    let tail = pump.decoder.finish();
                    pump.feed(tail);
                }
                Err(_) => {
                    pump.finished = true;
                    pump.queue.push_back(StreamEvent::Error {
                        error: GatewayError::StreamInterrupted(format!(
                            "idle timeout after {}s",
                            pump.idle.as_secs()
                        )),
                    });
                }
            }
        }
    }))
}
