use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::context::LlmContext;
use crate::errors::GatewayError;
use crate::stream::StreamEvent;

/// The event stream of one gateway call. Ends with `Done` or `Error`.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Generation settings applied to every call of a turn.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub stop_sequences: Vec<String>,
}

impl StreamOptions {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A chat model behind a streaming API: the one primitive the agent loop is built on.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short backend name for logs and the health endpoint.
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn stream(&self, context: &LlmContext, options: &StreamOptions)
        -> Result<EventStream, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_set_fields() {
        let opts = StreamOptions::default().with_max_tokens(4096).with_temperature(0.0);
        assert_eq!(opts.max_tokens, Some(4096));
        assert_eq!(opts.temperature, Some(0.0));
        assert!(opts.stop_sequences.is_empty());
    }
}
