use tokio::sync::broadcast;
use tracing::debug;

use sqlpilot_core::context::LlmContext;
use sqlpilot_core::errors::GatewayError;
use sqlpilot_core::events::ProgressEvent;
use sqlpilot_core::ids::{ConversationId, TurnId};
use sqlpilot_core::tokens::TokenLedger;
use sqlpilot_llm::{converse, Converse};
use sqlpilot_retrieval::RetrievedDocument;

use crate::services::AgentServices;
use crate::state::SessionState;

/// Mutable context for one turn, passed by reference through the
/// orchestrator, router and pipelines.
pub struct Turn {
    pub id: TurnId,
    pub conversation_id: Option<ConversationId>,
    pub state: SessionState,
    /// Sample queries chosen for this turn.
    pub samples: Vec<RetrievedDocument>,
    ledger: TokenLedger,
    events: broadcast::Sender<ProgressEvent>,
}

impl Turn {
    pub fn new(
        prompt: &str,
        conversation_id: Option<ConversationId>,
        events: broadcast::Sender<ProgressEvent>,
    ) -> Self {
        Self {
            id: TurnId::new(),
            conversation_id,
            state: SessionState::new(prompt),
            samples: Vec::new(),
            ledger: TokenLedger::new(),
            events,
        }
    }

    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    /// Consume the turn's ledger; totals are computed once.
    pub(crate) fn take_ledger(&mut self) -> TokenLedger {
        std::mem::take(&mut self.ledger)
    }

    /// Fire-and-forget progress notification.
    pub fn emit(&self, event: ProgressEvent) {
        if self.events.send(event).is_err() {
            debug!("no progress listeners");
        }
    }

    /// One gateway call with usage recorded in the ledger. Text deltas are
    /// streamed to listeners only when `stream_text` is set.
    pub async fn call(
        &mut self,
        services: &AgentServices,
        context: &LlmContext,
        stream_text: bool,
    ) -> Result<Converse, GatewayError> {
        let events = self.events.clone();
        let turn_id = self.id.clone();
        let mut forward = move |delta: &str| {
            let _ = events.send(ProgressEvent::TextDelta {
                turn_id: turn_id.clone(),
                delta: delta.to_string(),
            });
        };
        let on_delta: Option<&mut (dyn FnMut(&str) + Send)> =
            if stream_text { Some(&mut forward) } else { None };

        let reply = converse(
            services.provider.as_ref(),
            context,
            &services.config.stream_options,
            on_delta,
        )
        .await?;
        self.ledger.record(&reply.usage);
        Ok(reply)
    }

    /// The chosen samples as a JSON array for prompts.
    pub fn samples_text(&self) -> String {
        let values: Vec<serde_json::Value> = self
            .samples
            .iter()
            .map(|d| d.json().unwrap_or_else(|_| serde_json::Value::String(d.page_content.clone())))
            .collect();
        serde_json::to_string(&values).unwrap_or_else(|_| "[]".into())
    }
}
