use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{field, info, instrument, warn, Span};

use sqlpilot_core::context::LlmContext;
use sqlpilot_core::events::ProgressEvent;
use sqlpilot_core::ids::{ConversationId, TurnId};
use sqlpilot_core::messages::{Message, StopReason, ToolCallBlock};
use sqlpilot_core::tokens::TokenTotals;
use sqlpilot_store::{TurnLogRepo, TurnLogRow};
use sqlpilot_telemetry::TURN_LOG_TARGET;

use crate::error::EngineError;
use crate::history::ConversationHistory;
use crate::pipeline::{refine_prompt, select_samples};
use crate::prompts;
use crate::router;
use crate::services::AgentServices;
use crate::state::SessionState;
use crate::turn::Turn;

const EVENT_CAPACITY: usize = 256;

/// What one `invoke` produces.
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub turn_id: TurnId,
    pub conversation_id: Option<ConversationId>,
    pub answer: String,
    pub tokens: TokenTotals,
    pub state: SessionState,
}

#[derive(Serialize)]
struct TurnLogRecord<'a> {
    #[serde(flatten)]
    state: &'a Value,
    endtime: &'a str,
    token_used: u64,
}

/// Drives a turn: persona call, tool loop, closing answer call, turn log.
pub struct Orchestrator {
    services: Arc<AgentServices>,
    events: broadcast::Sender<ProgressEvent>,
    turn_logs: Option<TurnLogRepo>,
}

impl Orchestrator {
    pub fn new(services: Arc<AgentServices>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            services,
            events,
            turn_logs: None,
        }
    }

    pub fn with_turn_logs(mut self, repo: TurnLogRepo) -> Self {
        self.turn_logs = Some(repo);
        self
    }

    pub fn services(&self) -> &AgentServices {
        &self.services
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> broadcast::Sender<ProgressEvent> {
        self.events.clone()
    }

    /// Answer one user prompt.
    ///
    /// Tool failures never surface here; they are fed back to the model. Only
    /// gateway failures, or a broken schema payload, end the turn with an error.
    #[instrument(skip_all, fields(turn_id = field::Empty, conversation_id = field::Empty))]
    pub async fn invoke(
        &self,
        prompt: &str,
        history: &ConversationHistory,
        conversation_id: Option<ConversationId>,
    ) -> Result<TurnOutcome, EngineError> {
        let services = self.services.as_ref();
        let config = &services.config;
        let mut turn = Turn::new(prompt, conversation_id, self.events.clone());
        let span = Span::current();
        span.record("turn_id", turn.id.as_str());
        if let Some(id) = &turn.conversation_id {
            span.record("conversation_id", id.as_str());
        }
        turn.emit(ProgressEvent::TurnStart {
            turn_id: turn.id.clone(),
            prompt: prompt.to_string(),
        });
        info!(turn_id = %turn.id, "turn started");

        let rendered_history = history.render();
        if config.refine_prompt {
            refine_prompt(&mut turn, services, &rendered_history).await?;
        }
        select_samples(&mut turn, services).await?;

        let persona = prompts::persona(
            &config.language,
            turn.state.effective_prompt(),
            &rendered_history,
        );
        let system = persona.system;
        let mut messages = persona.messages;
        let tools = services.tools.definitions().to_vec();
        let context = |messages: &[Message]| {
            LlmContext::new(system.clone(), messages.to_vec()).with_tools(tools.clone())
        };

        let mut reply = turn.call(services, &context(&messages), true).await?;
        let mut rounds = 0u32;
        loop {
            messages.push(Message::Assistant(reply.message.clone()));
            let calls: Vec<ToolCallBlock> = reply.message.tool_calls().cloned().collect();
            if reply.stop_reason != StopReason::ToolUse || calls.is_empty() {
                break;
            }
            if let Some(cap) = config.max_tool_rounds {
                if rounds >= cap {
                    warn!(
                        rounds,
                        pending_calls = calls.len(),
                        "tool round cap reached, moving to answer generation"
                    );
                    break;
                }
            }

            for call in &calls {
                let result = router::dispatch(&mut turn, services, call).await?;
                messages.push(result);
            }
            rounds += 1;
            reply = turn.call(services, &context(&messages), true).await?;
        }
        info!(rounds, retry = turn.state.retry().count(), success = turn.state.success(), "tool loop finished");

        let record = turn.state.record();
        let record_text = serde_json::to_string_pretty(&record)
            .map_err(|e| EngineError::Internal(format!("serialize session state: {e}")))?;
        let closing = prompts::answer_generation(&config.language, &record_text, turn.state.effective_prompt());
        let answer = turn.call(services, &closing.into_context(), true).await?.text();

        let tokens = turn.take_ledger().finalize();
        turn.emit(ProgressEvent::TurnComplete {
            turn_id: turn.id.clone(),
            tokens,
        });
        self.log_turn(&turn, &record, &tokens);

        Ok(TurnOutcome {
            turn_id: turn.id,
            conversation_id: turn.conversation_id,
            answer,
            tokens,
            state: turn.state,
        })
    }

    /// Emit the final state record and persist it when a repo is configured.
    /// A failed write is logged, never raised.
    fn log_turn(&self, turn: &Turn, record: &Value, tokens: &TokenTotals) {
        let endtime = chrono::Local::now().to_rfc3339();
        let full = serde_json::to_value(TurnLogRecord {
            state: record,
            endtime: &endtime,
            token_used: tokens.total_tokens,
        })
        .unwrap_or_else(|_| record.clone());

        info!(
            target: TURN_LOG_TARGET,
            turn_id = %turn.id,
            success = turn.state.success(),
            token_used = tokens.total_tokens,
            record = %full,
            "turn finished"
        );

        let Some(repo) = &self.turn_logs else {
            return;
        };
        let row = TurnLogRow {
            turn_id: turn.id.to_string(),
            conversation_id: turn.conversation_id.as_ref().map(ToString::to_string),
            user_prompt: turn.state.user_prompt.clone(),
            success: turn.state.success(),
            token_used: tokens.total_tokens,
            endtime,
            record: full,
        };
        if let Err(e) = repo.append(&row) {
            warn!(turn_id = %turn.id, error = %e, "failed to persist turn log");
        }
    }
}
