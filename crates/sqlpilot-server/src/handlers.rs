use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use sqlpilot_core::ids::ConversationId;
use sqlpilot_core::tokens::TokenTotals;
use sqlpilot_engine::EngineError;
use sqlpilot_store::TurnLogRow;

use crate::server::AppState;

const DEFAULT_TURN_LIMIT: u32 = 20;
const MAX_TURN_LIMIT: u32 = 500;

/// Error body: `{"error": "..."}` with a matching status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::Gateway(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let services = state.orchestrator.services();
    Json(json!({
        "status": "healthy",
        "provider": services.provider.name(),
        "model": services.provider.model(),
        "retrieval": services.retriever.backend(),
        "tools": services.tools.names(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub conversation_id: String,
    pub turn_id: String,
    pub answer: String,
    pub tokens: TokenTotals,
    pub state: Value,
}

/// Run one turn. History is copied out of the store before the turn and
/// written back after, so no map guard is held across the await.
pub async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "question must not be empty"));
    }
    let conversation_id = match req.conversation_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => ConversationId::from_raw(id),
        _ => ConversationId::new(),
    };

    let history = state.conversations.history(&conversation_id);

    let outcome = state
        .orchestrator
        .invoke(question, &history, Some(conversation_id.clone()))
        .await
        .map_err(|e| {
            warn!(conversation_id = %conversation_id, error = %e, "turn failed");
            ApiError::from(e)
        })?;

    state.conversations.record(&conversation_id, question, &outcome.answer);
    info!(
        conversation_id = %conversation_id,
        turn_id = %outcome.turn_id,
        total_tokens = outcome.tokens.total_tokens,
        "turn answered"
    );

    Ok(Json(AskResponse {
        conversation_id: conversation_id.to_string(),
        turn_id: outcome.turn_id.to_string(),
        answer: outcome.answer,
        tokens: outcome.tokens,
        state: outcome.state.record(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct TurnsQuery {
    pub limit: Option<u32>,
}

pub async fn turns(
    State(state): State<AppState>,
    Query(query): Query<TurnsQuery>,
) -> Result<Json<Vec<TurnLogRow>>, ApiError> {
    let Some(repo) = &state.turn_logs else {
        return Err(ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "turn log is not enabled"));
    };
    let limit = query.limit.unwrap_or(DEFAULT_TURN_LIMIT).clamp(1, MAX_TURN_LIMIT);
    let rows = repo
        .recent(limit)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(rows))
}
