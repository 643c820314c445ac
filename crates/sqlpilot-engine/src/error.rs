use sqlpilot_core::errors::GatewayError;
use sqlpilot_core::tools::ToolConfigError;
use sqlpilot_retrieval::RetrievalError;
use sqlpilot_store::StoreError;

/// Failures that end a turn. Tool-level problems never show up here; they
/// become tool results the model can read.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("tool config error: {0}")]
    ToolConfig(#[from] ToolConfigError),

    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("{0}")]
    Internal(String),
}
