use std::sync::Arc;

use sqlpilot_core::provider::{LlmProvider, StreamOptions};
use sqlpilot_core::tools::ToolConfig;
use sqlpilot_retrieval::Retriever;
use sqlpilot_store::{ArtifactWriter, SqlDatabase};

/// Turn behaviour knobs.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub dialect: String,
    pub language: String,
    pub stream_options: StreamOptions,
    pub refine_prompt: bool,
    /// Hard cap on tool-dispatch rounds. `None` relies on the router's stop hint alone.
    pub max_tool_rounds: Option<u32>,
    pub preview_rows: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            dialect: "SQLite".into(),
            language: "English".into(),
            stream_options: StreamOptions::default(),
            refine_prompt: false,
            max_tool_rounds: None,
            preview_rows: 20,
        }
    }
}

/// Everything a turn talks to. Shared across turns; holds no per-turn state.
pub struct AgentServices {
    pub provider: Arc<dyn LlmProvider>,
    pub database: Arc<dyn SqlDatabase>,
    pub retriever: Retriever,
    pub artifacts: ArtifactWriter,
    pub tools: ToolConfig,
    pub config: AgentConfig,
}
