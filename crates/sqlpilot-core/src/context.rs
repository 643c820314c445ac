use serde::{Deserialize, Serialize};

use crate::messages::Message;
use crate::tools::ToolDefinition;

/// The complete context sent to a provider for one gateway call.
#[derive(Clone, Debug, Default)]
pub struct LlmContext {
    pub messages: Vec<Message>,
    pub system_blocks: Vec<SystemBlock>,
    pub tools: Vec<ToolDefinition>,
}

impl LlmContext {
    /// Create an empty context (useful for testing).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(system_blocks: Vec<SystemBlock>, messages: Vec<Message>) -> Self {
        Self {
            messages,
            system_blocks,
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// A system instruction block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemBlock {
    pub content: String,
    pub label: PromptLabel,
}

impl SystemBlock {
    pub fn new(label: PromptLabel, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            label,
        }
    }
}

/// Which step of the turn a prompt belongs to (debugging, token attribution).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PromptLabel {
    Persona,
    PromptRefinement,
    SampleSelection,
    TableSelection,
    QueryGeneration,
    QueryValidation,
    AnswerGeneration,
}

impl PromptLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Persona => "persona",
            Self::PromptRefinement => "prompt_refinement",
            Self::SampleSelection => "sample_selection",
            Self::TableSelection => "table_selection",
            Self::QueryGeneration => "query_generation",
            Self::QueryValidation => "query_validation",
            Self::AnswerGeneration => "answer_generation",
        }
    }
}
