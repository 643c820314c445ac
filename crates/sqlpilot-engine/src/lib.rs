//! The agent: session state, tool router, generation and validation
//! pipelines, and the conversation orchestrator.

#![deny(unsafe_code)]

pub mod dialect;
pub mod error;
pub mod explore;
pub mod history;
pub mod orchestrator;
pub mod parsed;
pub mod pipeline;
pub mod prompts;
pub mod router;
pub mod services;
pub mod state;
pub mod turn;
pub mod validator;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::EngineError;
pub use history::ConversationHistory;
pub use orchestrator::{Orchestrator, TurnOutcome};
pub use router::ToolKind;
pub use services::{AgentConfig, AgentServices};
pub use state::{FailureHint, ResultLocation, RetryState, SessionState};
pub use turn::Turn;
