//! HTTP and WebSocket surface over the agent orchestrator.

pub mod conversations;
pub mod events;
pub mod handlers;
pub mod server;

pub use conversations::ConversationStore;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
