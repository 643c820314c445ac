pub mod converter;
pub mod gateway;
pub mod models;
pub mod provider;
pub mod reliable;
pub mod sse;

pub mod mock;

pub use gateway::{converse, Converse};
pub use mock::{MockProvider, MockResponse};
pub use provider::AnthropicProvider;
pub use reliable::{CircuitState, ReliableConfig, ReliableProvider};
