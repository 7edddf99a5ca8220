//! Provider adapter implementations.

pub mod anthropic;
pub mod catalog;
pub mod groq;
pub mod mock;
pub mod openai;
mod wire;

pub use anthropic::{AnthropicAdapter, AnthropicConfig};
pub use groq::{GroqAdapter, GroqConfig};
pub use mock::{mock_spec, MockBehavior, MockProvider};
pub use openai::{OpenAiAdapter, OpenAiConfig};
