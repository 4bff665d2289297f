//! Multi-provider tool-calling chat.

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod provider;
mod retry;
pub mod session;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use provider::{Message, ModelTurn, Provider, Role, ToolCallRequest, TurnBlock};
pub use session::{ChatEvent, ChatSession};
