//! Chatproxy LLM - Streaming completion client for OpenAI-compatible providers

pub mod openai;
pub mod provider;
pub mod types;

pub use openai::OpenAiProvider;
pub use provider::{ChunkStream, CompletionProvider, LlmError, LlmResult};
pub use tokio_util::sync::CancellationToken;
pub use types::*;
