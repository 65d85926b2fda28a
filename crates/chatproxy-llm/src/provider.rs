//! Completion provider trait

use crate::types::CompletionRequest;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// LLM error types
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("upstream returned {status}: {message}")]
    RequestFailed { status: u16, message: String },

    #[error("invalid upstream response: {0}")]
    Protocol(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("cancelled")]
    Cancelled,
}

impl From<LlmError> for chatproxy_core::Error {
    fn from(e: LlmError) -> Self {
        use chatproxy_core::Error;
        match e {
            LlmError::AuthFailed(m) => Error::Authentication(m),
            LlmError::RateLimited(m) => Error::RateLimited(m),
            LlmError::RequestFailed { status, message } => Error::upstream(status, message),
            LlmError::Protocol(m) => Error::UpstreamProtocol(m),
            LlmError::Network(e) => Error::Network(e.to_string()),
            LlmError::Cancelled => Error::internal("upstream stream cancelled"),
        }
    }
}

/// Stream of completion text fragments, in the order the provider sent them.
pub type ChunkStream = Pin<Box<dyn Stream<Item = LlmResult<Bytes>> + Send>>;

/// Completion provider
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Open a streaming completion. Fails before returning if the provider
    /// rejects the request; later failures arrive as stream items. If
    /// `cancel` is triggered the stream yields `LlmError::Cancelled` and ends.
    async fn complete_stream(
        &self,
        request: CompletionRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<ChunkStream>;
}
