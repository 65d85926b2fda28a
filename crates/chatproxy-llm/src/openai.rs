//! OpenAI chat completions provider with SSE streaming

use crate::provider::{ChunkStream, CompletionProvider, LlmError, LlmResult};
use crate::types::{CompletionRequest, ProviderErrorBody, StreamChunk};
use bytes::Bytes;
use chatproxy_core::DEFAULT_UPSTREAM_URL;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const DONE_SENTINEL: &str = "[DONE]";

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_UPSTREAM_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait::async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete_stream(
        &self,
        request: CompletionRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<ChunkStream> {
        debug!(
            "OpenAI request: model={} messages={}",
            request.model,
            request.messages.len() + 1
        );

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&request.api_key)
            .json(&request.to_wire())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("OpenAI error {}: {}", status, error_text);
            return Err(classify_status(status, &error_text));
        }

        Ok(Box::pin(parse_sse_stream(response.bytes_stream(), cancel)))
    }
}

/// Map a non-2xx status and its body onto the error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<ProviderErrorBody>(body)
        .map(|b| b.error.message)
        .ok()
        .filter(|m| !m.is_empty())
        .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());

    match status {
        StatusCode::UNAUTHORIZED => LlmError::AuthFailed(message),
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited(message),
        _ => LlmError::RequestFailed {
            status: status.as_u16(),
            message,
        },
    }
}

/// Next item from `stream`, or `None` if `cancel` fires first.
async fn next_or_cancelled<S>(stream: &mut S, cancel: Option<&CancellationToken>) -> Option<Option<S::Item>>
where
    S: Stream + Unpin,
{
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => None,
            item = stream.next() => Some(item),
        },
        None => Some(stream.next().await),
    }
}

/// Turn the provider's SSE byte stream into completion text fragments.
///
/// Events are only decoded once complete, so multi-byte characters split
/// across network reads come out intact. The stream must end with
/// `data: [DONE]`; anything else is reported as a protocol error.
pub fn parse_sse_stream<S>(
    bytes_stream: S,
    cancel: Option<CancellationToken>,
) -> impl Stream<Item = LlmResult<Bytes>> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    async_stream::stream! {
        let mut events = Box::pin(bytes_stream.eventsource());
        let mut finished = false;

        loop {
            let event = match next_or_cancelled(&mut events, cancel.as_ref()).await {
                None => {
                    debug!("Upstream stream cancelled");
                    yield Err(LlmError::Cancelled);
                    finished = true;
                    break;
                }
                Some(None) => break,
                Some(Some(event)) => event,
            };

            let event = match event {
                Ok(event) => event,
                Err(EventStreamError::Transport(e)) => {
                    yield Err(LlmError::Network(e));
                    finished = true;
                    break;
                }
                Err(e) => {
                    yield Err(LlmError::Protocol(e.to_string()));
                    finished = true;
                    break;
                }
            };

            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == DONE_SENTINEL {
                finished = true;
                break;
            }

            match serde_json::from_str::<StreamChunk>(data) {
                Ok(chunk) => {
                    if let Some(err) = chunk.error {
                        warn!("OpenAI stream error: {}", err.message);
                        yield Err(LlmError::Protocol(err.message));
                        finished = true;
                        break;
                    }
                    if let Some(text) = chunk.content() {
                        if !text.is_empty() {
                            yield Ok(Bytes::copy_from_slice(text.as_bytes()));
                        }
                    }
                }
                Err(e) => {
                    yield Err(LlmError::Protocol(format!("unparseable stream event: {e}")));
                    finished = true;
                    break;
                }
            }
        }

        if !finished {
            yield Err(LlmError::Protocol("stream ended before [DONE]".to_string()));
        }
    }
}
