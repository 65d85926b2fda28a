//! Chat request handler
//!
//! A request moves through `Validating → Tokenizing → Selecting →
//! Streaming` and ends `Completed` or `Failed`. Everything up to the
//! first upstream chunk can still turn into an error response; once the
//! first chunk is in hand the response is committed and later upstream
//! failures abort the body instead of ending it cleanly.

use crate::cors;
use crate::server::GatewayState;
use axum::body::Body;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chatproxy_context::{ContextWindow, Tokenizer};
use chatproxy_core::{ChatRequest, CorsConfig, Error, SelectedContext};
use chatproxy_llm::{CancellationToken, CompletionRequest, LlmError};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Where a chat request is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validating,
    Tokenizing,
    Selecting,
    Streaming,
    Completed,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Validating => "validating",
            Stage::Tokenizing => "tokenizing",
            Stage::Selecting => "selecting",
            Stage::Streaming => "streaming",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Failure {
    stage: Stage,
    error: Error,
}

impl Failure {
    fn at(stage: Stage) -> impl FnOnce(Error) -> Self {
        move |error| Self { stage, error }
    }
}

/// `/api/chat`: POST runs the completion, OPTIONS answers a CORS preflight.
pub async fn chat_handler(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let cors_config = &state.config.cors;
    debug!("{} /api/chat ({})", method, Stage::Received);

    if method == Method::OPTIONS && cors_config.enabled {
        return preflight_response(cors_config);
    }
    if method != Method::POST {
        return method_not_allowed(cors_config);
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let error = body_rejection_error(&rejection);
            warn!("Chat request failed while {}: {}", Stage::Validating, error);
            return error_response(&error, cors_config);
        }
    };

    match proxy_chat(&state, &body).await {
        Ok(response) => response,
        Err(Failure { stage, error }) => {
            if error.kind().is_local() {
                warn!("Chat request failed while {}: {}", stage, error);
            } else {
                error!("Chat request failed while {}: {}", stage, error);
            }
            error_response(&error, cors_config)
        }
    }
}

async fn proxy_chat(state: &GatewayState, body: &[u8]) -> Result<Response, Failure> {
    let completion_config = &state.config.completion;

    let request = ChatRequest::from_json(body).map_err(Failure::at(Stage::Validating))?;
    let prompt = request
        .resolved_prompt(&completion_config.default_system_prompt)
        .to_string();
    let temperature = request.resolved_temperature(completion_config.default_temperature);

    let tokenizer = Tokenizer::load(state.vocabulary.as_ref(), &state.leases)
        .await
        .map_err(|e| Failure::at(Stage::Tokenizing)(e.into()))?;
    let window = ContextWindow::new(request.model.token_limit)
        .with_margin(completion_config.reserved_completion_margin);
    debug!(
        "{} over {} message(s), limit {} with {} reserved",
        Stage::Selecting,
        request.messages.len(),
        window.token_limit(),
        window.reserved_margin()
    );
    let selected = window.select(&tokenizer, &prompt, &request.messages);
    tokenizer.dispose();

    log_selection(&request, &selected);

    let ChatRequest { model, api_key, .. } = request;
    let completion = CompletionRequest {
        model: model.identifier,
        system_prompt: prompt,
        temperature,
        max_tokens: completion_config.max_completion_tokens,
        api_key,
        messages: selected.messages,
    };

    let cancel = CancellationToken::new();
    let mut upstream = state
        .provider
        .complete_stream(completion, Some(cancel.clone()))
        .await
        .map_err(|e| Failure::at(Stage::Streaming)(e.into()))?;

    let first = match upstream.next().await {
        Some(Ok(chunk)) => Some(chunk),
        Some(Err(e)) => return Err(Failure::at(Stage::Streaming)(e.into())),
        None => None,
    };

    let guard = cancel.drop_guard();
    let body = async_stream::stream! {
        let _guard = guard;
        let mut chunks = 0usize;
        let mut bytes = 0usize;

        if let Some(chunk) = first {
            chunks += 1;
            bytes += chunk.len();
            yield Ok::<Bytes, LlmError>(chunk);
        }

        while let Some(item) = upstream.next().await {
            match item {
                Ok(chunk) => {
                    chunks += 1;
                    bytes += chunk.len();
                    yield Ok(chunk);
                }
                Err(e) => {
                    error!("Upstream failed after {} chunk(s), aborting response ({}): {}", chunks, Stage::Failed, e);
                    yield Err(e);
                    return;
                }
            }
        }

        info!("Stream {}: {} chunk(s), {} bytes", Stage::Completed, chunks, bytes);
    };

    Ok(stream_response(Body::from_stream(body), &state.config.cors))
}

fn body_rejection_error(rejection: &BytesRejection) -> Error {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge(rejection.body_text())
    } else {
        Error::validation(rejection.body_text())
    }
}

fn log_selection(request: &ChatRequest, selected: &SelectedContext) {
    info!(
        "Chat request: model={} limit={} messages={}/{} prompt_tokens={} message_tokens={}",
        request.model.identifier,
        request.model.token_limit,
        selected.messages.len(),
        request.messages.len(),
        selected.prompt_token_count,
        selected.message_token_count
    );
    if selected.messages.is_empty() && !request.messages.is_empty() {
        warn!(
            "No conversation history fits model {} (limit {}); sending the prompt only",
            request.model.identifier, request.model.token_limit
        );
    }
}

fn stream_response(body: Body, cors_config: &CorsConfig) -> Response {
    let mut response = Response::new(body);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    cors::apply(response.headers_mut(), cors_config);
    response
}

/// Render a failure as `{"error": {"type": ..., "message": ...}}`.
pub fn error_response(error: &Error, cors_config: &CorsConfig) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::json!({
        "error": {
            "type": error.kind().as_str(),
            "message": error.to_string(),
        }
    });
    let mut response = (status, Json(body)).into_response();
    cors::apply(response.headers_mut(), cors_config);
    response
}

fn method_not_allowed(cors_config: &CorsConfig) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "method_not_allowed",
            "message": "Method Not Allowed",
        }
    });
    let mut response = (StatusCode::METHOD_NOT_ALLOWED, Json(body)).into_response();
    cors::apply(response.headers_mut(), cors_config);
    let allow = if cors_config.enabled { "OPTIONS, POST" } else { "POST" };
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static(allow));
    response
}

fn preflight_response(cors_config: &CorsConfig) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    cors::apply(response.headers_mut(), cors_config);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_display() {
        assert_eq!(Stage::Tokenizing.to_string(), "tokenizing");
        assert_eq!(Stage::Failed.as_str(), "failed");
    }

    #[test]
    fn error_response_status_follows_kind() {
        let cors_config = CorsConfig::default();
        let response = error_response(&Error::Authentication("bad key".into()), &cors_config);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));

        let response = error_response(&Error::RateLimited("slow".into()), &cors_config);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn method_not_allowed_without_cors_advertises_post() {
        let cors_config = CorsConfig {
            enabled: false,
            allowed_origin: String::new(),
        };
        let response = method_not_allowed(&cors_config);
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "POST");
    }

    #[test]
    fn method_not_allowed_with_cors_does_not_advertise_get() {
        let cors_config = CorsConfig {
            enabled: true,
            allowed_origin: "https://app.test".into(),
        };
        let response = method_not_allowed(&cors_config);
        assert_eq!(response.headers()[header::ALLOW], "OPTIONS, POST");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.test");
    }
}
