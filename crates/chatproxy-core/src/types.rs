//! Core types for Chatproxy

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Model the caller wants completions from, with the size of its context window.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    #[serde(alias = "id")]
    pub identifier: String,
    pub token_limit: usize,
}

impl ModelDescriptor {
    pub fn new(identifier: impl Into<String>, token_limit: usize) -> Self {
        Self {
            identifier: identifier.into(),
            token_limit,
        }
    }
}

/// Message role
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A message in a conversation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Inbound chat request as posted by the frontend.
///
/// `messages` is oldest first. The API key is forwarded upstream untouched;
/// an empty key is not rejected here, the provider reports it.
#[derive(Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: ModelDescriptor,
    pub messages: Vec<ChatMessage>,
    #[serde(rename = "key")]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl std::fmt::Debug for ChatRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRequest")
            .field("model", &self.model)
            .field("messages", &self.messages.len())
            .field("api_key", &"<redacted>")
            .field("prompt", &self.prompt)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl ChatRequest {
    /// Parse and validate a request body.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let request: ChatRequest = serde_json::from_slice(body)
            .map_err(|e| Error::validation(format!("malformed request body: {e}")))?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.identifier.trim().is_empty() {
            return Err(Error::validation("model.identifier must not be empty"));
        }
        if self.model.token_limit == 0 {
            return Err(Error::validation("model.tokenLimit must be greater than zero"));
        }
        if let Some(t) = self.temperature {
            if !t.is_finite() {
                return Err(Error::validation("temperature must be a finite number"));
            }
        }
        Ok(())
    }

    /// The caller's prompt, or `default` when it is absent or empty.
    pub fn resolved_prompt<'a>(&'a self, default: &'a str) -> &'a str {
        match self.prompt.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => default,
        }
    }

    /// The caller's temperature, or `default` when unset. An explicit zero is kept.
    pub fn resolved_temperature(&self, default: f32) -> f32 {
        self.temperature.unwrap_or(default)
    }
}

/// The trailing part of a conversation that fits the model's window.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectedContext {
    pub prompt_token_count: usize,
    pub message_token_count: usize,
    pub messages: Vec<ChatMessage>,
}

impl SelectedContext {
    pub fn total_tokens(&self) -> usize {
        self.prompt_token_count + self.message_token_count
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Bind mode for the gateway
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    Loopback,
    #[default]
    Lan,
}

impl BindMode {
    pub fn to_addr(&self) -> &str {
        match self {
            BindMode::Loopback => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "loopback" | "localhost" | "127.0.0.1" => BindMode::Loopback,
            _ => BindMode::Lan,
        }
    }
}
