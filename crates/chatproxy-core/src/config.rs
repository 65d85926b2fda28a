//! Proxy configuration
//!
//! Loaded from TOML at startup, falls back to defaults if no config file
//! exists. Environment variables override whatever the file says.

use crate::error::{Error, Result};
use crate::types::BindMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are ChatGPT, a large language model trained by OpenAI. Follow the user's instructions carefully. Respond using markdown.";
pub const DEFAULT_TEMPERATURE: f32 = 1.0;
pub const RESERVED_COMPLETION_MARGIN: usize = 1000;
pub const DEFAULT_MAX_COMPLETION_TOKENS: u32 = 1000;
pub const DEFAULT_UPSTREAM_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Top-level proxy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    pub server: ServerConfig,
    pub completion: CompletionConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: BindMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            bind: BindMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompletionConfig {
    /// System prompt used when the request carries none (or an empty one).
    pub default_system_prompt: String,
    /// Temperature used when the request leaves it unset.
    pub default_temperature: f32,
    /// Tokens held back from the input budget for the model's reply.
    pub reserved_completion_margin: usize,
    /// Sent upstream as `max_tokens`.
    pub max_completion_tokens: u32,
    /// Chat completions endpoint of the provider.
    pub upstream_url: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            default_system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            default_temperature: DEFAULT_TEMPERATURE,
            reserved_completion_margin: RESERVED_COMPLETION_MARGIN,
            max_completion_tokens: DEFAULT_MAX_COMPLETION_TOKENS,
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorsConfig {
    /// Emit the CORS header set on chat responses and answer preflights.
    pub enabled: bool,
    /// Value of `Access-Control-Allow-Origin`.
    pub allowed_origin: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origin: String::new(),
        }
    }
}

impl ProxyConfig {
    /// Load from a TOML file, logging and falling back to defaults on any problem.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ProxyConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.completion.upstream_url.trim().is_empty() {
            return Err(Error::Config("completion.upstream_url must not be empty".into()));
        }
        if !self.completion.default_temperature.is_finite() {
            return Err(Error::Config("completion.default_temperature must be finite".into()));
        }
        Ok(())
    }

    /// Apply `CHATPROXY_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup, keyed by environment variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("CHATPROXY_PORT") {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!("Ignoring invalid CHATPROXY_PORT={}", port),
            }
        }
        if let Some(bind) = lookup("CHATPROXY_BIND") {
            self.server.bind = BindMode::parse(&bind);
        }
        if let Some(url) = lookup("CHATPROXY_UPSTREAM_URL") {
            self.completion.upstream_url = url;
        }
        if let Some(origin) = lookup("CHATPROXY_ALLOWED_ORIGIN") {
            self.cors.allowed_origin = origin;
        }
        if let Some(prompt) = lookup("CHATPROXY_SYSTEM_PROMPT") {
            self.completion.default_system_prompt = prompt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = ProxyConfig::from_toml_str("").unwrap();
        assert_eq!(config, ProxyConfig::default());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = ProxyConfig::from_toml_str("[cors]\nallowed_origin = \"https://x.test\"\n").unwrap();
        assert!(config.cors.enabled);
        assert_eq!(config.cors.allowed_origin, "https://x.test");
        assert_eq!(config.completion.reserved_completion_margin, 1000);
    }

    #[test]
    fn empty_upstream_url_rejected() {
        let err = ProxyConfig::from_toml_str("[completion]\nupstream_url = \"\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
