//! Error types for Chatproxy

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("request body too large: {0}")]
    PayloadTooLarge(String),

    #[error("tokenizer initialization failed: {0}")]
    Initialization(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("upstream protocol error: {0}")]
    UpstreamProtocol(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Classification of an [`Error`], used for logging and response bodies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    PayloadTooLarge,
    Initialization,
    Authentication,
    RateLimited,
    UpstreamProtocol,
    Network,
    Upstream,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::Initialization => "initialization_error",
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::RateLimited => "rate_limit_error",
            ErrorKind::UpstreamProtocol => "upstream_protocol_error",
            ErrorKind::Network => "network_error",
            ErrorKind::Upstream => "upstream_error",
            ErrorKind::Config => "config_error",
            ErrorKind::Internal => "internal_error",
        }
    }

    /// HTTP status the gateway answers with for this kind.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::PayloadTooLarge => 413,
            ErrorKind::Authentication => 401,
            ErrorKind::RateLimited => 429,
            ErrorKind::UpstreamProtocol | ErrorKind::Upstream => 502,
            ErrorKind::Network => 503,
            ErrorKind::Initialization | ErrorKind::Config | ErrorKind::Internal => 500,
        }
    }

    /// Whether the failure happened before any upstream call was attempted.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ErrorKind::Validation
                | ErrorKind::PayloadTooLarge
                | ErrorKind::Initialization
                | ErrorKind::Config
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::PayloadTooLarge(_) => ErrorKind::PayloadTooLarge,
            Error::Initialization(_) => ErrorKind::Initialization,
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::RateLimited(_) => ErrorKind::RateLimited,
            Error::UpstreamProtocol(_) => ErrorKind::UpstreamProtocol,
            Error::Network(_) => ErrorKind::Network,
            Error::Upstream { .. } => ErrorKind::Upstream,
            Error::Config(_) => ErrorKind::Config,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}
