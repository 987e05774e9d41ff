//! Error types for `openapi-mcp-http`.

use crate::safety::sanitize_reqwest_error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpToolsError {
    /// Invalid or inconsistent configuration.
    #[error("config error: {0}")]
    Config(String),

    /// The selected auth provider is missing one or more credentials.
    #[error("[{provider}] MISSING_CREDENTIALS: {message}")]
    MissingCredentials {
        provider: &'static str,
        message: String,
    },

    /// The identity provider rejected a credential exchange (or could not be reached).
    #[error("[{provider}] AUTH_EXCHANGE_FAILED: {message}")]
    AuthExchange {
        provider: &'static str,
        message: String,
    },

    /// An outbound request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("http transport error: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("response too large: {0}")]
    ResponseTooLarge(String),
}

pub type Result<T> = std::result::Result<T, HttpToolsError>;

impl HttpToolsError {
    /// Network-level failures worth another attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

impl From<reqwest::Error> for HttpToolsError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            Self::Timeout(sanitize_reqwest_error(&value))
        } else {
            Self::Transport(sanitize_reqwest_error(&value))
        }
    }
}
