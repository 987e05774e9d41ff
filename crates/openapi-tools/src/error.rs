//! Error types for `openapi-mcp-tools`.

use openapi_mcp_http::error::HttpToolsError;
use thiserror::Error;

/// Main error type for `OpenAPI` tooling.
///
/// The `Spec*` variants are startup-fatal. Everything from `AuthExchange` on is produced per tool
/// call and names the tool it came from.
#[derive(Error, Debug)]
pub enum OpenApiToolsError {
    /// The spec document could not be fetched or read.
    #[error("spec unavailable at '{location}': {message}")]
    SpecUnavailable { location: String, message: String },

    /// The spec is not valid JSON/YAML, or its root is not a mapping.
    #[error("failed to parse spec from '{location}': {message}")]
    SpecParse { location: String, message: String },

    /// Swagger 2.0 conversion failed (or the `swagger` version is unsupported).
    #[error("spec conversion failed: {0}")]
    SpecConversion(String),

    /// The (normalized) `OpenAPI` document is invalid.
    #[error("spec validation failed: {}", .0.join("; "))]
    SpecValidation(Vec<String>),

    /// Invalid or inconsistent configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("tool '{tool}': {message}")]
    AuthExchange { tool: String, message: String },

    #[error("tool '{tool}': network error after {retries} retries: {message}")]
    Network {
        tool: String,
        message: String,
        retries: u32,
    },

    #[error("tool '{tool}': upstream timed out after {retries} retries")]
    UpstreamTimeout { tool: String, retries: u32 },

    #[error("tool '{tool}': upstream returned HTTP {status} after {retries} retries: {body}")]
    UpstreamHttp {
        tool: String,
        status: u16,
        body: String,
        retries: u32,
    },

    #[error("tool '{tool}': invalid arguments: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool '{tool}': call cancelled")]
    Cancelled { tool: String },

    #[error(transparent)]
    Http(#[from] HttpToolsError),
}

impl OpenApiToolsError {
    /// One validation problem.
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::SpecValidation(vec![message.into()])
    }

    /// Whether this error aborts initialization (as opposed to failing a single call).
    #[must_use]
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::SpecUnavailable { .. }
                | Self::SpecParse { .. }
                | Self::SpecConversion(_)
                | Self::SpecValidation(_)
                | Self::Config(_)
        )
    }

    /// Retry count for upstream failures.
    #[must_use]
    pub fn retries(&self) -> Option<u32> {
        match self {
            Self::Network { retries, .. }
            | Self::UpstreamTimeout { retries, .. }
            | Self::UpstreamHttp { retries, .. } => Some(*retries),
            _ => None,
        }
    }
}

/// Result type alias for `OpenAPI` tooling operations.
pub type Result<T> = std::result::Result<T, OpenApiToolsError>;
