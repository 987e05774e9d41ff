//! Error types for the server binary.

use openapi_mcp_tools::OpenApiToolsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid flags or environment.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The tool registry could not be built (spec, auth or base URL problems).
    #[error("Startup error: {0}")]
    Startup(#[from] OpenApiToolsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
