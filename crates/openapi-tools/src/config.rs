use crate::error::{OpenApiToolsError, Result};
use openapi_mcp_http::auth::AuthConfig;
use openapi_mcp_http::cache::CacheConfig;
use openapi_mcp_http::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_FLATTEN_THRESHOLD: usize = 8;

/// Configuration for one OpenAPI-backed API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Display name (logs, health output).
    pub name: String,

    /// `OpenAPI`/Swagger spec location (URL or file path).
    pub spec: String,

    /// Optional `sha256:<hex>` hash of the raw spec bytes.
    #[serde(default)]
    pub spec_hash: Option<String>,

    #[serde(default)]
    pub spec_hash_policy: HashPolicy,

    /// Override the base URL taken from the spec's `servers`.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub auth: AuthConfig,

    /// Per-request timeout in seconds (`0` disables it).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Budget for loading the spec and building tools.
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Request bodies with at most this many required top-level fields are flattened into
    /// individual tool arguments.
    #[serde(default = "default_flatten_threshold")]
    pub flatten_threshold: usize,

    /// Response bodies larger than this fail the call.
    #[serde(default)]
    pub max_response_bytes: Option<usize>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_startup_timeout_secs() -> u64 {
    DEFAULT_STARTUP_TIMEOUT_SECS
}

fn default_flatten_threshold() -> usize {
    DEFAULT_FLATTEN_THRESHOLD
}

impl ApiConfig {
    /// A config with defaults for everything except name and spec location.
    #[must_use]
    pub fn new(name: impl Into<String>, spec: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spec: spec.into(),
            spec_hash: None,
            spec_hash_policy: HashPolicy::default(),
            base_url: None,
            auth: AuthConfig::None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            startup_timeout_secs: DEFAULT_STARTUP_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
            cache: CacheConfig::default(),
            flatten_threshold: DEFAULT_FLATTEN_THRESHOLD,
            max_response_bytes: None,
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs.max(1))
    }

    /// Check the config for problems that do not need the spec.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::Config`] for an empty spec location or malformed hash, and
    /// the auth provider's error for missing credentials.
    pub fn validate(&self) -> Result<()> {
        if self.spec.trim().is_empty() {
            return Err(OpenApiToolsError::Config(
                "spec location must not be empty".to_string(),
            ));
        }
        if let Some(hash) = &self.spec_hash {
            let hex_part = hash.strip_prefix("sha256:").ok_or_else(|| {
                OpenApiToolsError::Config(format!(
                    "spec hash '{hash}' must have the form sha256:<hex>"
                ))
            })?;
            if hex_part.len() != 64 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(OpenApiToolsError::Config(format!(
                    "spec hash '{hash}' is not a sha256 hex digest"
                )));
            }
        }
        if let Some(base) = &self.base_url
            && base.trim().is_empty()
        {
            return Err(OpenApiToolsError::Config(
                "base URL must not be empty when set".to_string(),
            ));
        }
        self.auth.validate()?;
        Ok(())
    }
}

/// Hash verification policy.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    /// Log warning if hash doesn't match.
    #[default]
    Warn,
    /// Fail startup if hash doesn't match.
    Fail,
    /// Ignore hash verification.
    Ignore,
}

impl std::str::FromStr for HashPolicy {
    type Err = OpenApiToolsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(Self::Warn),
            "fail" => Ok(Self::Fail),
            "ignore" => Ok(Self::Ignore),
            other => Err(OpenApiToolsError::Config(format!(
                "invalid hash policy '{other}' (expected warn, fail or ignore)"
            ))),
        }
    }
}
