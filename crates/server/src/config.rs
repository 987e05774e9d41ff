//! Command line / environment configuration.

use crate::error::{Result, ServerError};
use clap::{Parser, ValueEnum};
use openapi_mcp_http::auth::{AuthConfig, CredentialLocation};
use openapi_mcp_http::cache::CacheConfig;
use openapi_mcp_http::cognito::CognitoConfig;
use openapi_mcp_http::retry::RetryPolicy;
use openapi_mcp_tools::{ApiConfig, HashPolicy};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthType {
    None,
    Basic,
    Bearer,
    #[value(name = "api_key", alias = "apikey", alias = "api-key")]
    ApiKey,
    Cognito,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "openapi-mcp-server")]
#[command(about = "Expose an OpenAPI/Swagger API as MCP tools over streamable HTTP")]
#[command(version)]
pub struct Args {
    /// Display name of the API
    #[arg(long, env = "API_NAME", default_value = "api")]
    pub api_name: String,

    /// Base URL of the API (defaults to the spec's first server)
    #[arg(long, env = "API_BASE_URL")]
    pub base_url: Option<String>,

    /// URL of the OpenAPI/Swagger document
    #[arg(long, env = "API_SPEC_URL")]
    pub spec_url: Option<String>,

    /// Local path of the OpenAPI/Swagger document
    #[arg(long, env = "API_SPEC_PATH")]
    pub spec_path: Option<String>,

    /// Expected spec hash (`sha256:<hex>`)
    #[arg(long, env = "API_SPEC_HASH")]
    pub spec_hash: Option<String>,

    /// What to do on a hash mismatch (warn, fail, ignore)
    #[arg(long, env = "API_SPEC_HASH_POLICY", default_value = "warn")]
    pub spec_hash_policy: String,

    #[arg(long, env = "AUTH_TYPE", value_enum, default_value = "none")]
    pub auth_type: AuthType,

    #[arg(long, env = "AUTH_USERNAME")]
    pub auth_username: Option<String>,

    #[arg(long, env = "AUTH_PASSWORD", hide_env_values = true)]
    pub auth_password: Option<String>,

    #[arg(long, env = "AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    #[arg(long, env = "AUTH_API_KEY", hide_env_values = true)]
    pub auth_api_key: Option<String>,

    #[arg(long, env = "AUTH_API_KEY_NAME", default_value = openapi_mcp_http::auth::DEFAULT_API_KEY_NAME)]
    pub auth_api_key_name: String,

    /// Where the API key goes (header, query, cookie)
    #[arg(long, env = "AUTH_API_KEY_IN", default_value = "header")]
    pub auth_api_key_in: String,

    #[arg(long, env = "AUTH_COGNITO_CLIENT_ID")]
    pub auth_cognito_client_id: Option<String>,

    #[arg(long, env = "AUTH_COGNITO_USERNAME")]
    pub auth_cognito_username: Option<String>,

    #[arg(long, env = "AUTH_COGNITO_PASSWORD", hide_env_values = true)]
    pub auth_cognito_password: Option<String>,

    #[arg(long, env = "AUTH_COGNITO_USER_POOL_ID")]
    pub auth_cognito_user_pool_id: Option<String>,

    #[arg(long, env = "AUTH_COGNITO_REGION", default_value = "us-east-1")]
    pub auth_cognito_region: String,

    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "SERVER_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Mount path of the MCP endpoint
    #[arg(long, env = "SERVER_PATH", default_value = "/mcp")]
    pub path: String,

    /// Force debug logging
    #[arg(long, env = "SERVER_DEBUG")]
    pub debug: bool,

    /// Whole tool-call budget in seconds, retries included
    #[arg(long, env = "SERVER_MESSAGE_TIMEOUT", default_value_t = 60)]
    pub message_timeout: u64,

    /// Per-request timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT", default_value_t = 30)]
    pub http_timeout: u64,

    #[arg(long, env = "RETRY_MAX", default_value_t = 3)]
    pub retry_max: usize,

    #[arg(long, env = "RETRY_MIN_DELAY_MS", default_value_t = 200)]
    pub retry_min_delay_ms: u64,

    /// Response cache TTL in seconds (0 disables caching)
    #[arg(long, env = "CACHE_TTL", default_value_t = 300)]
    pub cache_ttl: u64,

    #[arg(long, env = "CACHE_CAPACITY", default_value_t = 1000)]
    pub cache_capacity: usize,

    /// Flatten request bodies with at most this many required fields into arguments
    #[arg(long, env = "FLATTEN_THRESHOLD", default_value_t = 8)]
    pub flatten_threshold: usize,

    /// Log level (overridden by `RUST_LOG`)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

impl Args {
    #[must_use]
    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_timeout.max(1))
    }

    #[must_use]
    pub fn effective_log_level(&self) -> &str {
        if self.debug { "debug" } else { &self.log_level }
    }

    /// Resolve the flags into the library configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] when the spec location is missing or ambiguous, a value is
    /// malformed, or the selected auth type lacks its credentials.
    pub fn api_config(&self) -> Result<ApiConfig> {
        let spec = match (&self.spec_url, &self.spec_path) {
            (Some(url), None) => url.clone(),
            (None, Some(path)) => path.clone(),
            (Some(_), Some(_)) => {
                return Err(ServerError::Config(
                    "set only one of API_SPEC_URL and API_SPEC_PATH".to_string(),
                ));
            }
            (None, None) => {
                return Err(ServerError::Config(
                    "one of API_SPEC_URL or API_SPEC_PATH is required".to_string(),
                ));
            }
        };

        let mut config = ApiConfig::new(self.api_name.clone(), spec);
        config.base_url.clone_from(&self.base_url);
        config.spec_hash.clone_from(&self.spec_hash);
        config.spec_hash_policy = self
            .spec_hash_policy
            .parse::<HashPolicy>()
            .map_err(|e| ServerError::Config(e.to_string()))?;
        config.auth = self.auth_config()?;
        config.timeout_secs = self.http_timeout;
        config.retry = RetryPolicy {
            max_retries: self.retry_max,
            min_delay_ms: self.retry_min_delay_ms,
            ..RetryPolicy::default()
        };
        config.cache = CacheConfig {
            ttl_secs: self.cache_ttl,
            capacity: self.cache_capacity,
        };
        config.flatten_threshold = self.flatten_threshold;

        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;
        Ok(config)
    }

    fn auth_config(&self) -> Result<AuthConfig> {
        let required = |value: &Option<String>, var: &str| {
            value
                .clone()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    ServerError::Config(format!(
                        "{var} is required for AUTH_TYPE={}",
                        self.auth_type_name()
                    ))
                })
        };

        Ok(match self.auth_type {
            AuthType::None => AuthConfig::None,
            AuthType::Basic => AuthConfig::Basic {
                username: required(&self.auth_username, "AUTH_USERNAME")?,
                password: required(&self.auth_password, "AUTH_PASSWORD")?,
            },
            AuthType::Bearer => AuthConfig::Bearer {
                token: self.auth_token.clone().filter(|t| !t.trim().is_empty()),
            },
            AuthType::ApiKey => AuthConfig::ApiKey {
                key: required(&self.auth_api_key, "AUTH_API_KEY")?,
                name: self.auth_api_key_name.clone(),
                location: self
                    .auth_api_key_in
                    .parse::<CredentialLocation>()
                    .map_err(|e| ServerError::Config(e.to_string()))?,
            },
            AuthType::Cognito => AuthConfig::Cognito(CognitoConfig {
                client_id: required(&self.auth_cognito_client_id, "AUTH_COGNITO_CLIENT_ID")?,
                username: required(&self.auth_cognito_username, "AUTH_COGNITO_USERNAME")?,
                password: required(&self.auth_cognito_password, "AUTH_COGNITO_PASSWORD")?,
                user_pool_id: required(
                    &self.auth_cognito_user_pool_id,
                    "AUTH_COGNITO_USER_POOL_ID",
                )?,
                region: self.auth_cognito_region.clone(),
                endpoint: None,
            }),
        })
    }

    fn auth_type_name(&self) -> &'static str {
        match self.auth_type {
            AuthType::None => "none",
            AuthType::Basic => "basic",
            AuthType::Bearer => "bearer",
            AuthType::ApiKey => "api_key",
            AuthType::Cognito => "cognito",
        }
    }
}
