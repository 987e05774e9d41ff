//! AWS Cognito user-pool token exchange.
//!
//! Tokens are obtained with `InitiateAuth` (`USER_PASSWORD_AUTH`, or `REFRESH_TOKEN_AUTH` once a
//! refresh token is known) and cached until shortly before they expire. Concurrent callers share
//! one in-flight exchange.

use crate::error::{HttpToolsError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

const PROVIDER: &str = "COGNITO";
const TARGET_INITIATE_AUTH: &str = "AWSCognitoIdentityProviderService.InitiateAuth";
const AMZ_JSON: &str = "application/x-amz-json-1.1";
/// Tokens are treated as expired this long before their advertised expiry.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CognitoConfig {
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub user_pool_id: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Override for the identity provider endpoint (tests, VPC endpoints).
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl fmt::Debug for CognitoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CognitoConfig")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"***")
            .field("user_pool_id", &self.user_pool_id)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl CognitoConfig {
    pub(crate) fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("client_id", &self.client_id),
            ("username", &self.username),
            ("password", &self.password),
            ("user_pool_id", &self.user_pool_id),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect()
    }

    #[must_use]
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(e) if !e.trim().is_empty() => e.trim().to_string(),
            _ => format!("https://cognito-idp.{}.amazonaws.com/", self.region),
        }
    }
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    refresh_token: Option<String>,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Clone)]
pub struct CognitoTokenSource {
    inner: Arc<Inner>,
}

struct Inner {
    config: CognitoConfig,
    endpoint: String,
    http: Client,
    token: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
    exchanges: AtomicU64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    #[serde(default)]
    authentication_result: Option<AuthenticationResult>,
    #[serde(default)]
    challenge_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

fn exchange_error(message: impl Into<String>) -> HttpToolsError {
    HttpToolsError::AuthExchange {
        provider: PROVIDER,
        message: message.into(),
    }
}

impl CognitoTokenSource {
    /// # Errors
    ///
    /// Returns an error if required fields are missing or the endpoint override is not a URL.
    pub fn new(config: CognitoConfig, http: Client) -> Result<Self> {
        let missing = config.missing_fields();
        if !missing.is_empty() {
            return Err(HttpToolsError::MissingCredentials {
                provider: PROVIDER,
                message: format!("missing {}", missing.join(", ")),
            });
        }

        let endpoint = config.endpoint_url();
        url::Url::parse(&endpoint)
            .map_err(|e| HttpToolsError::Config(format!("invalid cognito endpoint: {e}")))?;

        if let Some((pool_region, _)) = config.user_pool_id.split_once('_')
            && pool_region != config.region
        {
            tracing::warn!(
                pool_region,
                region = %config.region,
                "cognito user pool id region differs from configured region"
            );
        }

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                endpoint,
                http,
                token: RwLock::new(None),
                refresh: Mutex::new(()),
                exchanges: AtomicU64::new(0),
            }),
        })
    }

    /// A valid token, exchanging credentials if the cached one is missing or near expiry.
    ///
    /// # Errors
    ///
    /// Returns [`HttpToolsError::AuthExchange`] if the identity provider rejects the exchange.
    pub async fn token(&self) -> Result<String> {
        if let Some(t) = self.inner.token.read().await.as_ref()
            && t.is_fresh()
        {
            return Ok(t.value.clone());
        }

        let _guard = self.inner.refresh.lock().await;

        // Another caller may have finished the exchange while we waited.
        let previous = self.inner.token.read().await.clone();
        if let Some(t) = &previous
            && t.is_fresh()
        {
            return Ok(t.value.clone());
        }

        let refreshed = match previous.and_then(|t| t.refresh_token) {
            Some(refresh_token) => match self.refresh_with(&refresh_token).await {
                Ok(t) => t,
                Err(e) => {
                    tracing::debug!(error = %e, "cognito refresh failed; falling back to password auth");
                    self.password_auth().await?
                }
            },
            None => self.password_auth().await?,
        };

        let value = refreshed.value.clone();
        *self.inner.token.write().await = Some(refreshed);
        Ok(value)
    }

    /// Forget the cached token so the next call exchanges again.
    pub async fn invalidate(&self) {
        if let Some(t) = self.inner.token.write().await.as_mut() {
            t.expires_at = Instant::now();
        }
    }

    /// Number of exchanges performed against the identity provider.
    #[must_use]
    pub fn exchange_count(&self) -> u64 {
        self.inner.exchanges.load(Ordering::Relaxed)
    }

    async fn password_auth(&self) -> Result<CachedToken> {
        let c = &self.inner.config;
        let body = json!({
            "AuthFlow": "USER_PASSWORD_AUTH",
            "ClientId": c.client_id,
            "AuthParameters": {
                "USERNAME": c.username,
                "PASSWORD": c.password,
            },
        });
        self.initiate_auth(body, None).await
    }

    async fn refresh_with(&self, refresh_token: &str) -> Result<CachedToken> {
        let body = json!({
            "AuthFlow": "REFRESH_TOKEN_AUTH",
            "ClientId": self.inner.config.client_id,
            "AuthParameters": { "REFRESH_TOKEN": refresh_token },
        });
        self.initiate_auth(body, Some(refresh_token.to_string()))
            .await
    }

    async fn initiate_auth(
        &self,
        body: Value,
        previous_refresh: Option<String>,
    ) -> Result<CachedToken> {
        self.inner.exchanges.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(endpoint = %self.inner.endpoint, "exchanging cognito credentials");

        let resp = self
            .inner
            .http
            .post(&self.inner.endpoint)
            .header("X-Amz-Target", TARGET_INITIATE_AUTH)
            .header(reqwest::header::CONTENT_TYPE, AMZ_JSON)
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| exchange_error(crate::safety::sanitize_reqwest_error(&e)))?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| exchange_error(crate::safety::sanitize_reqwest_error(&e)))?;

        if !status.is_success() {
            return Err(exchange_error(describe_failure(status, &bytes)));
        }

        let parsed: InitiateAuthResponse = serde_json::from_slice(&bytes)
            .map_err(|e| exchange_error(format!("invalid InitiateAuth response: {e}")))?;

        if let Some(challenge) = parsed.challenge_name {
            return Err(exchange_error(format!(
                "unsupported authentication challenge '{challenge}'"
            )));
        }

        let result = parsed
            .authentication_result
            .ok_or_else(|| exchange_error("InitiateAuth response has no AuthenticationResult"))?;

        let value = result
            .id_token
            .or(result.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| exchange_error("InitiateAuth response carries no token"))?;

        let lifetime = Duration::from_secs(result.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS))
            .saturating_sub(EXPIRY_SKEW);

        Ok(CachedToken {
            value,
            refresh_token: result.refresh_token.or(previous_refresh),
            expires_at: Instant::now() + lifetime,
        })
    }
}

fn describe_failure(status: reqwest::StatusCode, body: &[u8]) -> String {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();
    let kind = parsed
        .as_ref()
        .and_then(|v| v.get("__type"))
        .and_then(Value::as_str)
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string());
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message").or_else(|| v.get("Message")))
        .and_then(Value::as_str)
        .map(str::to_string);

    match (kind, message) {
        (Some(k), Some(m)) => format!("{k}: {m} (HTTP {status})"),
        (Some(k), None) => format!("{k} (HTTP {status})"),
        (None, Some(m)) => format!("{m} (HTTP {status})"),
        (None, None) => format!("HTTP {status}"),
    }
}
