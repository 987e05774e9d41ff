//! Request authentication.
//!
//! [`AuthConfig`] is the resolved, serde-friendly description of the credentials; an
//! [`AuthProvider`] built from it decorates [`OutboundRequest`]s. Only the Cognito variant does
//! I/O (token exchange); every other kind is a pure transformation.

use crate::cognito::{CognitoConfig, CognitoTokenSource};
use crate::error::{HttpToolsError, Result};
use crate::request::OutboundRequest;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const AUTHORIZATION: &str = "Authorization";
pub const DEFAULT_API_KEY_NAME: &str = "api_key";

/// Where a credential is placed on the outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialLocation {
    #[default]
    Header,
    Query,
    Cookie,
}

impl CredentialLocation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Query => "query",
            Self::Cookie => "cookie",
        }
    }
}

impl FromStr for CredentialLocation {
    type Err = HttpToolsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "header" => Ok(Self::Header),
            "query" => Ok(Self::Query),
            "cookie" => Ok(Self::Cookie),
            other => Err(HttpToolsError::Config(format!(
                "invalid credential location '{other}' (expected header, query or cookie)"
            ))),
        }
    }
}

impl fmt::Display for CredentialLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named slot on the request (e.g. header `X-API-Key`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialSlot {
    pub location: CredentialLocation,
    pub name: String,
}

impl CredentialSlot {
    #[must_use]
    pub fn new(location: CredentialLocation, name: impl Into<String>) -> Self {
        Self {
            location,
            name: name.into(),
        }
    }

    /// Whether this slot names the given parameter (header and cookie names compare
    /// case-insensitively for headers only).
    #[must_use]
    pub fn matches(&self, location: CredentialLocation, name: &str) -> bool {
        self.location == location
            && match location {
                CredentialLocation::Header => self.name.eq_ignore_ascii_case(name),
                CredentialLocation::Query | CredentialLocation::Cookie => self.name == name,
            }
    }
}

/// Authentication settings for the upstream API.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        /// Static token. Without one, tools accept a per-call `Authorization` argument.
        #[serde(default)]
        token: Option<String>,
    },
    ApiKey {
        key: String,
        #[serde(default = "default_api_key_name")]
        name: String,
        #[serde(default)]
        location: CredentialLocation,
    },
    Cognito(CognitoConfig),
}

fn default_api_key_name() -> String {
    DEFAULT_API_KEY_NAME.to_string()
}

// Hand-written so credentials never end up in logs via `{:?}`.
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Self::Bearer { token } => f
                .debug_struct("Bearer")
                .field("token", &token.as_ref().map(|_| "***"))
                .finish(),
            Self::ApiKey { name, location, .. } => f
                .debug_struct("ApiKey")
                .field("name", name)
                .field("location", location)
                .field("key", &"***")
                .finish(),
            Self::Cognito(c) => f.debug_tuple("Cognito").field(c).finish(),
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::ApiKey { .. } => "api_key",
            Self::Cognito(_) => "cognito",
        }
    }

    /// Check that every credential the selected kind needs is present.
    ///
    /// # Errors
    ///
    /// Returns [`HttpToolsError::MissingCredentials`] naming the missing fields.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = match self {
            Self::None | Self::Bearer { .. } => Vec::new(),
            Self::Basic { username, password } => [("username", username), ("password", password)]
                .into_iter()
                .filter(|(_, v)| v.trim().is_empty())
                .map(|(k, _)| k)
                .collect(),
            Self::ApiKey { key, name, .. } => [("key", key), ("name", name)]
                .into_iter()
                .filter(|(_, v)| v.trim().is_empty())
                .map(|(k, _)| k)
                .collect(),
            Self::Cognito(c) => c.missing_fields(),
        };

        if missing.is_empty() {
            return Ok(());
        }
        Err(HttpToolsError::MissingCredentials {
            provider: self.provider_label(),
            message: format!("missing {}", missing.join(", ")),
        })
    }

    fn provider_label(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Basic { .. } => "BASIC",
            Self::Bearer { .. } => "BEARER",
            Self::ApiKey { .. } => "API_KEY",
            Self::Cognito(_) => "COGNITO",
        }
    }
}

/// How a provider handles credentials that are not configured statically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicAuth {
    /// Credentials are injected by the provider; nothing is exposed to callers.
    Disabled,
    /// Operations declaring security requirements expose the matching credential arguments.
    FromSecuritySchemes,
    /// Every tool accepts an optional `Authorization` argument (bearer without a static token).
    AuthorizationOverride,
}

#[derive(Clone)]
pub struct AuthProvider {
    inner: Arc<Inner>,
}

enum Inner {
    None,
    Basic { header_value: String },
    Bearer { header_value: Option<String> },
    ApiKey { slot: CredentialSlot, key: String },
    Cognito(CognitoTokenSource),
}

impl fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthProvider")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

impl AuthProvider {
    /// Build a provider for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials required by the selected kind are missing.
    pub fn new(config: &AuthConfig, http: Client) -> Result<Self> {
        config.validate()?;

        let inner = match config {
            AuthConfig::None => Inner::None,
            AuthConfig::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                Inner::Basic {
                    header_value: format!("Basic {encoded}"),
                }
            }
            AuthConfig::Bearer { token } => Inner::Bearer {
                header_value: token
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(bearer_header_value),
            },
            AuthConfig::ApiKey {
                key,
                name,
                location,
            } => Inner::ApiKey {
                slot: CredentialSlot::new(*location, name.clone()),
                key: key.clone(),
            },
            AuthConfig::Cognito(c) => Inner::Cognito(CognitoTokenSource::new(c.clone(), http)?),
        };

        tracing::debug!(kind = config.kind(), "auth provider configured");
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    #[must_use]
    pub fn none() -> Self {
        Self {
            inner: Arc::new(Inner::None),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match &*self.inner {
            Inner::None => "none",
            Inner::Basic { .. } => "basic",
            Inner::Bearer { .. } => "bearer",
            Inner::ApiKey { .. } => "api_key",
            Inner::Cognito(_) => "cognito",
        }
    }

    /// The request slot this provider fills on every call, if any.
    ///
    /// Spec parameters naming this slot are hidden from tool arguments.
    #[must_use]
    pub fn static_slot(&self) -> Option<CredentialSlot> {
        match &*self.inner {
            Inner::None | Inner::Bearer { header_value: None } => None,
            Inner::Basic { .. } | Inner::Bearer { .. } | Inner::Cognito(_) => Some(
                CredentialSlot::new(CredentialLocation::Header, AUTHORIZATION),
            ),
            Inner::ApiKey { slot, .. } => Some(slot.clone()),
        }
    }

    #[must_use]
    pub fn dynamic_auth(&self) -> DynamicAuth {
        match &*self.inner {
            Inner::None => DynamicAuth::FromSecuritySchemes,
            Inner::Bearer { header_value: None } => DynamicAuth::AuthorizationOverride,
            _ => DynamicAuth::Disabled,
        }
    }

    /// Static secret values, for scrubbing error messages.
    #[must_use]
    pub fn secrets(&self) -> Vec<String> {
        match &*self.inner {
            Inner::None | Inner::Bearer { header_value: None } | Inner::Cognito(_) => Vec::new(),
            Inner::Basic { header_value } => vec![header_value.clone()],
            Inner::Bearer {
                header_value: Some(v),
            } => vec![v.clone()],
            Inner::ApiKey { key, .. } => vec![key.clone()],
        }
    }

    /// Inject credentials into the request.
    ///
    /// Statically configured credentials override any value the caller supplied for the same slot.
    ///
    /// # Errors
    ///
    /// Returns [`HttpToolsError::AuthExchange`] if a Cognito token cannot be obtained.
    pub async fn decorate(&self, mut request: OutboundRequest) -> Result<OutboundRequest> {
        match &*self.inner {
            Inner::None | Inner::Bearer { header_value: None } => {}
            Inner::Basic { header_value }
            | Inner::Bearer {
                header_value: Some(header_value),
            } => request.set_header(AUTHORIZATION, header_value.clone()),
            Inner::ApiKey { slot, key } => place_credential(&mut request, slot, key),
            Inner::Cognito(source) => {
                let token = source.token().await?;
                request.set_header(AUTHORIZATION, bearer_header_value(&token));
            }
        }
        Ok(request)
    }

    /// Drop any cached exchanged token (after the upstream rejected it).
    pub async fn invalidate(&self) {
        if let Inner::Cognito(source) = &*self.inner {
            source.invalidate().await;
        }
    }
}

/// Place a credential value into the given slot.
pub fn place_credential(request: &mut OutboundRequest, slot: &CredentialSlot, value: &str) {
    match slot.location {
        CredentialLocation::Header => request.set_header(&slot.name, value),
        CredentialLocation::Query => request.set_query(&slot.name, value),
        CredentialLocation::Cookie => request.set_cookie(&slot.name, value),
    }
}

/// `Bearer <token>`, leaving values that already carry a scheme untouched.
#[must_use]
pub fn bearer_header_value(token: &str) -> String {
    let token = token.trim();
    if token.len() > 7
        && token
            .get(..7)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("bearer "))
    {
        token.to_string()
    } else {
        format!("Bearer {token}")
    }
}
