//! Tool invocation: argument binding, caching, auth, retries.

use crate::config::ApiConfig;
use crate::descriptor::{BodyEncoding, QuerySerialization, RequestBodyDescriptor};
use crate::error::{OpenApiToolsError, Result};
use crate::synth::{ArgTarget, CredentialFormat, ToolDescriptor};
use base64::Engine as _;
use mime::Mime;
use openapi_mcp_http::auth::{AuthProvider, bearer_header_value, place_credential};
use openapi_mcp_http::cache::{CacheKey, ResponseCache};
use openapi_mcp_http::error::HttpToolsError;
use openapi_mcp_http::request::{
    MultipartField, MultipartValue, OutboundRequest, QueryPair, RequestBody, encode_path_segment,
};
use openapi_mcp_http::retry::{RetryPolicy, is_retryable_status};
use openapi_mcp_http::safety::{read_body_limited, redact_secrets};
use openapi_mcp_http::semantics::is_cacheable;
use openapiv3::QueryStyle;
use reqwest::Client;
use rmcp::model::JsonObject;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Upstream error bodies are cut to this many characters in error messages.
const MAX_ERROR_BODY_CHARS: usize = 2_000;

/// Response headers worth handing back to the caller.
const SELECTED_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "etag",
    "last-modified",
    "location",
    "link",
    "retry-after",
    "x-request-id",
    "x-total-count",
    "x-ratelimit-limit",
    "x-ratelimit-remaining",
    "x-ratelimit-reset",
];

/// Outcome of one tool call, reported to the [`CallObserver`].
#[derive(Debug, Clone)]
pub struct CallEvent<'a> {
    pub tool: &'a str,
    pub success: bool,
    pub cached: bool,
    pub attempts: u32,
    pub status: Option<u16>,
    pub duration: Duration,
}

/// Receives every invocation outcome (metrics, health reporting).
pub trait CallObserver: Send + Sync {
    fn on_call(&self, event: &CallEvent<'_>);

    /// Aggregated view for health reporting, if the observer keeps one.
    fn summary(&self) -> Option<Value> {
        None
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CallObserver for NoopObserver {
    fn on_call(&self, _event: &CallEvent<'_>) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    /// Images and anything that is not UTF-8.
    Binary { mime_type: String, data: Vec<u8> },
}

impl ResponseBody {
    /// JSON view of the body; binary payloads become a base64 envelope.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Json(v) => v.clone(),
            Self::Text(s) => Value::String(s.clone()),
            Self::Binary { mime_type, data } => json!({
                "encoding": "base64",
                "mimeType": mime_type,
                "data": base64::engine::general_purpose::STANDARD.encode(data),
            }),
        }
    }

    #[must_use]
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Binary { mime_type, .. } if mime_type.starts_with("image/"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
    /// HTTP attempts made for this call (`0` when served from the cache).
    pub attempts: u32,
    pub cached: bool,
}

/// A tool call turned into a request, before auth decoration.
#[derive(Debug, Clone)]
pub struct ComposedRequest {
    pub request: OutboundRequest,
    /// Per-call credential values supplied through arguments.
    pub credential_values: Vec<String>,
    /// Names of the slots those credentials went into.
    pub credential_names: Vec<String>,
}

/// Executes tool calls against the API. Cheap to clone.
#[derive(Clone)]
pub struct Invoker {
    inner: Arc<InvokerInner>,
}

struct InvokerInner {
    client: Client,
    base_url: String,
    auth: AuthProvider,
    cache: ResponseCache<InvocationResult>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    max_response_bytes: Option<usize>,
    observer: Arc<dyn CallObserver>,
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("base_url", &self.inner.base_url)
            .field("auth", &self.inner.auth.kind())
            .field("retry", &self.inner.retry)
            .finish_non_exhaustive()
    }
}

/// Reports a call to the observer when dropped. A call abandoned mid-flight (its future dropped by
/// a caller-side timeout or shutdown) never sets `outcome` and counts as a failure.
struct CallReport<'a> {
    observer: &'a dyn CallObserver,
    tool: &'a str,
    started: Instant,
    attempts: AtomicU32,
    outcome: Option<(bool, bool, Option<u16>)>,
}

impl Drop for CallReport<'_> {
    fn drop(&mut self) {
        let (success, cached, status) = self.outcome.unwrap_or_else(|| {
            tracing::warn!(tool = %self.tool, "tool call abandoned before completion");
            (false, false, None)
        });
        self.observer.on_call(&CallEvent {
            tool: self.tool,
            success,
            cached,
            attempts: self.attempts.load(Ordering::Relaxed),
            status,
            duration: self.started.elapsed(),
        });
    }
}

/// What a single HTTP attempt produced.
struct RawResponse {
    status: u16,
    headers: Vec<(String, String)>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

enum AttemptError {
    Http(HttpToolsError),
    /// A retryable (5xx) status.
    Status { status: u16, body: String },
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_transient(),
            Self::Status { .. } => true,
        }
    }
}

impl Invoker {
    #[must_use]
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        auth: AuthProvider,
        config: &ApiConfig,
        observer: Arc<dyn CallObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(InvokerInner {
                client,
                base_url: base_url.into(),
                auth,
                cache: ResponseCache::new(config.cache),
                retry: config.retry,
                timeout: config.request_timeout(),
                max_response_bytes: config.max_response_bytes,
                observer,
            }),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    #[must_use]
    pub fn auth(&self) -> &AuthProvider {
        &self.inner.auth
    }

    #[must_use]
    pub fn cache(&self) -> &ResponseCache<InvocationResult> {
        &self.inner.cache
    }

    #[must_use]
    pub fn observer(&self) -> &dyn CallObserver {
        self.inner.observer.as_ref()
    }

    /// Call a tool, reporting the outcome to the observer.
    ///
    /// # Errors
    ///
    /// Returns the per-call error variants (`InvalidArguments`, `AuthExchange`, `Network`,
    /// `UpstreamTimeout`, `UpstreamHttp`, `Cancelled`).
    pub async fn invoke(
        &self,
        tool: &ToolDescriptor,
        arguments: Option<&JsonObject>,
        ct: CancellationToken,
    ) -> Result<InvocationResult> {
        let mut report = CallReport {
            observer: self.inner.observer.as_ref(),
            tool: &tool.name,
            started: Instant::now(),
            attempts: AtomicU32::new(0),
            outcome: None,
        };
        let result = self
            .invoke_inner(tool, arguments, &ct, &report.attempts)
            .await;

        report.outcome = Some(match &result {
            Ok(r) => (true, r.cached, Some(r.status)),
            Err(OpenApiToolsError::UpstreamHttp { status, .. }) => (false, false, Some(*status)),
            Err(_) => (false, false, None),
        });
        drop(report);

        match &result {
            Ok(r) => tracing::debug!(
                tool = %tool.name,
                status = r.status,
                attempts = r.attempts,
                cached = r.cached,
                "tool call succeeded"
            ),
            Err(e) => tracing::warn!(tool = %tool.name, "tool call failed: {e}"),
        }
        result
    }

    async fn invoke_inner(
        &self,
        tool: &ToolDescriptor,
        arguments: Option<&JsonObject>,
        ct: &CancellationToken,
        attempts: &AtomicU32,
    ) -> Result<InvocationResult> {
        let empty = JsonObject::new();
        let composed = self.compose(tool, arguments.unwrap_or(&empty))?;
        let method = composed.request.method.clone();

        let cache_key = (is_cacheable(&method) && self.inner.cache.is_enabled()).then(|| {
            let mut sensitive = composed.credential_names.clone();
            if let Some(slot) = self.inner.auth.static_slot() {
                sensitive.push(slot.name);
            }
            CacheKey::for_request(
                &composed.request,
                &credential_scope(self.inner.auth.kind(), &composed.credential_values),
                &sensitive,
            )
        });

        if let Some(key) = &cache_key
            && let Some(hit) = self.inner.cache.get(key)
        {
            tracing::debug!(tool = %tool.name, "cache hit");
            return Ok(InvocationResult {
                attempts: 0,
                cached: true,
                ..hit
            });
        }

        let request = self
            .inner
            .auth
            .decorate(composed.request)
            .await
            .map_err(|e| match e {
                HttpToolsError::AuthExchange { .. } | HttpToolsError::MissingCredentials { .. } => {
                    OpenApiToolsError::AuthExchange {
                        tool: tool.name.clone(),
                        message: e.to_string(),
                    }
                }
                other => OpenApiToolsError::Http(other),
            })?;

        let send = self.inner.retry.run(
            || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.send_once(&request)
            },
            AttemptError::is_retryable,
            |err, delay| {
                let reason = match err {
                    AttemptError::Http(e) => e.to_string(),
                    AttemptError::Status { status, .. } => format!("HTTP {status}"),
                };
                tracing::debug!(tool = %tool.name, ?delay, %reason, "retrying upstream call");
            },
        );

        let outcome = tokio::select! {
            biased;
            () = ct.cancelled() => {
                return Err(OpenApiToolsError::Cancelled { tool: tool.name.clone() });
            }
            r = send => r,
        };

        let attempts_made = attempts.load(Ordering::Relaxed).max(1);
        let retries = attempts_made - 1;
        let mut secrets = self.inner.auth.secrets();
        secrets.extend(composed.credential_values.iter().cloned());

        let raw = match outcome {
            Ok(raw) => raw,
            Err(AttemptError::Status { status, body }) => {
                return Err(OpenApiToolsError::UpstreamHttp {
                    tool: tool.name.clone(),
                    status,
                    body: scrub_body(&body, &secrets),
                    retries,
                });
            }
            Err(AttemptError::Http(HttpToolsError::Timeout(_))) => {
                return Err(OpenApiToolsError::UpstreamTimeout {
                    tool: tool.name.clone(),
                    retries,
                });
            }
            Err(AttemptError::Http(HttpToolsError::InvalidRequest(message))) => {
                return Err(OpenApiToolsError::InvalidArguments {
                    tool: tool.name.clone(),
                    message: redact_secrets(&message, &secrets),
                });
            }
            Err(AttemptError::Http(e)) => {
                return Err(OpenApiToolsError::Network {
                    tool: tool.name.clone(),
                    message: redact_secrets(&e.to_string(), &secrets),
                    retries,
                });
            }
        };

        if !(200..300).contains(&raw.status) {
            if raw.status == 401 {
                self.inner.auth.invalidate().await;
            }
            let body = String::from_utf8_lossy(&raw.bytes);
            return Err(OpenApiToolsError::UpstreamHttp {
                tool: tool.name.clone(),
                status: raw.status,
                body: scrub_body(&body, &secrets),
                retries,
            });
        }

        let result = InvocationResult {
            status: raw.status,
            headers: raw.headers,
            body: decode_body(raw.content_type.as_deref(), raw.bytes),
            attempts: attempts_made,
            cached: false,
        };

        if let Some(key) = cache_key {
            self.inner.cache.put(key, result.clone());
        }
        Ok(result)
    }

    async fn send_once(&self, request: &OutboundRequest) -> std::result::Result<RawResponse, AttemptError> {
        let builder = request
            .to_reqwest(&self.inner.client, self.inner.timeout)
            .map_err(AttemptError::Http)?;
        let resp = builder
            .send()
            .await
            .map_err(|e| AttemptError::Http(e.into()))?;

        let status = resp.status().as_u16();
        let headers = selected_headers(resp.headers());
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = read_body_limited(resp, self.inner.max_response_bytes)
            .await
            .map_err(AttemptError::Http)?;

        if is_retryable_status(status) {
            return Err(AttemptError::Status {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(RawResponse {
            status,
            headers,
            content_type,
            bytes,
        })
    }

    /// GET the API base URL through auth and the retry policy. Any HTTP answer yields its status;
    /// transport failures yield a message with credentials redacted.
    ///
    /// Not reported to the observer and never cached.
    ///
    /// # Errors
    ///
    /// Returns a printable reason when the API could not be reached or auth failed.
    pub async fn probe(&self, ct: &CancellationToken) -> std::result::Result<u16, String> {
        let url = Url::parse(&format!("{}/", self.inner.base_url.trim_end_matches('/')))
            .map_err(|e| format!("invalid base URL: {e}"))?;
        let secrets = self.inner.auth.secrets();
        let request = self
            .inner
            .auth
            .decorate(OutboundRequest::new(reqwest::Method::GET, url))
            .await
            .map_err(|e| redact_secrets(&e.to_string(), &secrets))?;

        let send = self.inner.retry.run(
            || self.send_once(&request),
            AttemptError::is_retryable,
            |_, delay| tracing::debug!(?delay, "retrying health probe"),
        );
        let outcome = tokio::select! {
            biased;
            () = ct.cancelled() => return Err("cancelled".to_string()),
            r = send => r,
        };
        match outcome {
            Ok(raw) => Ok(raw.status),
            Err(AttemptError::Status { status, .. }) => Ok(status),
            Err(AttemptError::Http(e)) => Err(redact_secrets(&e.to_string(), &secrets)),
        }
    }

    /// Bind arguments to the operation's request slots.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::InvalidArguments`] for missing required arguments, unfilled
    /// path templates or undecodable file content.
    pub fn compose(&self, tool: &ToolDescriptor, args: &JsonObject) -> Result<ComposedRequest> {
        let invalid = |message: String| OpenApiToolsError::InvalidArguments {
            tool: tool.name.clone(),
            message,
        };

        let missing: Vec<&str> = tool
            .required_args()
            .filter(|a| args.get(*a).is_none_or(Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(invalid(format!(
                "missing required argument(s): {}",
                missing.join(", ")
            )));
        }

        for name in args.keys() {
            if tool.binding(name).is_none() {
                tracing::debug!(tool = %tool.name, arg = %name, "ignoring unknown argument");
            }
        }

        let op = &tool.operation;
        let mut path = op.path.clone();
        let mut query: Vec<QueryPair> = Vec::new();
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut cookies: Vec<(String, String)> = Vec::new();
        let mut body_fields: Vec<(String, Value, bool)> = Vec::new();
        let mut whole_body: Option<Value> = None;
        let mut credentials = Vec::new();

        for binding in &tool.bindings {
            let Some(value) = args.get(&binding.arg).filter(|v| !v.is_null()) else {
                continue;
            };
            match &binding.target {
                ArgTarget::Path(name) => {
                    path = path.replace(
                        &format!("{{{name}}}"),
                        &encode_path_segment(&value_to_string(value)),
                    );
                }
                ArgTarget::Query {
                    name,
                    serialization,
                } => query.extend(serialize_query_param(
                    name,
                    value,
                    binding.required,
                    serialization,
                )),
                ArgTarget::Header(name) => headers.push((name.clone(), value_to_string(value))),
                ArgTarget::Cookie(name) => cookies.push((name.clone(), value_to_string(value))),
                ArgTarget::BodyField { name, binary } => {
                    body_fields.push((name.clone(), value.clone(), *binary));
                }
                ArgTarget::Body => whole_body = Some(value.clone()),
                ArgTarget::Credential { slot, format } => {
                    let raw = value_to_string(value);
                    let placed = match format {
                        CredentialFormat::Bearer => bearer_header_value(&raw),
                        CredentialFormat::Verbatim => raw.clone(),
                    };
                    credentials.push((slot.clone(), placed, raw));
                }
            }
        }

        if let Some(start) = path.find('{') {
            let rest = &path[start..];
            let end = rest.find('}').map_or(rest.len(), |i| i + 1);
            return Err(invalid(format!(
                "path parameter {} has no value",
                &rest[..end]
            )));
        }

        let url = Url::parse(&format!(
            "{}{}",
            self.inner.base_url.trim_end_matches('/'),
            path
        ))
        .map_err(|e| invalid(format!("cannot build request URL: {e}")))?;

        let mut request = OutboundRequest::new(op.method.clone(), url);
        request.query = query;
        for (name, value) in headers {
            request.set_header(&name, value);
        }
        for (name, value) in cookies {
            request.set_cookie(&name, value);
        }
        if let Some(body) = &op.request_body {
            request.body = build_body(body, whole_body, body_fields).map_err(invalid)?;
        }

        let mut credential_values = Vec::with_capacity(credentials.len());
        let mut credential_names = Vec::with_capacity(credentials.len());
        for (slot, placed, raw) in credentials {
            place_credential(&mut request, &slot, &placed);
            credential_names.push(slot.name);
            credential_values.push(placed);
            if !credential_values.contains(&raw) {
                credential_values.push(raw);
            }
        }

        Ok(ComposedRequest {
            request,
            credential_values,
            credential_names,
        })
    }
}

fn build_body(
    body: &RequestBodyDescriptor,
    whole: Option<Value>,
    fields: Vec<(String, Value, bool)>,
) -> std::result::Result<RequestBody, String> {
    let encoding = &body.encoding;
    let media_type = body.media_type.as_str();
    if whole.is_none() && fields.is_empty() {
        return Ok(match encoding {
            BodyEncoding::Json if body.required => RequestBody::Json(json!({})),
            _ => RequestBody::Empty,
        });
    }

    // A whole-body argument for a form/multipart body is an object of fields.
    let fields: Vec<(String, Value, bool)> = match whole {
        Some(Value::Object(map)) if *encoding != BodyEncoding::Json => map
            .into_iter()
            .map(|(k, v)| {
                let binary = body.binary_fields.contains(&k);
                (k, v, binary)
            })
            .collect(),
        Some(v) => {
            return Ok(match encoding {
                BodyEncoding::Raw => RequestBody::Raw {
                    content_type: media_type.to_string(),
                    bytes: match v {
                        Value::String(s) => s.into_bytes(),
                        other => other.to_string().into_bytes(),
                    },
                },
                BodyEncoding::Json => RequestBody::Json(v),
                BodyEncoding::Form | BodyEncoding::Multipart => {
                    return Err(format!("body for {media_type} must be an object"));
                }
            });
        }
        None => fields,
    };

    match encoding {
        BodyEncoding::Json | BodyEncoding::Raw => {
            let map: Map<String, Value> = fields.into_iter().map(|(k, v, _)| (k, v)).collect();
            Ok(RequestBody::Json(Value::Object(map)))
        }
        BodyEncoding::Form => Ok(RequestBody::Form(
            fields
                .into_iter()
                .map(|(k, v, _)| (k, value_to_string(&v)))
                .collect(),
        )),
        BodyEncoding::Multipart => {
            let mut parts = Vec::with_capacity(fields.len());
            for (name, value, binary) in fields {
                let value = if binary {
                    let encoded = value_to_string(&value);
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(encoded.trim())
                        .map_err(|e| format!("field '{name}' is not valid base64: {e}"))?;
                    MultipartValue::File {
                        filename: name.clone(),
                        bytes,
                        content_type: None,
                    }
                } else {
                    MultipartValue::Text(value_to_string(&value))
                };
                parts.push(MultipartField { name, value });
            }
            Ok(RequestBody::Multipart(parts))
        }
    }
}

/// Stands in for credential values in cache keys.
fn credential_scope(kind: &str, values: &[String]) -> String {
    if values.is_empty() {
        return kind.to_string();
    }
    let mut h = Sha256::new();
    for v in values {
        h.update(v.as_bytes());
        h.update([0]);
    }
    format!("{kind}:{}", hex::encode(h.finalize()))
}

fn scrub_body(body: &str, secrets: &[String]) -> String {
    let redacted = redact_secrets(body.trim(), secrets);
    match redacted.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((idx, _)) => format!("{}...", &redacted[..idx]),
        None => redacted,
    }
}

fn selected_headers(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    SELECTED_HEADERS
        .iter()
        .filter_map(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .map(|v| ((*name).to_string(), v.to_string()))
        })
        .collect()
}

fn decode_body(content_type: Option<&str>, bytes: Vec<u8>) -> ResponseBody {
    let parsed: Option<Mime> = content_type.and_then(|c| c.parse().ok());

    if let Some(m) = &parsed
        && m.type_() == mime::IMAGE
    {
        return ResponseBody::Binary {
            mime_type: m.essence_str().to_string(),
            data: bytes,
        };
    }

    let is_json = parsed
        .as_ref()
        .is_some_and(|m| m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON));

    match String::from_utf8(bytes) {
        Ok(text) if is_json || parsed.is_none() => serde_json::from_str(&text)
            .map(ResponseBody::Json)
            .unwrap_or(ResponseBody::Text(text)),
        Ok(text) => ResponseBody::Text(text),
        Err(e) => ResponseBody::Binary {
            mime_type: parsed.map_or_else(
                || "application/octet-stream".to_string(),
                |m| m.essence_str().to_string(),
            ),
            data: e.into_bytes(),
        },
    }
}

/// Convert a JSON value to a string for URL/header parameters.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

fn serialize_query_param(
    name: &str,
    value: &Value,
    required: bool,
    ser: &QuerySerialization,
) -> Vec<QueryPair> {
    if query_value_is_empty(value) {
        return if ser.allow_empty_value || required {
            vec![pair(name, String::new(), ser.allow_reserved)]
        } else {
            Vec::new()
        };
    }

    match value {
        Value::Array(arr) => serialize_query_array(name, arr, ser),
        Value::Object(map) => serialize_query_object(name, map, ser),
        _ => vec![pair(name, value_to_string(value), ser.allow_reserved)],
    }
}

fn pair(key: impl Into<String>, value: String, allow_reserved: bool) -> QueryPair {
    QueryPair {
        key: key.into(),
        value,
        allow_reserved,
    }
}

fn query_value_is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

fn serialize_query_array(name: &str, arr: &[Value], ser: &QuerySerialization) -> Vec<QueryPair> {
    let items: Vec<String> = arr.iter().map(value_to_string).collect();
    let joined = |sep: &str| vec![pair(name, items.join(sep), ser.allow_reserved)];
    match ser.style {
        QueryStyle::Form if ser.explode => items
            .iter()
            .map(|v| pair(name, v.clone(), ser.allow_reserved))
            .collect(),
        QueryStyle::Form | QueryStyle::DeepObject => joined(","),
        QueryStyle::SpaceDelimited => joined(" "),
        QueryStyle::PipeDelimited => joined("|"),
    }
}

fn serialize_query_object(
    name: &str,
    map: &Map<String, Value>,
    ser: &QuerySerialization,
) -> Vec<QueryPair> {
    match ser.style {
        QueryStyle::DeepObject => map
            .iter()
            .map(|(k, v)| pair(format!("{name}[{k}]"), value_to_string(v), ser.allow_reserved))
            .collect(),
        QueryStyle::Form if ser.explode => map
            .iter()
            .map(|(k, v)| pair(k.clone(), value_to_string(v), ser.allow_reserved))
            .collect(),
        QueryStyle::Form => {
            let parts: Vec<String> = map
                .iter()
                .flat_map(|(k, v)| [k.clone(), value_to_string(v)])
                .collect();
            vec![pair(name, parts.join(","), ser.allow_reserved)]
        }
        QueryStyle::SpaceDelimited | QueryStyle::PipeDelimited => vec![pair(
            name,
            Value::Object(map.clone()).to_string(),
            ser.allow_reserved,
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{normalize_value, parse_document};
    use crate::resolver::DocId;
    use crate::synth::{SynthOptions, synthesize};
    use axum::Router;
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use openapi_mcp_http::auth::{AuthConfig, CredentialLocation};
    use openapi_mcp_http::cache::CacheConfig;
    use openapi_mcp_test_support::spawn_router;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    const API: &str = r##"
openapi: 3.0.3
info: { title: Items, version: "1" }
paths:
  /items:
    get:
      operationId: listItems
      summary: List items
      parameters:
        - { name: tag, in: query, schema: { type: array, items: { type: string } } }
        - { name: kind, in: query, style: pipeDelimited, schema: { type: array, items: { type: string } } }
        - { name: filter, in: query, style: deepObject, schema: { type: object } }
        - { name: X-Trace, in: header, schema: { type: string } }
      responses: { "200": { description: ok } }
  /items/{id}:
    get:
      operationId: getItem
      summary: Get item
      parameters:
        - { name: id, in: path, required: true, schema: { type: string } }
      responses: { "200": { description: ok } }
  /flaky:
    get:
      operationId: flaky
      summary: Flaky
      responses: { "200": { description: ok } }
  /missing:
    get:
      operationId: missing
      summary: Missing
      responses: { "200": { description: ok } }
  /slow:
    get:
      operationId: slow
      summary: Slow
      responses: { "200": { description: ok } }
  /whoami:
    get:
      operationId: whoami
      summary: Whoami
      parameters:
        - { name: X-API-Key, in: header, schema: { type: string } }
      responses: { "200": { description: ok } }
  /upload:
    post:
      operationId: upload
      summary: Upload
      requestBody:
        required: true
        content:
          multipart/form-data:
            schema:
              type: object
              required: [file]
              properties:
                file: { type: string, format: binary }
                note: { type: string }
      responses: { "200": { description: ok } }
"##;

    #[derive(Clone, Default)]
    struct Upstream {
        hits: Arc<HashMap<&'static str, AtomicUsize>>,
    }

    impl Upstream {
        fn new() -> Self {
            let hits = ["flaky", "missing", "items", "whoami"]
                .into_iter()
                .map(|k| (k, AtomicUsize::new(0)))
                .collect();
            Self {
                hits: Arc::new(hits),
            }
        }

        fn bump(&self, key: &str) -> usize {
            self.hits[key].fetch_add(1, Ordering::SeqCst) + 1
        }

        fn count(&self, key: &str) -> usize {
            self.hits[key].load(Ordering::SeqCst)
        }
    }

    async fn flaky(State(up): State<Upstream>) -> (StatusCode, String) {
        if up.bump("flaky") <= 3 {
            (StatusCode::SERVICE_UNAVAILABLE, "try later".to_string())
        } else {
            (StatusCode::OK, r#"{"ok":true}"#.to_string())
        }
    }

    async fn missing(State(up): State<Upstream>) -> (StatusCode, &'static str) {
        up.bump("missing");
        (StatusCode::NOT_FOUND, "no such thing")
    }

    async fn items(
        State(up): State<Upstream>,
        Query(q): Query<Vec<(String, String)>>,
    ) -> axum::Json<Value> {
        let n = up.bump("items");
        axum::Json(json!({ "call": n, "query": q }))
    }

    async fn whoami(State(up): State<Upstream>, headers: HeaderMap) -> axum::Json<Value> {
        up.bump("whoami");
        let key = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        axum::Json(json!({ "key": key }))
    }

    async fn slow() -> &'static str {
        tokio::time::sleep(Duration::from_secs(10)).await;
        "late"
    }

    fn router(up: Upstream) -> Router {
        Router::new()
            .route("/items", get(items))
            .route("/flaky", get(flaky))
            .route("/missing", get(missing))
            .route("/whoami", get(whoami))
            .route("/slow", get(slow))
            .with_state(up)
    }

    fn fast_config(auth: AuthConfig) -> ApiConfig {
        let mut cfg = ApiConfig::new("items", "unused");
        cfg.auth = auth;
        cfg.retry = RetryPolicy {
            max_retries: 3,
            min_delay_ms: 1,
            max_delay_ms: 5,
            backoff_factor: 2.0,
            jitter: false,
        };
        cfg
    }

    async fn setup(cfg: &ApiConfig, base_url: &str) -> (Vec<ToolDescriptor>, Invoker) {
        setup_observed(cfg, base_url, Arc::new(NoopObserver)).await
    }

    async fn setup_observed(
        cfg: &ApiConfig,
        base_url: &str,
        observer: Arc<dyn CallObserver>,
    ) -> (Vec<ToolDescriptor>, Invoker) {
        let client = Client::new();
        let value = parse_document("inline", API.as_bytes()).unwrap();
        let spec = normalize_value(DocId::File("/virtual/api.yaml".into()), value, &client)
            .await
            .unwrap();
        let auth = AuthProvider::new(&cfg.auth, client.clone()).unwrap();
        let tools = synthesize(&spec, &SynthOptions::for_provider(&auth, cfg.flatten_threshold));
        let invoker = Invoker::new(client, base_url, auth, cfg, observer);
        (tools, invoker)
    }

    fn find<'a>(tools: &'a [ToolDescriptor], name: &str) -> &'a ToolDescriptor {
        tools.iter().find(|t| t.name == name).unwrap()
    }

    fn args(v: Value) -> JsonObject {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn composes_query_styles_and_path() {
        let cfg = fast_config(AuthConfig::None);
        let (tools, invoker) = setup(&cfg, "http://api.test/v1/").await;

        let composed = invoker
            .compose(
                find(&tools, "list_items"),
                &args(json!({
                    "tag": ["a", "b"],
                    "kind": ["x", "y"],
                    "filter": { "color": "red" },
                    "X-Trace": "t-1",
                    "unknown": 1
                })),
            )
            .unwrap();
        let req = composed.request;
        assert_eq!(
            req.full_url().as_str(),
            "http://api.test/v1/items?tag=a&tag=b&kind=x%7Cy&filter%5Bcolor%5D=red"
        );
        assert_eq!(req.header("X-Trace"), Some("t-1"));

        let composed = invoker
            .compose(find(&tools, "get_item"), &args(json!({ "id": "a b/c" })))
            .unwrap();
        assert_eq!(composed.request.url.path(), "/v1/items/a%20b%2Fc");
    }

    #[tokio::test]
    async fn missing_required_arguments_fail_before_io() {
        let cfg = fast_config(AuthConfig::None);
        let (tools, invoker) = setup(&cfg, "http://127.0.0.1:9").await;
        let err = invoker
            .invoke(find(&tools, "get_item"), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(
            matches!(&err, OpenApiToolsError::InvalidArguments { message, .. } if message.contains("id")),
            "{err}"
        );
    }

    #[tokio::test]
    async fn multipart_binary_fields_are_decoded() {
        let cfg = fast_config(AuthConfig::None);
        let (tools, invoker) = setup(&cfg, "http://api.test").await;
        let composed = invoker
            .compose(
                find(&tools, "upload"),
                &args(json!({ "file": "aGVsbG8=", "note": "hi" })),
            )
            .unwrap();
        let RequestBody::Multipart(parts) = composed.request.body else {
            panic!("expected multipart body");
        };
        assert_eq!(
            parts[0].value,
            MultipartValue::File {
                filename: "file".to_string(),
                bytes: b"hello".to_vec(),
                content_type: None
            }
        );
        assert_eq!(parts[1].value, MultipartValue::Text("hi".to_string()));

        let err = invoker
            .compose(find(&tools, "upload"), &args(json!({ "file": "***" })))
            .unwrap_err();
        assert!(matches!(err, OpenApiToolsError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn whole_multipart_body_still_sends_files() {
        let mut cfg = fast_config(AuthConfig::None);
        cfg.flatten_threshold = 0;
        let (tools, invoker) = setup(&cfg, "http://api.test").await;
        let upload = find(&tools, "upload");
        assert_eq!(upload.binding("body").unwrap().target, ArgTarget::Body);

        let composed = invoker
            .compose(
                upload,
                &args(json!({ "body": { "file": "aGVsbG8=", "note": "z" } })),
            )
            .unwrap();
        let RequestBody::Multipart(parts) = composed.request.body else {
            panic!("expected multipart body");
        };
        assert_eq!(parts[0].name, "file");
        assert_eq!(
            parts[0].value,
            MultipartValue::File {
                filename: "file".to_string(),
                bytes: b"hello".to_vec(),
                content_type: None
            }
        );
        assert_eq!(parts[1].value, MultipartValue::Text("z".to_string()));
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let up = Upstream::new();
        let server = spawn_router(router(up.clone())).await.unwrap();
        let cfg = fast_config(AuthConfig::None);
        let (tools, invoker) = setup(&cfg, &server.base_url()).await;

        let result = invoker
            .invoke(find(&tools, "flaky"), None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(result.attempts, 4);
        assert_eq!(result.body, ResponseBody::Json(json!({ "ok": true })));
        assert_eq!(up.count("flaky"), 4);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let up = Upstream::new();
        let server = spawn_router(router(up.clone())).await.unwrap();
        let mut cfg = fast_config(AuthConfig::None);
        cfg.retry.max_retries = 2;
        let (tools, invoker) = setup(&cfg, &server.base_url()).await;

        let err = invoker
            .invoke(find(&tools, "flaky"), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, OpenApiToolsError::UpstreamHttp { status: 503, retries: 2, .. }),
            "{err}"
        );
        assert_eq!(up.count("flaky"), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let up = Upstream::new();
        let server = spawn_router(router(up.clone())).await.unwrap();
        let cfg = fast_config(AuthConfig::None);
        let (tools, invoker) = setup(&cfg, &server.base_url()).await;

        let err = invoker
            .invoke(find(&tools, "missing"), None, CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            OpenApiToolsError::UpstreamHttp {
                tool,
                status,
                body,
                retries,
            } => {
                assert_eq!(tool, "missing");
                assert_eq!(status, 404);
                assert_eq!(body, "no such thing");
                assert_eq!(retries, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(up.count("missing"), 1);
    }

    #[tokio::test]
    async fn caches_get_responses_until_ttl_expires() {
        let up = Upstream::new();
        let server = spawn_router(router(up.clone())).await.unwrap();
        let mut cfg = fast_config(AuthConfig::None);
        cfg.cache = CacheConfig {
            ttl_secs: 1,
            capacity: 10,
        };
        let (tools, invoker) = setup(&cfg, &server.base_url()).await;
        let tool = find(&tools, "list_items");
        let a = args(json!({ "tag": ["x"] }));

        let first = invoker
            .invoke(tool, Some(&a), CancellationToken::new())
            .await
            .unwrap();
        let second = invoker
            .invoke(tool, Some(&a), CancellationToken::new())
            .await
            .unwrap();
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.attempts, 0);
        assert_eq!(first.body, second.body);
        assert_eq!(up.count("items"), 1);

        // Different arguments are a different key.
        invoker
            .invoke(tool, Some(&args(json!({ "tag": ["y"] }))), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(up.count("items"), 2);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let third = invoker
            .invoke(tool, Some(&a), CancellationToken::new())
            .await
            .unwrap();
        assert!(!third.cached);
        assert_eq!(up.count("items"), 3);
    }

    #[tokio::test]
    async fn static_api_key_is_sent_on_every_call() {
        let up = Upstream::new();
        let server = spawn_router(router(up.clone())).await.unwrap();
        let mut cfg = fast_config(AuthConfig::ApiKey {
            key: "k-123456".to_string(),
            name: "X-API-Key".to_string(),
            location: CredentialLocation::Header,
        });
        cfg.cache.capacity = 0;
        let (tools, invoker) = setup(&cfg, &server.base_url()).await;
        let tool = find(&tools, "whoami");
        assert!(tool.binding("X-API-Key").is_none());

        for _ in 0..2 {
            let result = invoker
                .invoke(
                    tool,
                    Some(&args(json!({ "X-API-Key": "caller-value" }))),
                    CancellationToken::new(),
                )
                .await
                .unwrap();
            assert_eq!(result.body.to_json(), json!({ "key": "k-123456" }));
        }
        assert_eq!(up.count("whoami"), 2);
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_call() {
        let server = spawn_router(router(Upstream::new())).await.unwrap();
        let cfg = fast_config(AuthConfig::None);
        let (tools, invoker) = setup(&cfg, &server.base_url()).await;

        let ct = CancellationToken::new();
        let trigger = ct.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = invoker
            .invoke(find(&tools, "slow"), None, ct)
            .await
            .unwrap_err();
        assert!(matches!(err, OpenApiToolsError::Cancelled { .. }), "{err}");
    }

    #[tokio::test]
    async fn timeouts_are_reported_with_retry_count() {
        let server = spawn_router(router(Upstream::new())).await.unwrap();
        let mut cfg = fast_config(AuthConfig::None);
        cfg.timeout_secs = 1;
        cfg.retry.max_retries = 1;
        let (tools, invoker) = setup(&cfg, &server.base_url()).await;

        let err = invoker
            .invoke(find(&tools, "slow"), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, OpenApiToolsError::UpstreamTimeout { retries: 1, .. }),
            "{err}"
        );
    }

    #[derive(Default)]
    struct Recording(parking_lot::Mutex<Vec<(String, bool)>>);

    impl CallObserver for Recording {
        fn on_call(&self, event: &CallEvent<'_>) {
            self.0.lock().push((event.tool.to_string(), event.success));
        }
    }

    #[tokio::test]
    async fn abandoned_calls_are_reported_as_failures() {
        let up = Upstream::new();
        let server = spawn_router(router(up.clone())).await.unwrap();
        let cfg = fast_config(AuthConfig::None);
        let observer = Arc::new(Recording::default());
        let (tools, invoker) = setup_observed(&cfg, &server.base_url(), observer.clone()).await;

        let call = invoker.invoke(find(&tools, "slow"), None, CancellationToken::new());
        assert!(
            tokio::time::timeout(Duration::from_millis(100), call)
                .await
                .is_err()
        );
        invoker
            .invoke(find(&tools, "whoami"), None, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            *observer.0.lock(),
            vec![("slow".to_string(), false), ("whoami".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn probe_reports_status_or_reason() {
        let server = spawn_router(router(Upstream::new())).await.unwrap();
        let cfg = fast_config(AuthConfig::None);
        let observer = Arc::new(Recording::default());
        let (_, invoker) = setup_observed(&cfg, &server.base_url(), observer.clone()).await;
        assert_eq!(invoker.probe(&CancellationToken::new()).await, Ok(404));

        let (_, unreachable) = setup(&cfg, "http://127.0.0.1:9").await;
        assert!(unreachable.probe(&CancellationToken::new()).await.is_err());
        assert!(observer.0.lock().is_empty());
    }

    #[test]
    fn decodes_bodies_by_content_type() {
        assert_eq!(
            decode_body(Some("application/json"), br#"{"a":1}"#.to_vec()),
            ResponseBody::Json(json!({ "a": 1 }))
        );
        assert_eq!(
            decode_body(Some("text/plain"), b"{\"a\":1}".to_vec()),
            ResponseBody::Text("{\"a\":1}".to_string())
        );
        assert!(decode_body(Some("image/png"), vec![0x89, 0x50]).is_image());
        let binary = decode_body(Some("application/octet-stream"), vec![0xff, 0xfe]);
        assert_eq!(binary.to_json()["encoding"], "base64");
    }

    #[test]
    fn scrubs_secrets_and_truncates_error_bodies() {
        let body = format!("token=supersecret {}", "x".repeat(3_000));
        let scrubbed = scrub_body(&body, &["supersecret".to_string()]);
        assert!(!scrubbed.contains("supersecret"));
        assert!(scrubbed.ends_with("..."));
        assert!(scrubbed.chars().count() <= MAX_ERROR_BODY_CHARS + 3);
    }
}
