//! A transport-neutral description of one outbound API request.
//!
//! Tool invocations are composed into an [`OutboundRequest`] first, then decorated by the auth
//! provider, fingerprinted by the cache and finally turned into a `reqwest` request once per
//! attempt. Keeping the request as plain data makes every step testable without a server and lets
//! retries rebuild non-cloneable bodies (multipart) from scratch.

use crate::error::{HttpToolsError, Result};
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPair {
    pub key: String,
    pub value: String,
    /// Keep RFC 3986 reserved characters unencoded in the value (`allowReserved`).
    pub allow_reserved: bool,
}

impl QueryPair {
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            allow_reserved: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MultipartValue {
    Text(String),
    File {
        filename: String,
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultipartField {
    pub name: String,
    pub value: MultipartValue,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
    Multipart(Vec<MultipartField>),
    /// Raw payload with an explicit media type (e.g. `text/plain`).
    Raw {
        content_type: String,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// Absolute URL without a query string.
    pub url: Url,
    pub query: Vec<QueryPair>,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub body: RequestBody,
}

impl OutboundRequest {
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            query: Vec::new(),
            headers: Vec::new(),
            cookies: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// Set a header, replacing any existing value with the same (case-insensitive) name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set a query parameter, replacing every existing pair with the same key.
    pub fn set_query(&mut self, key: &str, value: impl Into<String>) {
        self.query.retain(|p| p.key != key);
        self.query.push(QueryPair::new(key, value));
    }

    /// Set a cookie, replacing any existing cookie with the same name.
    pub fn set_cookie(&mut self, name: &str, value: impl Into<String>) {
        self.cookies.retain(|(k, _)| k != name);
        self.cookies.push((name.to_string(), value.into()));
    }

    /// The full URL including the encoded query string.
    #[must_use]
    pub fn full_url(&self) -> Url {
        let mut url = self.url.clone();
        if self.query.is_empty() {
            url.set_query(None);
            return url;
        }

        let mut query = String::new();
        for (i, p) in self.query.iter().enumerate() {
            if i > 0 {
                query.push('&');
            }
            query.push_str(&encode_query_component(&p.key, false));
            query.push('=');
            query.push_str(&encode_query_component(&p.value, p.allow_reserved));
        }
        url.set_query(Some(&query));
        url
    }

    /// Build a `reqwest` request for one attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if a header name/value is invalid or a multipart part cannot be built.
    pub fn to_reqwest(&self, client: &Client, timeout: Option<Duration>) -> Result<RequestBuilder> {
        let mut request = client.request(self.method.clone(), self.full_url());

        for (name, value) in &self.headers {
            let name = reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                HttpToolsError::InvalidRequest(format!("invalid header name '{name}': {e}"))
            })?;
            let value = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
                HttpToolsError::InvalidRequest(format!("invalid value for header '{name}': {e}"))
            })?;
            request = request.header(name, value);
        }

        if !self.cookies.is_empty() {
            let mut pairs = Vec::with_capacity(self.cookies.len());
            for (name, value) in &self.cookies {
                if name.is_empty() || !name.bytes().all(is_cookie_name_byte) {
                    return Err(HttpToolsError::InvalidRequest(format!(
                        "invalid cookie name '{name}'"
                    )));
                }
                pairs.push(format!("{name}={}", encode_cookie_value(value)));
            }
            let cookie = pairs.join("; ");
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        request = match &self.body {
            RequestBody::Empty => request,
            RequestBody::Json(v) => request.json(v),
            RequestBody::Form(pairs) => request.form(pairs),
            RequestBody::Multipart(fields) => request.multipart(build_multipart(fields)?),
            RequestBody::Raw {
                content_type,
                bytes,
            } => request
                .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                .body(bytes.clone()),
        };

        if let Some(t) = timeout {
            request = request.timeout(t);
        }

        Ok(request)
    }
}

fn build_multipart(fields: &[MultipartField]) -> Result<reqwest::multipart::Form> {
    let mut form = reqwest::multipart::Form::new();
    for field in fields {
        form = match &field.value {
            MultipartValue::Text(s) => form.text(field.name.clone(), s.clone()),
            MultipartValue::File {
                filename,
                bytes,
                content_type,
            } => {
                let mut part =
                    reqwest::multipart::Part::bytes(bytes.clone()).file_name(filename.clone());
                if let Some(ct) = content_type {
                    part = part.mime_str(ct).map_err(|e| {
                        HttpToolsError::InvalidRequest(format!(
                            "invalid content type '{ct}' for multipart field '{}': {e}",
                            field.name
                        ))
                    })?;
                }
                form.part(field.name.clone(), part)
            }
        };
    }
    Ok(form)
}

/// Percent-encode a query key or value.
///
/// Keeps RFC 3986 unreserved characters. With `allow_reserved`, reserved characters are kept too,
/// except `&`, `=` and `#`, which would corrupt the pair list.
#[must_use]
pub fn encode_query_component(s: &str, allow_reserved: bool) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        let keep = is_unreserved(b) || (allow_reserved && is_reserved_but_safe_in_pairs(b));
        if keep {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

/// Percent-encode everything outside the RFC 6265 `cookie-octet` set (and `%` itself), so a
/// value can never end the cookie or start another one.
#[must_use]
pub fn encode_cookie_value(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        let keep = matches!(b, 0x21 | 0x23..=0x2B | 0x2D..=0x3A | 0x3C..=0x5B | 0x5D..=0x7E)
            && b != b'%';
        if keep {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

/// RFC 7230 `tchar`.
fn is_cookie_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Percent-encode one path segment value.
#[must_use]
pub fn encode_path_segment(s: &str) -> String {
    encode_query_component(s, false)
}

fn is_unreserved(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~')
}

fn is_reserved_but_safe_in_pairs(b: u8) -> bool {
    matches!(
        b,
        b':' | b'/'
            | b'?'
            | b'['
            | b']'
            | b'@'
            | b'!'
            | b'$'
            | b'\''
            | b'('
            | b')'
            | b'*'
            | b'+'
            | b','
            | b';'
    )
}
