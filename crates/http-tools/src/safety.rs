//! Redaction and response limits for outbound HTTP.
//!
//! Errors produced while talking to an upstream API end up in tool results and logs, so anything
//! that might carry a credential (URL userinfo, query strings, echoed secrets in error bodies) is
//! scrubbed here before it leaves the crate.

use crate::error::{HttpToolsError, Result};
use url::Url;

const REDACTED: &str = "[REDACTED]";

#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    // Best-effort: drop credentials + query + fragment.
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    msg
}

/// Replace every occurrence of the given secret values in `text`.
///
/// Secrets shorter than four characters are ignored; replacing them would mangle ordinary text.
#[must_use]
pub fn redact_secrets<S: AsRef<str>>(text: &str, secrets: &[S]) -> String {
    let mut out = text.to_string();
    for secret in secrets {
        let secret = secret.as_ref();
        if secret.len() >= 4 {
            out = out.replace(secret, REDACTED);
        }
    }
    out
}

/// Read a response body, failing once it exceeds `max_bytes` (if set).
///
/// # Errors
///
/// Returns an error if the transport fails mid-body or the body exceeds the limit.
pub async fn read_body_limited(
    mut response: reqwest::Response,
    max_bytes: Option<usize>,
) -> Result<Vec<u8>> {
    let Some(max) = max_bytes else {
        let bytes = response.bytes().await?;
        return Ok(bytes.to_vec());
    };

    if let Some(len) = response.content_length()
        && len > max as u64
    {
        return Err(HttpToolsError::ResponseTooLarge(format!(
            "{len} bytes (limit {max})"
        )));
    }

    let mut out: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if out.len().saturating_add(chunk.len()) > max {
            return Err(HttpToolsError::ResponseTooLarge(format!(
                "exceeded {max} bytes"
            )));
        }
        out.extend_from_slice(&chunk);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_url_drops_userinfo_and_query() {
        let url = Url::parse("https://user:pw@api.example.com/v1/items?api_key=abc#frag")
            .expect("url");
        assert_eq!(redact_url(&url), "https://api.example.com/v1/items");
    }

    #[test]
    fn redact_secrets_replaces_all_occurrences() {
        let text = "invalid key sk-12345 (sk-12345)";
        assert_eq!(
            redact_secrets(text, &["sk-12345"]),
            "invalid key [REDACTED] ([REDACTED])"
        );
    }

    #[test]
    fn redact_secrets_ignores_tiny_values() {
        assert_eq!(redact_secrets("a b c", &["a"]), "a b c");
    }
}
