//! HTTP method semantics.
//!
//! One table drives three decisions: MCP `ToolAnnotations`, response cacheability and whether a
//! method is safe to replay.

use reqwest::Method;
use rmcp::model::ToolAnnotations;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MethodTraits {
    read_only: bool,
    destructive: bool,
    /// `None` when the method may or may not be idempotent (PATCH).
    idempotent: Option<bool>,
}

fn traits_for(method: &Method) -> Option<MethodTraits> {
    let t = |read_only, destructive, idempotent| MethodTraits {
        read_only,
        destructive,
        idempotent,
    };
    match *method {
        Method::GET | Method::HEAD | Method::OPTIONS => Some(t(true, false, Some(true))),
        Method::POST => Some(t(false, false, Some(false))),
        Method::PUT | Method::DELETE => Some(t(false, true, Some(true))),
        Method::PATCH => Some(t(false, true, None)),
        _ => None,
    }
}

/// Responses to these methods may be served from the response cache.
#[must_use]
pub fn is_cacheable(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

/// Generate MCP tool annotations for an HTTP-backed tool.
///
/// `openWorldHint` is always `true` (the tool talks to an external system). Extension methods
/// only get `openWorldHint`.
#[must_use]
pub fn annotations_for_method(method: &Method, title: Option<String>) -> ToolAnnotations {
    let traits = traits_for(method);
    ToolAnnotations {
        title,
        read_only_hint: traits.map(|t| t.read_only),
        destructive_hint: traits.map(|t| t.destructive),
        idempotent_hint: traits.and_then(|t| t.idempotent),
        open_world_hint: Some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_is_readonly_idempotent_and_cacheable() {
        let a = annotations_for_method(&Method::GET, None);
        assert_eq!(a.read_only_hint, Some(true));
        assert_eq!(a.destructive_hint, Some(false));
        assert_eq!(a.idempotent_hint, Some(true));
        assert!(is_cacheable(&Method::GET));
        assert!(is_cacheable(&Method::HEAD));
    }

    #[test]
    fn writes_are_not_cacheable() {
        for m in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            assert!(!is_cacheable(&m), "{m} must not be cached");
        }
    }

    #[test]
    fn patch_leaves_idempotence_unknown() {
        let a = annotations_for_method(&Method::PATCH, Some("Patch pet".to_string()));
        assert_eq!(a.title.as_deref(), Some("Patch pet"));
        assert_eq!(a.destructive_hint, Some(true));
        assert_eq!(a.idempotent_hint, None);
    }

    #[test]
    fn extension_method_only_sets_open_world() {
        let custom: Method = "PROPFIND".parse().expect("valid method token");
        let a = annotations_for_method(&custom, None);
        assert_eq!(a.read_only_hint, None);
        assert_eq!(a.destructive_hint, None);
        assert_eq!(a.idempotent_hint, None);
        assert_eq!(a.open_world_hint, Some(true));
    }
}
