//! Tool name derivation.

use crate::descriptor::OperationDescriptor;
use std::collections::HashSet;

pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Derive the base tool name for an operation (before collision handling).
///
/// First usable source wins: summary, first tag plus the last literal path segment, then method
/// plus path. The operation id is never used; generated specs often carry opaque hashes there.
#[must_use]
pub fn base_name(op: &OperationDescriptor) -> String {
    let method = op.method.as_str().to_ascii_lowercase();

    let candidates = [
        op.summary.as_deref().map(slug),
        op.tags
            .first()
            .zip(last_literal_segment(&op.path))
            .map(|(tag, seg)| slug(&format!("{tag}_{seg}"))),
    ];

    let name = candidates
        .into_iter()
        .flatten()
        .find(|n| !n.is_empty())
        .unwrap_or_else(|| method_path_name(&method, &op.path));

    finalize(&name, MAX_TOOL_NAME_LEN)
}

/// `GET /users/{id}/posts` -> `get_users_by_id_posts`.
#[must_use]
pub fn method_path_name(method: &str, path: &str) -> String {
    let mut parts = vec![method.to_ascii_lowercase()];
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        match seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(param) => parts.push(format!("by_{}", snake_case(param))),
            None => parts.push(slug(seg)),
        }
    }
    let name = parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    slug(&name)
}

/// Lower-case, every run of non-alphanumerics collapsed to `_`, edges trimmed.
#[must_use]
pub fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_sep = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// `getUserByID` -> `get_user_by_id`, `list-pets` -> `list_pets`.
#[must_use]
pub fn snake_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(char::is_ascii_lowercase);
            if prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_is_lower)
            {
                out.push('_');
            }
        }
        out.push(c);
    }
    slug(&out)
}

fn last_literal_segment(path: &str) -> Option<&str> {
    path.split('/')
        .filter(|s| !s.is_empty() && !s.starts_with('{'))
        .next_back()
}

/// Restrict to `[a-z0-9_]`, cap the length and make sure the name starts with a letter or `_`.
fn finalize(name: &str, max_len: usize) -> String {
    let mut name = slug(name);
    if name.is_empty() {
        name = "operation".to_string();
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "op_");
    }
    truncate(&name, max_len)
}

fn truncate(name: &str, max_len: usize) -> String {
    // ASCII only at this point, so byte slicing is safe.
    name[..name.len().min(max_len)]
        .trim_end_matches('_')
        .to_string()
}

/// Hands out unique tool names in registration order.
#[derive(Debug, Default)]
pub struct NameRegistry {
    used: HashSet<String>,
}

impl NameRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `base`, or the first free of `base_<method>`, `base_<method>_1`, `base_<method>_2`...
    pub fn reserve(&mut self, base: &str, method: &str) -> String {
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }

        let method = method.to_ascii_lowercase();
        let with_method = with_suffix(base, &method);
        if self.used.insert(with_method.clone()) {
            return with_method;
        }

        let mut n = 1usize;
        loop {
            let candidate = with_suffix(base, &format!("{method}_{n}"));
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Take `name` out of circulation without handing it to an operation.
    pub fn block(&mut self, name: &str) {
        self.used.insert(name.to_string());
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.used.contains(name)
    }
}

/// `base_suffix`, trimming `base` so the whole name stays within the length cap.
fn with_suffix(base: &str, suffix: &str) -> String {
    let room = MAX_TOOL_NAME_LEN.saturating_sub(suffix.len() + 1);
    format!("{}_{suffix}", truncate(base, room))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    fn op(method: Method, path: &str) -> OperationDescriptor {
        OperationDescriptor {
            key: OperationDescriptor::operation_key(&method, path, None),
            method,
            path: path.to_string(),
            parameters: Vec::new(),
            request_body: None,
            response_schema: None,
            operation_id: None,
            summary: None,
            description: None,
            tags: Vec::new(),
            security: Vec::new(),
            deprecated: false,
        }
    }

    #[test]
    fn summary_beats_hash_like_operation_id() {
        let mut o = op(Method::GET, "/tenants/{id}/features");
        o.operation_id = Some("2dedbfd907f6ce906291347459087311".to_string());
        o.summary = Some("Get Tenant Features".to_string());
        assert_eq!(base_name(&o), "get_tenant_features");

        o.summary = None;
        assert_eq!(base_name(&o), "get_tenants_by_id_features");
    }

    #[test]
    fn tag_and_last_segment() {
        let mut o = op(Method::GET, "/v1/pets/{petId}");
        o.tags = vec!["Pet Store".to_string()];
        o.operation_id = Some("showPetById".to_string());
        assert_eq!(base_name(&o), "pet_store_pets");
    }

    #[test]
    fn operation_id_is_never_a_name_source() {
        let mut o = op(Method::GET, "/orders/{id}");
        o.operation_id = Some("getOrder".to_string());
        assert_eq!(base_name(&o), "get_orders_by_id");

        o.operation_id = Some("550e8400-e29b-41d4-a716-446655440000".to_string());
        assert_eq!(base_name(&o), "get_orders_by_id");
    }

    #[test]
    fn snake_cases_path_parameters() {
        assert_eq!(snake_case("listPetsByHTTPStatus"), "list_pets_by_http_status");
        assert_eq!(
            method_path_name("GET", "/pets/{petID}"),
            "get_pets_by_pet_id"
        );
    }

    #[test]
    fn method_path_fallback() {
        let o = op(Method::DELETE, "/users/{user_id}/posts/{postId}");
        assert_eq!(base_name(&o), "delete_users_by_user_id_posts_by_post_id");
        assert_eq!(base_name(&op(Method::GET, "/")), "get");
    }

    #[test]
    fn leading_digit_and_length_cap() {
        let mut o = op(Method::GET, "/x");
        o.summary = Some("3D render".to_string());
        assert_eq!(base_name(&o), "op_3d_render");

        o.summary = Some("word ".repeat(40));
        let name = base_name(&o);
        assert!(name.len() <= MAX_TOOL_NAME_LEN);
        assert!(!name.ends_with('_'));
    }

    #[test]
    fn collisions_get_method_then_counter() {
        let mut reg = NameRegistry::new();
        assert_eq!(reg.reserve("pets", "GET"), "pets");
        assert_eq!(reg.reserve("pets", "GET"), "pets_get");
        assert_eq!(reg.reserve("pets", "GET"), "pets_get_1");
        assert_eq!(reg.reserve("pets", "POST"), "pets_post");
        assert_eq!(reg.reserve("pets", "GET"), "pets_get_2");

        reg.block("health");
        assert!(reg.contains("health"));
        assert_eq!(reg.reserve("health", "GET"), "health_get");
    }

    #[test]
    fn collision_suffix_respects_length_cap() {
        let base = "a".repeat(MAX_TOOL_NAME_LEN);
        let mut reg = NameRegistry::new();
        reg.reserve(&base, "get");
        let second = reg.reserve(&base, "get");
        assert!(second.len() <= MAX_TOOL_NAME_LEN);
        assert!(second.ends_with("_get"));
    }
}
