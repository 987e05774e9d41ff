//! Structural validation of an `OpenAPI` 3.0 document.
//!
//! Violations are collected rather than reported one at a time, so a broken spec can be fixed in
//! one pass.

use crate::error::{OpenApiToolsError, Result};
use openapiv3::OpenAPI;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

const METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

static PATH_TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}/]+)\}").expect("static regex"));

/// Validate a normalized document and deserialize it into the typed model.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::SpecValidation`] listing every violation found.
pub fn validate(doc: &Value) -> Result<OpenAPI> {
    let violations = violations(doc);
    if !violations.is_empty() {
        return Err(OpenApiToolsError::SpecValidation(violations));
    }

    serde_json::from_value::<OpenAPI>(doc.clone())
        .map_err(|e| OpenApiToolsError::invalid(format!("document does not match OpenAPI 3.0: {e}")))
}

/// Every structural problem in `doc` (empty when it is valid).
#[must_use]
pub fn violations(doc: &Value) -> Vec<String> {
    let mut out = Vec::new();

    let Some(root) = doc.as_object() else {
        return vec!["document root must be a mapping".to_string()];
    };

    match root.get("openapi").and_then(Value::as_str) {
        None => out.push("missing required field 'openapi'".to_string()),
        Some(v) if !v.starts_with("3.") => {
            out.push(format!("unsupported openapi version '{v}' (expected 3.x)"));
        }
        Some(v) if !v.starts_with("3.0") => {
            tracing::warn!(version = v, "OpenAPI {v} is treated as 3.0");
        }
        Some(_) => {}
    }

    match root.get("info") {
        None => out.push("missing required field 'info'".to_string()),
        Some(info) => {
            for field in ["title", "version"] {
                if info.get(field).and_then(Value::as_str).is_none() {
                    out.push(format!("missing required field 'info.{field}'"));
                }
            }
        }
    }

    let Some(paths) = root.get("paths") else {
        out.push("missing required field 'paths'".to_string());
        return out;
    };
    let Some(paths) = paths.as_object() else {
        out.push("'paths' must be a mapping".to_string());
        return out;
    };

    let mut operation_ids: HashMap<&str, String> = HashMap::new();

    for (path, item) in paths {
        if !path.starts_with('/') {
            out.push(format!("path '{path}' must start with '/'"));
        }
        let Some(item) = item.as_object() else {
            out.push(format!("path item '{path}' must be a mapping"));
            continue;
        };
        if item.contains_key("$ref") {
            continue;
        }

        let path_level = item.get("parameters");
        check_parameters(doc, path, "path item", path_level, &mut out);

        for method in METHODS {
            let Some(op) = item.get(*method) else {
                continue;
            };
            let label = format!("{} {path}", method.to_uppercase());
            if !op.is_object() {
                out.push(format!("{label}: operation must be a mapping"));
                continue;
            }

            if let Some(id) = op.get("operationId").and_then(Value::as_str) {
                if let Some(first) = operation_ids.get(id) {
                    out.push(format!(
                        "duplicate operationId '{id}' ({first} and {label})"
                    ));
                } else {
                    operation_ids.insert(id, label.clone());
                }
            }

            check_parameters(doc, path, &label, op.get("parameters"), &mut out);
            check_path_template(doc, path, &label, path_level, op.get("parameters"), &mut out);

            match op.get("responses") {
                Some(Value::Object(_)) => {}
                Some(_) => out.push(format!("{label}: 'responses' must be a mapping")),
                None => out.push(format!("{label}: missing required field 'responses'")),
            }
        }
    }

    check_local_refs(doc, doc, &mut out);
    out
}

fn check_parameters(
    doc: &Value,
    path: &str,
    label: &str,
    params: Option<&Value>,
    out: &mut Vec<String>,
) {
    let Some(params) = params else {
        return;
    };
    let Some(params) = params.as_array() else {
        out.push(format!("{label} ({path}): 'parameters' must be a list"));
        return;
    };
    for p in params {
        let p = follow_local(doc, p);
        if p.get("$ref").is_some() {
            // External; checked when it is resolved.
            continue;
        }
        let name = p.get("name").and_then(Value::as_str);
        if name.is_none() {
            out.push(format!("{label}: parameter without 'name'"));
        }
        match p.get("in").and_then(Value::as_str) {
            Some("path" | "query" | "header" | "cookie") => {}
            Some(other) => out.push(format!(
                "{label}: parameter '{}' has invalid location '{other}'",
                name.unwrap_or("?")
            )),
            None => out.push(format!(
                "{label}: parameter '{}' without 'in'",
                name.unwrap_or("?")
            )),
        }
    }
}

/// Every `{var}` in the path template must be a required path parameter.
fn check_path_template(
    doc: &Value,
    path: &str,
    label: &str,
    path_level: Option<&Value>,
    op_level: Option<&Value>,
    out: &mut Vec<String>,
) {
    let declared: HashSet<&str> = [path_level, op_level]
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
        .flatten()
        .map(|p| follow_local(doc, p))
        .filter(|p| {
            p.get("in").and_then(Value::as_str) == Some("path")
                && p.get("required").and_then(Value::as_bool) == Some(true)
        })
        .filter_map(|p| p.get("name").and_then(Value::as_str))
        .collect();

    // Parameters behind external refs cannot be checked here.
    let has_external = [path_level, op_level]
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
        .flatten()
        .any(|p| follow_local(doc, p).get("$ref").is_some());
    if has_external {
        return;
    }

    for cap in PATH_TEMPLATE.captures_iter(path) {
        let var = &cap[1];
        if !declared.contains(var) {
            out.push(format!(
                "{label}: path variable '{{{var}}}' is not declared as a required path parameter"
            ));
        }
    }
}

/// Follow local `$ref`s (bounded) so inline checks can look at the target.
fn follow_local<'a>(doc: &'a Value, mut v: &'a Value) -> &'a Value {
    for _ in 0..16 {
        let Some(ptr) = v
            .get("$ref")
            .and_then(Value::as_str)
            .and_then(|r| r.strip_prefix('#'))
        else {
            return v;
        };
        match doc.pointer(ptr) {
            Some(target) => v = target,
            None => return v,
        }
    }
    v
}

fn check_local_refs(doc: &Value, v: &Value, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            if let Some(Value::String(r)) = map.get("$ref")
                && let Some(ptr) = r.strip_prefix('#')
                && !ptr.is_empty()
                && doc.pointer(ptr).is_none()
            {
                out.push(format!("unresolved $ref '{r}'"));
            }
            for child in map.values() {
                check_local_refs(doc, child, out);
            }
        }
        Value::Array(items) => {
            for child in items {
                check_local_refs(doc, child, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn accepts_valid_document() {
        let doc = yaml(
            r##"
openapi: 3.0.3
info: { title: t, version: "1" }
components:
  parameters:
    Id: { name: id, in: path, required: true, schema: { type: string } }
paths:
  /items/{id}:
    parameters:
      - $ref: "#/components/parameters/Id"
    get:
      operationId: getItem
      responses: { "200": { description: ok } }
"##,
        );
        let typed = validate(&doc).unwrap();
        assert_eq!(typed.info.title, "t");
    }

    #[test]
    fn collects_all_violations() {
        let doc = yaml(
            r##"
openapi: 3.0.0
info: { title: t }
paths:
  items:
    get:
      operationId: dup
      responses: { "200": { description: ok } }
  /items/{id}:
    get:
      operationId: dup
      parameters:
        - { name: q, in: body }
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema: { $ref: "#/components/schemas/Missing" }
"##,
        );
        let v = violations(&doc);
        let joined = v.join("\n");
        assert!(joined.contains("info.version"), "{joined}");
        assert!(joined.contains("path 'items' must start with '/'"), "{joined}");
        assert!(joined.contains("duplicate operationId 'dup'"), "{joined}");
        assert!(joined.contains("invalid location 'body'"), "{joined}");
        assert!(joined.contains("path variable '{id}'"), "{joined}");
        assert!(joined.contains("#/components/schemas/Missing"), "{joined}");

        let err = validate(&doc).unwrap_err();
        assert!(matches!(err, OpenApiToolsError::SpecValidation(ref list) if list.len() == v.len()));
    }

    #[test]
    fn rejects_unsupported_version() {
        let doc = yaml("{ openapi: 2.0.0, info: { title: t, version: '1' }, paths: {} }");
        assert!(violations(&doc)[0].contains("unsupported openapi version"));
    }
}
