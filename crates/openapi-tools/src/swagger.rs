//! Swagger 2.0 -> `OpenAPI` 3.0 conversion.
//!
//! Works on the raw JSON value. The converted document is then validated and resolved like any
//! native 3.0 document.

use crate::error::{OpenApiToolsError, Result};
use serde_json::{Map, Value, json};

pub const TARGET_OPENAPI_VERSION: &str = "3.0.3";

const METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch"];

/// JSON-schema keywords that move from a Swagger parameter into its `schema`.
const SCHEMA_KEYWORDS: &[&str] = &[
    "type",
    "format",
    "items",
    "enum",
    "default",
    "maximum",
    "exclusiveMaximum",
    "minimum",
    "exclusiveMinimum",
    "maxLength",
    "minLength",
    "pattern",
    "maxItems",
    "minItems",
    "uniqueItems",
    "multipleOf",
];

fn conversion_error(message: impl Into<String>) -> OpenApiToolsError {
    OpenApiToolsError::SpecConversion(message.into())
}

/// Convert a Swagger 2.0 document to `OpenAPI` 3.0.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::SpecConversion`] when the document is structurally unusable.
pub fn convert(doc: &Value) -> Result<Value> {
    let root = doc
        .as_object()
        .ok_or_else(|| conversion_error("document root must be a mapping"))?;

    match root.get("swagger") {
        Some(Value::String(v)) if v == "2.0" => {}
        Some(other) => {
            return Err(conversion_error(format!(
                "unsupported swagger version {other} (only 2.0 is supported)"
            )));
        }
        None => return Err(conversion_error("missing 'swagger' version field")),
    }

    let paths = root
        .get("paths")
        .ok_or_else(|| conversion_error("missing 'paths'"))?
        .as_object()
        .ok_or_else(|| conversion_error("'paths' must be a mapping"))?;

    let ctx = Context {
        consumes: string_list(root.get("consumes")),
        produces: string_list(root.get("produces")),
        shared_params: root
            .get("parameters")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    };

    let mut out = Map::new();
    out.insert("openapi".to_string(), json!(TARGET_OPENAPI_VERSION));
    out.insert(
        "info".to_string(),
        root.get("info").cloned().unwrap_or_else(|| json!({})),
    );

    let servers = convert_servers(root)?;
    if !servers.is_empty() {
        out.insert("servers".to_string(), Value::Array(servers));
    }

    for key in ["tags", "security", "externalDocs"] {
        if let Some(v) = root.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }

    let mut converted_paths = Map::new();
    for (path, item) in paths {
        converted_paths.insert(path.clone(), convert_path_item(&ctx, path, item)?);
    }
    out.insert("paths".to_string(), Value::Object(converted_paths));

    let components = convert_components(&ctx, root)?;
    if !components.is_empty() {
        out.insert("components".to_string(), Value::Object(components));
    }

    // Vendor extensions at the root carry over untouched.
    for (k, v) in root {
        if k.starts_with("x-") {
            out.insert(k.clone(), v.clone());
        }
    }

    let mut converted = Value::Object(out);
    rewrite_refs_and_files(&mut converted);
    Ok(converted)
}

struct Context {
    consumes: Vec<String>,
    produces: Vec<String>,
    shared_params: Map<String, Value>,
}

fn string_list(v: Option<&Value>) -> Vec<String> {
    v.and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn convert_servers(root: &Map<String, Value>) -> Result<Vec<Value>> {
    let base_path = root.get("basePath").and_then(Value::as_str).unwrap_or("");
    let base_path = if base_path == "/" { "" } else { base_path };

    let host = match root.get("host") {
        None => None,
        Some(Value::String(h)) => Some(h.trim_end_matches('/')),
        Some(_) => return Err(conversion_error("'host' must be a string")),
    };

    let Some(host) = host else {
        return Ok(if base_path.is_empty() {
            Vec::new()
        } else {
            vec![json!({ "url": base_path })]
        });
    };

    let mut schemes = string_list(root.get("schemes"));
    if schemes.is_empty() {
        schemes.push("https".to_string());
    }
    Ok(schemes
        .iter()
        .map(|scheme| json!({ "url": format!("{scheme}://{host}{base_path}") }))
        .collect())
}

fn convert_components(ctx: &Context, root: &Map<String, Value>) -> Result<Map<String, Value>> {
    let mut components = Map::new();

    if let Some(defs) = root.get("definitions").and_then(Value::as_object) {
        components.insert("schemas".to_string(), Value::Object(defs.clone()));
    }

    // Body and formData parameters have no 3.0 equivalent; they are inlined where referenced.
    let mut params = Map::new();
    for (name, p) in &ctx.shared_params {
        if matches!(param_in(p), Some("body" | "formData")) {
            continue;
        }
        params.insert(name.clone(), convert_parameter(p)?);
    }
    if !params.is_empty() {
        components.insert("parameters".to_string(), Value::Object(params));
    }

    if let Some(responses) = root.get("responses").and_then(Value::as_object) {
        let mut out = Map::new();
        for (name, r) in responses {
            out.insert(name.clone(), convert_response(r, &ctx.produces));
        }
        components.insert("responses".to_string(), Value::Object(out));
    }

    if let Some(defs) = root.get("securityDefinitions").and_then(Value::as_object) {
        let mut out = Map::new();
        for (name, s) in defs {
            out.insert(name.clone(), convert_security_scheme(s));
        }
        components.insert("securitySchemes".to_string(), Value::Object(out));
    }

    Ok(components)
}

fn param_in(p: &Value) -> Option<&str> {
    p.get("in").and_then(Value::as_str)
}

/// Resolve `#/parameters/<name>` against the document's shared parameters.
fn lookup_shared_param<'a>(ctx: &'a Context, reference: &str) -> Option<&'a Value> {
    reference
        .strip_prefix("#/parameters/")
        .and_then(|name| ctx.shared_params.get(name))
}

fn convert_path_item(ctx: &Context, path: &str, item: &Value) -> Result<Value> {
    let item = item
        .as_object()
        .ok_or_else(|| conversion_error(format!("path item '{path}' must be a mapping")))?;

    if let Some(Value::String(r)) = item.get("$ref") {
        return Ok(json!({ "$ref": r }));
    }

    let shared: Vec<Value> = item
        .get("parameters")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut out = Map::new();

    // Path-level parameters that stay parameters in 3.0; body/formData ones move into each
    // operation's requestBody instead.
    let mut path_level = Vec::new();
    for p in &shared {
        let effective = effective_param(ctx, p);
        if matches!(param_in(effective), Some("body" | "formData")) {
            continue;
        }
        path_level.push(convert_param_or_ref(ctx, p, path)?);
    }
    if !path_level.is_empty() {
        out.insert("parameters".to_string(), Value::Array(path_level));
    }

    for (key, value) in item {
        if METHODS.contains(&key.as_str()) {
            out.insert(
                key.clone(),
                convert_operation(ctx, path, key, value, &shared)?,
            );
        } else if matches!(key.as_str(), "summary" | "description") || key.starts_with("x-") {
            out.insert(key.clone(), value.clone());
        }
    }

    Ok(Value::Object(out))
}

/// The parameter object itself, following a `#/parameters/` reference if there is one.
fn effective_param<'a>(ctx: &'a Context, p: &'a Value) -> &'a Value {
    match p.get("$ref").and_then(Value::as_str) {
        Some(r) => lookup_shared_param(ctx, r).unwrap_or(p),
        None => p,
    }
}

fn convert_param_or_ref(ctx: &Context, p: &Value, path: &str) -> Result<Value> {
    if let Some(r) = p.get("$ref").and_then(Value::as_str) {
        // Non-body shared parameters live on under components; keep the reference.
        if lookup_shared_param(ctx, r).is_some() || !r.starts_with("#/") {
            return Ok(json!({ "$ref": r }));
        }
        return Err(conversion_error(format!(
            "unresolved parameter reference '{r}' in '{path}'"
        )));
    }
    convert_parameter(p)
}

fn convert_operation(
    ctx: &Context,
    path: &str,
    method: &str,
    op: &Value,
    path_params: &[Value],
) -> Result<Value> {
    let op_obj = op.as_object().ok_or_else(|| {
        conversion_error(format!("operation {} {path} must be a mapping", method.to_uppercase()))
    })?;
    let op_label = format!("{} {path}", method.to_uppercase());

    let consumes = match op_obj.get("consumes") {
        Some(v) => string_list(Some(v)),
        None => ctx.consumes.clone(),
    };
    let produces = match op_obj.get("produces") {
        Some(v) => string_list(Some(v)),
        None => ctx.produces.clone(),
    };

    let op_params: Vec<Value> = op_obj
        .get("parameters")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    // Operation parameters override path-level ones with the same (in, name).
    let mut body_param: Option<Value> = None;
    let mut body_count = 0usize;
    let mut form_params: Vec<(String, Value)> = Vec::new();
    let mut params_out: Vec<Value> = Vec::new();

    let key_of = |p: &Value| -> Option<(String, String)> {
        let p = effective_param(ctx, p);
        Some((
            param_in(p)?.to_string(),
            p.get("name").and_then(Value::as_str)?.to_string(),
        ))
    };
    let overridden = |p: &Value| {
        key_of(p).is_some_and(|k| op_params.iter().any(|o| key_of(o).as_ref() == Some(&k)))
    };

    let merged = path_params
        .iter()
        .filter(|p| !overridden(*p))
        .chain(op_params.iter());

    for raw in merged {
        let p = effective_param(ctx, raw);
        let is_path_level = path_params.iter().any(|pp| std::ptr::eq(pp, raw));

        match param_in(p) {
            Some("body") => {
                body_count += 1;
                body_param = Some(p.clone());
            }
            Some("formData") => {
                let name = p
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| conversion_error(format!("formData parameter without 'name' in {op_label}")))?;
                form_params.push((name.to_string(), p.clone()));
            }
            // Path-level regular parameters were already emitted on the path item.
            Some(_) if is_path_level => {}
            Some(_) => params_out.push(convert_param_or_ref(ctx, raw, path)?),
            None => {
                return Err(conversion_error(format!(
                    "parameter without 'in' in {op_label}"
                )));
            }
        }
    }

    if body_count > 1 {
        return Err(conversion_error(format!(
            "{op_label} declares more than one body parameter"
        )));
    }
    if body_param.is_some() && !form_params.is_empty() {
        return Err(conversion_error(format!(
            "{op_label} mixes body and formData parameters"
        )));
    }

    let mut out = Map::new();
    for key in [
        "tags",
        "summary",
        "description",
        "externalDocs",
        "operationId",
        "deprecated",
        "security",
    ] {
        if let Some(v) = op_obj.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    for (k, v) in op_obj {
        if k.starts_with("x-") {
            out.insert(k.clone(), v.clone());
        }
    }

    if !params_out.is_empty() {
        out.insert("parameters".to_string(), Value::Array(params_out));
    }

    if let Some(body) = body_param {
        out.insert(
            "requestBody".to_string(),
            convert_body_param(&body, &consumes, &op_label)?,
        );
    } else if !form_params.is_empty() {
        out.insert(
            "requestBody".to_string(),
            convert_form_params(&form_params, &consumes),
        );
    }

    let mut responses = Map::new();
    if let Some(rs) = op_obj.get("responses").and_then(Value::as_object) {
        for (code, r) in rs {
            responses.insert(code.clone(), convert_response(r, &produces));
        }
    }
    if responses.is_empty() {
        responses.insert("default".to_string(), json!({ "description": "" }));
    }
    out.insert("responses".to_string(), Value::Object(responses));

    Ok(Value::Object(out))
}

fn media_types_with_json(extra: &[String]) -> Vec<String> {
    let mut types = vec!["application/json".to_string()];
    for t in extra {
        if !types.iter().any(|x| x.eq_ignore_ascii_case(t)) {
            types.push(t.clone());
        }
    }
    types
}

fn convert_body_param(p: &Value, consumes: &[String], op_label: &str) -> Result<Value> {
    let schema = p
        .get("schema")
        .ok_or_else(|| conversion_error(format!("body parameter without 'schema' in {op_label}")))?;

    let mut content = Map::new();
    for mt in media_types_with_json(consumes) {
        content.insert(mt, json!({ "schema": schema }));
    }

    let mut body = Map::new();
    if let Some(d) = p.get("description") {
        body.insert("description".to_string(), d.clone());
    }
    body.insert("content".to_string(), Value::Object(content));
    body.insert(
        "required".to_string(),
        json!(p.get("required").and_then(Value::as_bool).unwrap_or(false)),
    );
    Ok(Value::Object(body))
}

fn convert_form_params(params: &[(String, Value)], consumes: &[String]) -> Value {
    let mut properties = Map::new();
    let mut required: Vec<Value> = Vec::new();
    let mut has_file = false;

    for (name, p) in params {
        if p.get("type").and_then(Value::as_str) == Some("file") {
            has_file = true;
        }
        let mut schema = schema_from_param(p);
        if let Some(d) = p.get("description") {
            schema.insert("description".to_string(), d.clone());
        }
        properties.insert(name.clone(), Value::Object(schema));
        if p.get("required").and_then(Value::as_bool).unwrap_or(false) {
            required.push(json!(name));
        }
    }

    let media_type = if has_file
        || consumes
            .iter()
            .any(|c| c.eq_ignore_ascii_case("multipart/form-data"))
    {
        "multipart/form-data"
    } else {
        "application/x-www-form-urlencoded"
    };

    let mut schema = Map::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    let any_required = !required.is_empty();
    if any_required {
        schema.insert("required".to_string(), Value::Array(required));
    }

    json!({
        "content": { media_type: { "schema": schema } },
        "required": any_required,
    })
}

fn schema_from_param(p: &Value) -> Map<String, Value> {
    let mut schema = Map::new();
    for key in SCHEMA_KEYWORDS {
        if let Some(v) = p.get(*key) {
            schema.insert((*key).to_string(), v.clone());
        }
    }
    if let Some(items) = schema.get_mut("items") {
        strip_collection_format(items);
    }
    schema
}

fn strip_collection_format(items: &mut Value) {
    if let Some(obj) = items.as_object_mut() {
        obj.remove("collectionFormat");
        if let Some(inner) = obj.get_mut("items") {
            strip_collection_format(inner);
        }
    }
}

/// Convert a non-body parameter.
fn convert_parameter(p: &Value) -> Result<Value> {
    let obj = p
        .as_object()
        .ok_or_else(|| conversion_error("parameter must be a mapping"))?;
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| conversion_error("parameter without 'name'"))?;
    let location = obj
        .get("in")
        .and_then(Value::as_str)
        .ok_or_else(|| conversion_error(format!("parameter '{name}' without 'in'")))?;

    let mut out = Map::new();
    out.insert("name".to_string(), json!(name));
    out.insert("in".to_string(), json!(location));
    for key in ["description", "deprecated"] {
        if let Some(v) = obj.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    let required = location == "path" || obj.get("required").and_then(Value::as_bool) == Some(true);
    if required {
        out.insert("required".to_string(), json!(true));
    }
    if location == "query"
        && let Some(v) = obj.get("allowEmptyValue")
    {
        out.insert("allowEmptyValue".to_string(), v.clone());
    }

    let is_array = obj.get("type").and_then(Value::as_str) == Some("array");
    if is_array && location == "query" {
        let (style, explode) = match obj.get("collectionFormat").and_then(Value::as_str) {
            Some("multi") => ("form", true),
            Some("ssv") => ("spaceDelimited", false),
            Some("pipes") => ("pipeDelimited", false),
            Some("tsv") => {
                tracing::warn!(param = name, "collectionFormat 'tsv' has no OpenAPI 3 equivalent; using csv");
                ("form", false)
            }
            _ => ("form", false),
        };
        out.insert("style".to_string(), json!(style));
        out.insert("explode".to_string(), json!(explode));
    } else if is_array && obj.get("collectionFormat").and_then(Value::as_str) == Some("multi") {
        out.insert("explode".to_string(), json!(true));
    }

    out.insert("schema".to_string(), Value::Object(schema_from_param(p)));

    for (k, v) in obj {
        if k.starts_with("x-") {
            out.insert(k.clone(), v.clone());
        }
    }
    Ok(Value::Object(out))
}

fn convert_response(r: &Value, produces: &[String]) -> Value {
    let Some(obj) = r.as_object() else {
        return json!({ "description": "" });
    };
    if let Some(Value::String(reference)) = obj.get("$ref") {
        return json!({ "$ref": reference });
    }

    let mut out = Map::new();
    out.insert(
        "description".to_string(),
        obj.get("description").cloned().unwrap_or_else(|| json!("")),
    );

    if let Some(schema) = obj.get("schema") {
        let mut content = Map::new();
        for mt in media_types_with_json(produces) {
            content.insert(mt, json!({ "schema": schema }));
        }
        out.insert("content".to_string(), Value::Object(content));
    }

    if let Some(headers) = obj.get("headers").and_then(Value::as_object) {
        let mut out_headers = Map::new();
        for (name, h) in headers {
            let mut header = Map::new();
            if let Some(d) = h.get("description") {
                header.insert("description".to_string(), d.clone());
            }
            header.insert("schema".to_string(), Value::Object(schema_from_param(h)));
            out_headers.insert(name.clone(), Value::Object(header));
        }
        out.insert("headers".to_string(), Value::Object(out_headers));
    }

    Value::Object(out)
}

fn convert_security_scheme(s: &Value) -> Value {
    let Some(obj) = s.as_object() else {
        return s.clone();
    };
    let description = obj.get("description").cloned();
    let mut out = match obj.get("type").and_then(Value::as_str) {
        Some("basic") => json!({ "type": "http", "scheme": "basic" }),
        Some("apiKey") => {
            let name = obj.get("name").and_then(Value::as_str).unwrap_or("");
            let location = obj.get("in").and_then(Value::as_str).unwrap_or("header");
            // A bearer token smuggled through an `Authorization` header api key.
            let bearer_ish = location == "header"
                && name.eq_ignore_ascii_case("authorization")
                && description
                    .as_ref()
                    .and_then(Value::as_str)
                    .is_some_and(|d| d.to_ascii_lowercase().contains("bearer"));
            if bearer_ish {
                json!({ "type": "http", "scheme": "bearer" })
            } else {
                json!({ "type": "apiKey", "name": name, "in": location })
            }
        }
        Some("oauth2") => {
            let flow_name = match obj.get("flow").and_then(Value::as_str) {
                Some("implicit") => "implicit",
                Some("password") => "password",
                Some("application") => "clientCredentials",
                Some("accessCode") => "authorizationCode",
                _ => "implicit",
            };
            let mut flow = Map::new();
            for (from, to) in [
                ("authorizationUrl", "authorizationUrl"),
                ("tokenUrl", "tokenUrl"),
            ] {
                if let Some(v) = obj.get(from) {
                    flow.insert(to.to_string(), v.clone());
                }
            }
            flow.insert(
                "scopes".to_string(),
                obj.get("scopes").cloned().unwrap_or_else(|| json!({})),
            );
            json!({ "type": "oauth2", "flows": { flow_name: flow } })
        }
        _ => s.clone(),
    };
    if let (Some(d), Some(o)) = (description, out.as_object_mut()) {
        o.insert("description".to_string(), d);
    }
    out
}

/// Rewrite Swagger-style `$ref` prefixes and `type: file` schemas everywhere in the document.
fn rewrite_refs_and_files(v: &mut Value) {
    match v {
        Value::Object(map) => {
            if let Some(Value::String(r)) = map.get_mut("$ref") {
                *r = rewrite_ref(r);
            }
            if map.get("type").and_then(Value::as_str) == Some("file") {
                map.insert("type".to_string(), json!("string"));
                map.insert("format".to_string(), json!("binary"));
            }
            for (_, child) in map.iter_mut() {
                rewrite_refs_and_files(child);
            }
        }
        Value::Array(items) => {
            for child in items {
                rewrite_refs_and_files(child);
            }
        }
        _ => {}
    }
}

fn rewrite_ref(r: &str) -> String {
    for (from, to) in [
        ("#/definitions/", "#/components/schemas/"),
        ("#/parameters/", "#/components/parameters/"),
        ("#/responses/", "#/components/responses/"),
    ] {
        if let Some(idx) = r.find(from) {
            return format!("{}{}{}", &r[..idx], to, &r[idx + from.len()..]);
        }
    }
    r.to_string()
}
