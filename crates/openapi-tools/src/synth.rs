//! Tool synthesis: one MCP tool per normalized operation.

use crate::descriptor::{
    BodyEncoding, NormalizedSpec, OperationDescriptor, ParamLocation, ParameterDescriptor,
    QuerySerialization,
};
use crate::naming::{NameRegistry, base_name};
use openapi_mcp_http::auth::{
    AUTHORIZATION, AuthProvider, CredentialLocation, CredentialSlot, DynamicAuth,
};
use openapi_mcp_http::semantics::annotations_for_method;
use openapiv3::{APIKeyLocation, SecurityRequirement, SecurityScheme};
use rmcp::model::{JsonObject, Tool, ToolAnnotations};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SynthOptions {
    /// Request bodies whose required top-level field count is at most this are flattened.
    pub flatten_threshold: usize,
    /// Credential slot filled by the configured auth provider; hidden from every tool.
    pub static_slot: Option<CredentialSlot>,
    pub dynamic_auth: DynamicAuth,
    /// Names taken by built-in tools; operations deriving one of these get a suffix instead.
    pub reserved_names: Vec<String>,
}

impl SynthOptions {
    #[must_use]
    pub fn for_provider(auth: &AuthProvider, flatten_threshold: usize) -> Self {
        Self {
            flatten_threshold,
            static_slot: auth.static_slot(),
            dynamic_auth: auth.dynamic_auth(),
            reserved_names: Vec::new(),
        }
    }
}

/// How a per-call credential argument is turned into a header/query/cookie value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFormat {
    Verbatim,
    /// A bare token gets the `Bearer ` prefix.
    Bearer,
}

/// Where a tool argument ends up in the outbound request.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgTarget {
    Path(String),
    Query {
        name: String,
        serialization: QuerySerialization,
    },
    Header(String),
    Cookie(String),
    /// One top-level property of a flattened body.
    BodyField { name: String, binary: bool },
    /// The whole request body.
    Body,
    Credential {
        slot: CredentialSlot,
        format: CredentialFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArgBinding {
    pub arg: String,
    pub target: ArgTarget,
    pub required: bool,
}

/// A synthesized tool. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: JsonObject,
    pub output_schema: Option<Arc<JsonObject>>,
    pub bindings: Vec<ArgBinding>,
    pub operation: Arc<OperationDescriptor>,
    pub annotations: ToolAnnotations,
}

impl ToolDescriptor {
    #[must_use]
    pub fn to_mcp_tool(&self) -> Tool {
        let mut tool = Tool::new(
            self.name.clone(),
            self.description.clone(),
            Arc::new(self.input_schema.clone()),
        );
        tool.output_schema.clone_from(&self.output_schema);
        tool.annotations = Some(self.annotations.clone());
        tool
    }

    #[must_use]
    pub fn binding(&self, arg: &str) -> Option<&ArgBinding> {
        self.bindings.iter().find(|b| b.arg == arg)
    }

    pub fn required_args(&self) -> impl Iterator<Item = &str> {
        self.bindings
            .iter()
            .filter(|b| b.required)
            .map(|b| b.arg.as_str())
    }
}

/// Synthesize one tool per operation, in spec order.
#[must_use]
pub fn synthesize(spec: &NormalizedSpec, options: &SynthOptions) -> Vec<ToolDescriptor> {
    let mut names = NameRegistry::new();
    for name in &options.reserved_names {
        names.block(name);
    }
    spec.operations
        .iter()
        .map(|op| {
            let name = names.reserve(&base_name(op), op.method.as_str());
            build_tool(spec, options, name, op)
        })
        .collect()
}

fn build_tool(
    spec: &NormalizedSpec,
    options: &SynthOptions,
    name: String,
    op: &OperationDescriptor,
) -> ToolDescriptor {
    let mut args = ArgSet::default();

    for param in &op.parameters {
        if is_static_credential(options, param) {
            continue;
        }
        let arg = args.unique_name(&param.name, || {
            format!("{}_{}", param.name, param.location.as_str())
        });
        let target = match param.location {
            ParamLocation::Path => ArgTarget::Path(param.name.clone()),
            ParamLocation::Query => ArgTarget::Query {
                name: param.name.clone(),
                serialization: param.query.clone().unwrap_or_default(),
            },
            ParamLocation::Header => ArgTarget::Header(param.name.clone()),
            ParamLocation::Cookie => ArgTarget::Cookie(param.name.clone()),
        };
        args.push(arg, target, param.required, param_schema(param));
    }

    add_body_args(&mut args, options, op);
    add_credential_args(&mut args, spec, options, op);

    let output_schema = op
        .response_schema
        .as_ref()
        .filter(|s| s.is_object())
        .map(wrap_body_output_schema);

    ToolDescriptor {
        description: describe(spec, options, op, &args),
        input_schema: args.input_schema(),
        output_schema,
        bindings: args.bindings,
        annotations: annotations_for_method(&op.method, op.summary.clone()),
        operation: Arc::new(op.clone()),
        name,
    }
}

fn is_static_credential(options: &SynthOptions, param: &ParameterDescriptor) -> bool {
    match (&options.static_slot, param.location.credential_location()) {
        (Some(slot), Some(location)) => slot.matches(location, &param.name),
        _ => false,
    }
}

fn param_schema(param: &ParameterDescriptor) -> Value {
    let mut schema = param.schema.clone();
    if let (Some(obj), Some(desc)) = (schema.as_object_mut(), &param.description)
        && !obj.contains_key("description")
    {
        obj.insert("description".to_string(), Value::String(desc.clone()));
    }
    schema
}

fn add_body_args(args: &mut ArgSet, options: &SynthOptions, op: &OperationDescriptor) {
    let Some(body) = &op.request_body else {
        return;
    };

    let flattenable = body.encoding != BodyEncoding::Raw
        && body.properties().is_some_and(|p| !p.is_empty())
        && body.required_fields().len() <= options.flatten_threshold;

    if flattenable && let Some(properties) = body.properties() {
        let required_fields = body.required_fields();
        for (field, schema) in properties {
            let binary = body.binary_fields.iter().any(|b| b == field);
            let arg = args.unique_name(field, || format!("body_{field}"));
            let schema = if binary {
                binary_arg_schema(schema)
            } else {
                schema.clone()
            };
            args.push(
                arg,
                ArgTarget::BodyField {
                    name: field.clone(),
                    binary,
                },
                body.required && required_fields.contains(&field.as_str()),
                schema,
            );
        }
        return;
    }

    let mut schema = if body.encoding == BodyEncoding::Raw {
        json!({ "type": "string" })
    } else {
        body.schema.clone()
    };
    if let Some(properties) = schema.get_mut("properties").and_then(Value::as_object_mut) {
        for field in &body.binary_fields {
            if let Some(prop) = properties.get_mut(field) {
                *prop = binary_arg_schema(prop);
            }
        }
    }
    if let (Some(obj), Some(desc)) = (schema.as_object_mut(), &body.description)
        && !obj.contains_key("description")
    {
        obj.insert("description".to_string(), Value::String(desc.clone()));
    }
    let arg = args.unique_name("body", || "body_body".to_string());
    args.push(arg, ArgTarget::Body, body.required, schema);
}

/// File content travels as base64 inside the JSON arguments.
fn binary_arg_schema(schema: &Value) -> Value {
    let mut out = json!({ "type": "string", "contentEncoding": "base64" });
    let desc = schema
        .get("description")
        .and_then(Value::as_str)
        .map_or_else(
            || "Base64-encoded file content".to_string(),
            |d| format!("{d} (base64-encoded file content)"),
        );
    out["description"] = Value::String(desc);
    out
}

fn add_credential_args(
    args: &mut ArgSet,
    spec: &NormalizedSpec,
    options: &SynthOptions,
    op: &OperationDescriptor,
) {
    let authorization = || CredentialSlot::new(CredentialLocation::Header, AUTHORIZATION);

    match options.dynamic_auth {
        DynamicAuth::Disabled => {}
        DynamicAuth::AuthorizationOverride => {
            args.push_credential(
                authorization(),
                CredentialFormat::Bearer,
                "Bearer token for this call (overrides the default, if any)".to_string(),
            );
        }
        DynamicAuth::FromSecuritySchemes => {
            for scheme_name in op.security_scheme_names() {
                let Some(scheme) = spec.security_schemes.get(scheme_name) else {
                    tracing::warn!(
                        operation = %op.key,
                        scheme = scheme_name,
                        "security requirement references an unknown scheme"
                    );
                    continue;
                };
                let (slot, format, hint) = match scheme {
                    SecurityScheme::HTTP { scheme, .. } if scheme.eq_ignore_ascii_case("basic") => (
                        authorization(),
                        CredentialFormat::Verbatim,
                        "Authorization header value, e.g. 'Basic <base64 credentials>'".to_string(),
                    ),
                    SecurityScheme::HTTP { .. }
                    | SecurityScheme::OAuth2 { .. }
                    | SecurityScheme::OpenIDConnect { .. } => (
                        authorization(),
                        CredentialFormat::Bearer,
                        "Bearer token (the 'Bearer ' prefix is added when missing)".to_string(),
                    ),
                    SecurityScheme::APIKey { location, name, .. } => {
                        let location = match location {
                            APIKeyLocation::Query => CredentialLocation::Query,
                            APIKeyLocation::Header => CredentialLocation::Header,
                            APIKeyLocation::Cookie => CredentialLocation::Cookie,
                        };
                        (
                            CredentialSlot::new(location, name.clone()),
                            CredentialFormat::Verbatim,
                            format!("API key sent as {location} '{name}'"),
                        )
                    }
                };
                args.push_credential(slot, format, hint);
            }
        }
    }
}

/// Accumulates argument bindings and their schemas while keeping names unique.
#[derive(Debug, Default)]
struct ArgSet {
    bindings: Vec<ArgBinding>,
    properties: JsonObject,
}

impl ArgSet {
    fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// `preferred` if free, else the fallback (numbered further if that is taken too).
    fn unique_name(&self, preferred: &str, fallback: impl FnOnce() -> String) -> String {
        if !self.contains(preferred) {
            return preferred.to_string();
        }
        let fallback = fallback();
        if !self.contains(&fallback) {
            return fallback;
        }
        (2..)
            .map(|n| format!("{fallback}_{n}"))
            .find(|n| !self.contains(n))
            .unwrap_or(fallback)
    }

    fn push(&mut self, arg: String, target: ArgTarget, required: bool, schema: Value) {
        self.properties.insert(arg.clone(), schema);
        self.bindings.push(ArgBinding {
            arg,
            target,
            required,
        });
    }

    /// Optional credential argument named after its slot; skipped when that name is taken.
    fn push_credential(&mut self, slot: CredentialSlot, format: CredentialFormat, hint: String) {
        if self.contains(&slot.name) {
            return;
        }
        let arg = slot.name.clone();
        self.push(
            arg,
            ArgTarget::Credential { slot, format },
            false,
            json!({ "type": "string", "description": hint }),
        );
    }

    fn input_schema(&self) -> JsonObject {
        let required: Vec<Value> = self
            .bindings
            .iter()
            .filter(|b| b.required)
            .map(|b| Value::String(b.arg.clone()))
            .collect();

        let mut schema = JsonObject::new();
        schema.insert("type".to_string(), json!("object"));
        schema.insert(
            "properties".to_string(),
            Value::Object(self.properties.clone()),
        );
        if !required.is_empty() {
            schema.insert("required".to_string(), Value::Array(required));
        }
        schema
    }
}

/// MCP requires the root output schema to be an object.
fn wrap_body_output_schema(body_schema: &Value) -> Arc<JsonObject> {
    let wrapped = json!({
        "type": "object",
        "required": ["body"],
        "properties": { "body": body_schema },
    });
    Arc::new(wrapped.as_object().cloned().unwrap_or_default())
}

fn describe(
    spec: &NormalizedSpec,
    options: &SynthOptions,
    op: &OperationDescriptor,
    args: &ArgSet,
) -> String {
    let mut text = op
        .summary
        .clone()
        .or_else(|| op.description.clone())
        .unwrap_or_else(|| format!("{} {}", op.method, op.path));

    if options.dynamic_auth == DynamicAuth::FromSecuritySchemes {
        let lines = auth_lines(&spec.security_schemes, &op.security);
        if !lines.is_empty() {
            text.push_str("\n\n**Authentication Required:**");
            for line in lines {
                text.push_str("\n- ");
                text.push_str(&line);
            }
        }
    }

    let headers: Vec<String> = args
        .bindings
        .iter()
        .filter_map(|b| match &b.target {
            ArgTarget::Header(name) => {
                let param = op
                    .parameters_in(ParamLocation::Header)
                    .find(|p| &p.name == name)?;
                let mut line = format!(
                    "**{}** ({})",
                    b.arg,
                    if b.required { "Required" } else { "Optional" }
                );
                if let Some(t) = param.schema_type() {
                    line.push_str(&format!(" [{t}]"));
                }
                if let Some(d) = &param.description {
                    line.push_str(&format!(": {d}"));
                }
                Some(line)
            }
            _ => None,
        })
        .collect();
    if !headers.is_empty() {
        text.push_str("\n\n**Header Parameters:**");
        for line in headers {
            text.push_str("\n- ");
            text.push_str(&line);
        }
    }

    if op.deprecated {
        text.push_str("\n\nDeprecated.");
    }
    text
}

fn auth_lines(
    schemes: &BTreeMap<String, SecurityScheme>,
    requirements: &[SecurityRequirement],
) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for req in requirements {
        for (name, scopes) in req {
            let Some(scheme) = schemes.get(name) else {
                continue;
            };
            let line = match scheme {
                SecurityScheme::HTTP {
                    scheme,
                    bearer_format,
                    ..
                } if scheme.eq_ignore_ascii_case("bearer") => {
                    let mut l = "Bearer token authentication required. Include 'Authorization: Bearer <token>' header".to_string();
                    if let Some(f) = bearer_format {
                        l.push_str(&format!(" (Format: {f})"));
                    }
                    l
                }
                SecurityScheme::HTTP { scheme, .. } if scheme.eq_ignore_ascii_case("basic") => {
                    "Basic authentication required. Include 'Authorization: Basic <credentials>' header".to_string()
                }
                SecurityScheme::HTTP { scheme, .. } => {
                    format!("HTTP {scheme} authentication required via the 'Authorization' header")
                }
                SecurityScheme::APIKey { location, name, .. } => {
                    let location = match location {
                        APIKeyLocation::Query => "query",
                        APIKeyLocation::Header => "header",
                        APIKeyLocation::Cookie => "cookie",
                    };
                    format!("API Key authentication required. Include '{name}' in {location}")
                }
                SecurityScheme::OAuth2 { .. } if scopes.is_empty() => {
                    "OAuth 2.0 authentication required".to_string()
                }
                SecurityScheme::OAuth2 { .. } => format!(
                    "OAuth 2.0 authentication required with scopes: {}",
                    scopes.join(", ")
                ),
                SecurityScheme::OpenIDConnect { .. } => {
                    "OpenID Connect authentication required".to_string()
                }
            };
            if !lines.contains(&line) {
                lines.push(line);
            }
        }
    }
    lines
}
