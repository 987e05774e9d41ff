//! The normalized, resolved view of an API that tool synthesis works from.

use openapi_mcp_http::auth::CredentialLocation;
use openapiv3::{QueryStyle, SecurityRequirement, SecurityScheme};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Format of the document the spec was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceFormat {
    OpenApi3,
    Swagger2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParamLocation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Cookie => "cookie",
        }
    }

    /// The credential slot location this parameter location maps to (path has none).
    #[must_use]
    pub fn credential_location(self) -> Option<CredentialLocation> {
        match self {
            Self::Path => None,
            Self::Query => Some(CredentialLocation::Query),
            Self::Header => Some(CredentialLocation::Header),
            Self::Cookie => Some(CredentialLocation::Cookie),
        }
    }
}

/// How a query parameter is serialized (`style`/`explode` et al.).
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySerialization {
    pub style: QueryStyle,
    pub explode: bool,
    pub allow_reserved: bool,
    pub allow_empty_value: bool,
}

impl Default for QuerySerialization {
    fn default() -> Self {
        Self {
            style: QueryStyle::Form,
            explode: true,
            allow_reserved: false,
            allow_empty_value: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    /// JSON Schema with all `$ref`s inlined.
    pub schema: Value,
    pub description: Option<String>,
    /// Set for query parameters only.
    pub query: Option<QuerySerialization>,
}

impl ParameterDescriptor {
    /// The schema's `type`, if it declares a single one.
    #[must_use]
    pub fn schema_type(&self) -> Option<&str> {
        self.schema.get("type").and_then(Value::as_str)
    }
}

/// Wire encoding of a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyEncoding {
    Json,
    Form,
    Multipart,
    /// Anything else, sent verbatim with the declared media type.
    Raw,
}

impl BodyEncoding {
    #[must_use]
    pub fn for_media_type(media_type: &str) -> Self {
        let essence = media_type
            .parse::<mime::Mime>()
            .map(|m| m.essence_str().to_ascii_lowercase())
            .unwrap_or_else(|_| media_type.trim().to_ascii_lowercase());
        if essence == "application/json" || essence.ends_with("+json") {
            Self::Json
        } else if essence == "application/x-www-form-urlencoded" {
            Self::Form
        } else if essence == "multipart/form-data" {
            Self::Multipart
        } else {
            Self::Raw
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestBodyDescriptor {
    pub media_type: String,
    pub encoding: BodyEncoding,
    /// JSON Schema with all `$ref`s inlined.
    pub schema: Value,
    pub required: bool,
    pub description: Option<String>,
    /// Top-level properties carrying file content (`format: binary`).
    pub binary_fields: Vec<String>,
}

impl RequestBodyDescriptor {
    /// Required top-level properties, when the body is an object.
    #[must_use]
    pub fn required_fields(&self) -> Vec<&str> {
        self.schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn properties(&self) -> Option<&serde_json::Map<String, Value>> {
        self.schema.get("properties").and_then(Value::as_object)
    }
}

/// One HTTP operation, with references resolved and path-item parameters merged in.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    /// `operationId`, or `"{METHOD} {path}"` when the operation has none.
    pub key: String,
    pub method: Method,
    pub path: String,
    pub parameters: Vec<ParameterDescriptor>,
    pub request_body: Option<RequestBodyDescriptor>,
    /// Schema of the first JSON 2xx response.
    pub response_schema: Option<Value>,
    pub operation_id: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    /// Operation-level security, falling back to the document's global requirements.
    pub security: Vec<SecurityRequirement>,
    pub deprecated: bool,
}

impl OperationDescriptor {
    #[must_use]
    pub fn operation_key(method: &Method, path: &str, operation_id: Option<&str>) -> String {
        match operation_id {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => format!("{} {path}", method.as_str()),
        }
    }

    pub fn parameters_in(
        &self,
        location: ParamLocation,
    ) -> impl Iterator<Item = &ParameterDescriptor> {
        self.parameters
            .iter()
            .filter(move |p| p.location == location)
    }

    /// Names of every security scheme referenced by the effective requirements.
    #[must_use]
    pub fn security_scheme_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for req in &self.security {
            for name in req.keys() {
                if !names.contains(&name.as_str()) {
                    names.push(name.as_str());
                }
            }
        }
        names
    }
}

/// An API specification normalized to `OpenAPI` 3.0.
#[derive(Debug, Clone)]
pub struct NormalizedSpec {
    pub format: SourceFormat,
    pub title: String,
    pub version: String,
    pub servers: Vec<String>,
    pub security_schemes: BTreeMap<String, SecurityScheme>,
    pub security: Vec<SecurityRequirement>,
    /// In document order.
    pub operations: Vec<OperationDescriptor>,
    /// The `OpenAPI` 3.0 document itself (converted when the source was Swagger 2.0).
    pub document: Value,
}

/// A compact outline of an API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiStructure {
    pub title: String,
    pub version: String,
    pub operations: Vec<OperationSummary>,
    pub schemas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSummary {
    pub key: String,
    pub method: String,
    pub path: String,
    pub summary: Option<String>,
}

const PAGINATION_PARAMS: &[&str] = &[
    "page",
    "limit",
    "offset",
    "size",
    "per_page",
    "pagesize",
    "page_size",
    "next",
    "cursor",
];

impl NormalizedSpec {
    #[must_use]
    pub fn operation(&self, key: &str) -> Option<&OperationDescriptor> {
        self.operations.iter().find(|o| o.key == key)
    }

    #[must_use]
    pub fn schema_names(&self) -> Vec<String> {
        self.document
            .pointer("/components/schemas")
            .and_then(Value::as_object)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn api_structure(&self) -> ApiStructure {
        ApiStructure {
            title: self.title.clone(),
            version: self.version.clone(),
            operations: self
                .operations
                .iter()
                .map(|o| OperationSummary {
                    key: o.key.clone(),
                    method: o.method.as_str().to_string(),
                    path: o.path.clone(),
                    summary: o.summary.clone(),
                })
                .collect(),
            schemas: self.schema_names(),
        }
    }

    /// Operations that look paginated (they accept a page/limit/cursor-style query parameter).
    #[must_use]
    pub fn pagination_operations(&self) -> Vec<&OperationDescriptor> {
        self.operations
            .iter()
            .filter(|o| {
                o.parameters_in(ParamLocation::Query).any(|p| {
                    PAGINATION_PARAMS
                        .iter()
                        .any(|n| n.eq_ignore_ascii_case(&p.name))
                })
            })
            .collect()
    }
}
