//! Spec loading and normalization.
//!
//! Raw document (URL or file) -> optional integrity check -> JSON value -> Swagger 2.0 conversion
//! when needed -> validation -> resolved [`NormalizedSpec`].

use crate::config::{ApiConfig, HashPolicy};
use crate::descriptor::{
    BodyEncoding, NormalizedSpec, OperationDescriptor, ParamLocation, ParameterDescriptor,
    QuerySerialization, RequestBodyDescriptor, SourceFormat,
};
use crate::error::{OpenApiToolsError, Result};
use crate::resolver::{DocId, OpenApiResolver};
use crate::swagger;
use crate::validate;
use openapi_mcp_http::safety::sanitize_reqwest_error;
use openapiv3::{
    MediaType, OpenAPI, Operation, Parameter, ParameterSchemaOrContent, PathItem, QueryStyle,
    ReferenceOr, Response, SecurityRequirement, Server, StatusCode,
};
use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Load, verify, convert, validate and resolve the spec named by `config`.
///
/// # Errors
///
/// Returns one of the startup error variants (`SpecUnavailable`, `SpecParse`, `SpecConversion`,
/// `SpecValidation`, `Config`).
pub async fn load_spec(config: &ApiConfig, client: &Client) -> Result<NormalizedSpec> {
    let root = DocId::parse(&config.spec)?;
    let raw = fetch_raw(&root, client).await?;

    if let Some(expected) = &config.spec_hash {
        verify_hash(&config.name, &raw, expected, config.spec_hash_policy)?;
    }

    let value = parse_document(&root.display(), &raw)?;
    normalize_value(root, value, client).await
}

/// Normalize an already-parsed document rooted at `root`.
///
/// # Errors
///
/// Same as [`load_spec`], minus fetching.
pub async fn normalize_value(root: DocId, value: Value, client: &Client) -> Result<NormalizedSpec> {
    let (format, document) = normalize_document(value)?;
    if format == SourceFormat::Swagger2 {
        tracing::info!(spec = %root.display(), "converted Swagger 2.0 document to OpenAPI 3.0");
    }
    let typed = validate::validate(&document)?;

    let resolver = OpenApiResolver::new(root, document.clone(), client);
    let security_schemes = resolve_security_schemes(&resolver, &typed).await?;
    let operations = build_operations(&resolver, &typed).await?;

    tracing::info!(
        title = %typed.info.title,
        version = %typed.info.version,
        operations = operations.len(),
        "loaded API spec"
    );

    Ok(NormalizedSpec {
        format,
        title: typed.info.title.clone(),
        version: typed.info.version.clone(),
        servers: typed.servers.iter().map(server_url).collect(),
        security_schemes,
        security: typed.security.clone().unwrap_or_default(),
        operations,
        document,
    })
}

/// Bring a parsed document to `OpenAPI` 3.0 shape, recording where it came from.
///
/// `OpenAPI` 3 documents pass through untouched, so normalizing an already-normalized document is
/// a no-op.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::SpecConversion`] when a Swagger document cannot be converted.
pub fn normalize_document(mut doc: Value) -> Result<(SourceFormat, Value)> {
    coerce_version_field(&mut doc, "swagger");
    coerce_version_field(&mut doc, "openapi");

    if doc.get("swagger").is_some() {
        Ok((SourceFormat::Swagger2, swagger::convert(&doc)?))
    } else {
        Ok((SourceFormat::OpenApi3, doc))
    }
}

/// Unquoted `swagger: 2.0` / `openapi: 3.0` parse as numbers.
fn coerce_version_field(doc: &mut Value, field: &str) {
    if let Some(slot) = doc.get_mut(field)
        && let Value::Number(n) = slot
    {
        let text = n.to_string();
        let text = if text.contains('.') {
            text
        } else {
            format!("{text}.0")
        };
        *slot = Value::String(text);
    }
}

/// Parse JSON or YAML bytes into a mapping.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::SpecParse`] for malformed content or a non-mapping root.
pub fn parse_document(location: &str, raw: &[u8]) -> Result<Value> {
    let parse_error = |message: String| OpenApiToolsError::SpecParse {
        location: location.to_string(),
        message,
    };

    // JSON is (almost) a subset of YAML; try the strict parser first for better messages.
    let value: Value = match serde_json::from_slice(raw) {
        Ok(v) => v,
        Err(_) => serde_yaml::from_slice(raw).map_err(|e| parse_error(e.to_string()))?,
    };

    if !value.is_object() {
        return Err(parse_error("document root must be a mapping".to_string()));
    }
    Ok(value)
}

async fn fetch_raw(doc: &DocId, client: &Client) -> Result<Vec<u8>> {
    let unavailable = |message: String| OpenApiToolsError::SpecUnavailable {
        location: doc.display(),
        message,
    };

    match doc {
        DocId::Url(url) => {
            tracing::info!(url = %doc.display(), "fetching API spec");
            let resp = client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| unavailable(sanitize_reqwest_error(&e)))?;
            if !resp.status().is_success() {
                return Err(unavailable(format!("HTTP {}", resp.status())));
            }
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| unavailable(sanitize_reqwest_error(&e)))?;
            Ok(bytes.to_vec())
        }
        DocId::File(path) => {
            tracing::info!(path = %path.display(), "loading API spec");
            tokio::fs::read(path)
                .await
                .map_err(|e| unavailable(e.to_string()))
        }
    }
}

fn verify_hash(name: &str, raw: &[u8], expected: &str, policy: HashPolicy) -> Result<()> {
    let actual = format!("sha256:{}", hex::encode(Sha256::digest(raw)));
    if actual.eq_ignore_ascii_case(expected) {
        return Ok(());
    }
    match policy {
        HashPolicy::Fail => Err(OpenApiToolsError::invalid(format!(
            "spec hash mismatch for '{name}': expected {expected}, got {actual}"
        ))),
        HashPolicy::Warn => {
            tracing::warn!(api = name, %expected, %actual, "spec hash mismatch");
            Ok(())
        }
        HashPolicy::Ignore => Ok(()),
    }
}

/// Server URL with `{variables}` replaced by their defaults.
fn server_url(server: &Server) -> String {
    let mut url = server.url.clone();
    if let Some(vars) = &server.variables {
        for (name, var) in vars {
            url = url.replace(&format!("{{{name}}}"), &var.default);
        }
    }
    url
}

async fn resolve_security_schemes(
    resolver: &OpenApiResolver<'_>,
    doc: &OpenAPI,
) -> Result<BTreeMap<String, openapiv3::SecurityScheme>> {
    let mut out = BTreeMap::new();
    let mut problems = Problems::default();
    let Some(components) = &doc.components else {
        return Ok(out);
    };
    for (name, scheme) in &components.security_schemes {
        match resolver
            .resolve_security_scheme(resolver.root_doc(), scheme)
            .await
        {
            Ok((_, s)) => {
                out.insert(name.clone(), s);
            }
            Err(e) => problems.record(format!("security scheme '{name}'"), e)?,
        }
    }
    problems.finish(out)
}

async fn build_operations(
    resolver: &OpenApiResolver<'_>,
    doc: &OpenAPI,
) -> Result<Vec<OperationDescriptor>> {
    let global_security = doc.security.clone().unwrap_or_default();
    let mut operations = Vec::new();
    let mut problems = Problems::default();

    for (path, item) in &doc.paths.paths {
        let (path_doc, item) = match resolver
            .resolve_path_item(resolver.root_doc(), item)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                problems.record(format!("path '{path}'"), e)?;
                continue;
            }
        };

        for (method, op) in path_operations(&item) {
            let label = format!("{method} {path}");
            let input = OperationInput {
                doc: &path_doc,
                path,
                method,
                path_params: &item.parameters,
                operation: op,
                global_security: &global_security,
            };
            match build_operation(resolver, input).await {
                Ok(descriptor) => operations.push(descriptor),
                Err(e) => problems.record(label, e)?,
            }
        }
    }

    problems.finish(operations)
}

/// Resolution failures gathered across the whole document, reported as one validation error.
#[derive(Default)]
struct Problems(Vec<String>);

impl Problems {
    /// Keep going on validation problems; anything else (an unreadable external document, say)
    /// aborts right away.
    fn record(&mut self, context: String, err: OpenApiToolsError) -> Result<()> {
        match err {
            OpenApiToolsError::SpecValidation(messages) => {
                self.0
                    .extend(messages.into_iter().map(|m| format!("{context}: {m}")));
                Ok(())
            }
            other => Err(other),
        }
    }

    fn finish<T>(self, value: T) -> Result<T> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(OpenApiToolsError::SpecValidation(self.0))
        }
    }
}

/// The operations of a path item in a fixed method order.
fn path_operations(item: &PathItem) -> Vec<(Method, &Operation)> {
    [
        (Method::GET, &item.get),
        (Method::PUT, &item.put),
        (Method::POST, &item.post),
        (Method::DELETE, &item.delete),
        (Method::OPTIONS, &item.options),
        (Method::HEAD, &item.head),
        (Method::PATCH, &item.patch),
        (Method::TRACE, &item.trace),
    ]
    .into_iter()
    .filter_map(|(m, op)| op.as_ref().map(|op| (m, op)))
    .collect()
}

struct OperationInput<'a> {
    doc: &'a DocId,
    path: &'a str,
    method: Method,
    path_params: &'a [ReferenceOr<Parameter>],
    operation: &'a Operation,
    global_security: &'a [SecurityRequirement],
}

async fn build_operation(
    resolver: &OpenApiResolver<'_>,
    input: OperationInput<'_>,
) -> Result<OperationDescriptor> {
    let OperationInput {
        doc,
        path,
        method,
        path_params,
        operation: op,
        global_security,
    } = input;

    let merged = merge_parameters(resolver, doc, path_params, &op.parameters).await?;
    let mut parameters = Vec::with_capacity(merged.len());
    for (param_doc, param) in &merged {
        parameters.push(extract_parameter(resolver, param_doc, param).await?);
    }

    let request_body = match &op.request_body {
        Some(body) => extract_request_body(resolver, doc, body).await?,
        None => None,
    };

    let response_schema = derive_response_schema(resolver, doc, op).await?;

    Ok(OperationDescriptor {
        key: OperationDescriptor::operation_key(&method, path, op.operation_id.as_deref()),
        method,
        path: path.to_string(),
        parameters,
        request_body,
        response_schema,
        operation_id: op.operation_id.clone(),
        summary: op.summary.clone().filter(|s| !s.trim().is_empty()),
        description: op.description.clone().filter(|s| !s.trim().is_empty()),
        tags: op.tags.clone(),
        security: op
            .security
            .clone()
            .unwrap_or_else(|| global_security.to_vec()),
        deprecated: op.deprecated,
    })
}

/// Path-item parameters overridden by operation parameters with the same `(location, name)`.
async fn merge_parameters(
    resolver: &OpenApiResolver<'_>,
    current_doc: &DocId,
    path_item_params: &[ReferenceOr<Parameter>],
    operation_params: &[ReferenceOr<Parameter>],
) -> Result<Vec<(DocId, Parameter)>> {
    fn key_for(p: &Parameter) -> (ParamLocation, String) {
        (location_of(p), p.parameter_data_ref().name.clone())
    }

    let mut merged: Vec<(DocId, Parameter)> = Vec::new();
    let mut index: HashMap<(ParamLocation, String), usize> = HashMap::new();

    for p in path_item_params.iter().chain(operation_params) {
        let (doc, rp) = resolver.resolve_parameter(current_doc, p).await?;
        let k = key_for(&rp);
        if let Some(i) = index.get(&k).copied() {
            merged[i] = (doc, rp);
        } else {
            index.insert(k, merged.len());
            merged.push((doc, rp));
        }
    }

    Ok(merged)
}

fn location_of(p: &Parameter) -> ParamLocation {
    match p {
        Parameter::Path { .. } => ParamLocation::Path,
        Parameter::Query { .. } => ParamLocation::Query,
        Parameter::Header { .. } => ParamLocation::Header,
        Parameter::Cookie { .. } => ParamLocation::Cookie,
    }
}

fn default_query_explode(style: &QueryStyle) -> bool {
    matches!(style, QueryStyle::Form | QueryStyle::DeepObject)
}

async fn extract_parameter(
    resolver: &OpenApiResolver<'_>,
    doc: &DocId,
    param: &Parameter,
) -> Result<ParameterDescriptor> {
    let data = param.parameter_data_ref();
    let location = location_of(param);

    let query = match param {
        Parameter::Query {
            style,
            allow_reserved,
            allow_empty_value,
            ..
        } => Some(QuerySerialization {
            style: style.clone(),
            explode: data.explode.unwrap_or_else(|| default_query_explode(style)),
            allow_reserved: *allow_reserved,
            allow_empty_value: allow_empty_value.unwrap_or(false),
        }),
        _ => None,
    };

    let raw_schema = match &data.format {
        ParameterSchemaOrContent::Schema(schema) => Some(to_json(schema)?),
        ParameterSchemaOrContent::Content(content) => content
            .values()
            .next()
            .and_then(|mt| mt.schema.as_ref())
            .map(to_json)
            .transpose()?,
    };
    let schema = match raw_schema {
        Some(s) => resolver.inline_schema(doc, &s).await?,
        None => json!({ "type": "string" }),
    };

    Ok(ParameterDescriptor {
        name: data.name.clone(),
        location,
        // Path parameters are always required.
        required: location == ParamLocation::Path || data.required,
        schema,
        description: data.description.clone(),
        query,
    })
}

fn to_json<T: Serialize>(v: &T) -> Result<Value> {
    serde_json::to_value(v)
        .map_err(|e| OpenApiToolsError::invalid(format!("cannot serialize schema: {e}")))
}

/// JSON first, then form, then multipart, then whatever is declared first.
fn pick_media_type(body: &openapiv3::RequestBody) -> Option<(&String, &MediaType)> {
    let by_encoding = |wanted: BodyEncoding| {
        body.content
            .iter()
            .find(|(k, _)| BodyEncoding::for_media_type(k) == wanted)
    };
    by_encoding(BodyEncoding::Json)
        .or_else(|| by_encoding(BodyEncoding::Form))
        .or_else(|| by_encoding(BodyEncoding::Multipart))
        .or_else(|| body.content.iter().next())
}

async fn extract_request_body(
    resolver: &OpenApiResolver<'_>,
    doc: &DocId,
    body: &ReferenceOr<openapiv3::RequestBody>,
) -> Result<Option<RequestBodyDescriptor>> {
    let (body_doc, body) = resolver.resolve_request_body(doc, body).await?;
    let Some((media_type, mt)) = pick_media_type(&body) else {
        return Ok(None);
    };
    let encoding = BodyEncoding::for_media_type(media_type);

    let schema = match &mt.schema {
        Some(s) => resolver.inline_schema(&body_doc, &to_json(s)?).await?,
        None if encoding == BodyEncoding::Raw => json!({ "type": "string" }),
        None => json!({ "type": "object" }),
    };

    let binary_fields = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .filter(|(_, s)| is_binary_schema(s))
                .map(|(k, _)| k.clone())
                .collect()
        })
        .unwrap_or_default();

    Ok(Some(RequestBodyDescriptor {
        media_type: media_type.clone(),
        encoding,
        schema,
        required: body.required,
        description: body.description.clone(),
        binary_fields,
    }))
}

fn is_binary_schema(schema: &Value) -> bool {
    schema.get("type").and_then(Value::as_str) == Some("string")
        && schema.get("format").and_then(Value::as_str) == Some("binary")
}

/// Schema of the first explicit 2xx response (falling back to the `2XX` range) with JSON content.
async fn derive_response_schema(
    resolver: &OpenApiResolver<'_>,
    doc: &DocId,
    op: &Operation,
) -> Result<Option<Value>> {
    let mut explicit_2xx: Vec<(u16, &ReferenceOr<Response>)> = Vec::new();
    let mut range_2xx: Option<&ReferenceOr<Response>> = None;

    for (code, resp) in &op.responses.responses {
        match code {
            StatusCode::Code(n) if (200..300).contains(n) => explicit_2xx.push((*n, resp)),
            StatusCode::Range(2) => range_2xx = Some(resp),
            _ => {}
        }
    }
    explicit_2xx.sort_by_key(|(n, _)| *n);

    let resp_ref = match (explicit_2xx.first(), range_2xx) {
        (Some((_, r)), _) => *r,
        (None, Some(r)) => r,
        (None, None) => return Ok(None),
    };

    let (resp_doc, resp) = resolver.resolve_response(doc, resp_ref).await?;

    let mt = resp.content.get("application/json").or_else(|| {
        resp.content
            .iter()
            .find_map(|(k, v)| (BodyEncoding::for_media_type(k) == BodyEncoding::Json).then_some(v))
    });
    let Some(schema) = mt.and_then(|mt| mt.schema.as_ref()) else {
        return Ok(None);
    };

    Ok(Some(resolver.inline_schema(&resp_doc, &to_json(schema)?).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::get;
    use openapi_mcp_test_support::spawn_router;
    use std::fs;
    use tempfile::tempdir;

    const PETS_V3: &str = r##"
openapi: 3.0.3
info: { title: Pets, version: "2.1" }
servers:
  - url: "https://{region}.pets.example.com/v1"
    variables: { region: { default: eu } }
security:
  - bearerAuth: []
components:
  securitySchemes:
    bearerAuth: { type: http, scheme: bearer }
  schemas:
    Pet:
      type: object
      required: [name]
      properties:
        name: { type: string }
        photo: { type: string, format: binary }
paths:
  /pets/{petId}:
    parameters:
      - { name: petId, in: path, required: true, schema: { type: integer } }
      - { name: verbose, in: query, schema: { type: boolean } }
    get:
      operationId: getPet
      summary: Get a pet
      parameters:
        - { name: verbose, in: query, required: true, schema: { type: string } }
        - { name: session, in: cookie, schema: { type: string } }
        - name: tags
          in: query
          style: pipeDelimited
          schema: { type: array, items: { type: string } }
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema: { $ref: "#/components/schemas/Pet" }
    put:
      security: []
      requestBody:
        required: true
        content:
          text/plain: { schema: { type: string } }
          multipart/form-data:
            schema: { $ref: "#/components/schemas/Pet" }
      responses:
        "204": { description: gone }
"##;

    async fn normalize_str(text: &str) -> Result<NormalizedSpec> {
        let client = Client::new();
        let value = parse_document("inline", text.as_bytes())?;
        normalize_value(DocId::File("/virtual/spec.yaml".into()), value, &client).await
    }

    #[tokio::test]
    async fn builds_operation_descriptors() {
        let spec = normalize_str(PETS_V3).await.unwrap();
        assert_eq!(spec.format, SourceFormat::OpenApi3);
        assert_eq!(spec.title, "Pets");
        assert_eq!(spec.servers, vec!["https://eu.pets.example.com/v1"]);
        assert!(spec.security_schemes.contains_key("bearerAuth"));
        assert_eq!(spec.operations.len(), 2);

        let get_pet = spec.operation("getPet").unwrap();
        assert_eq!(get_pet.method, Method::GET);
        let names: Vec<(&str, ParamLocation, bool)> = get_pet
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), p.location, p.required))
            .collect();
        assert_eq!(
            names,
            vec![
                ("petId", ParamLocation::Path, true),
                ("verbose", ParamLocation::Query, true),
                ("session", ParamLocation::Cookie, false),
                ("tags", ParamLocation::Query, false),
            ]
        );
        let tags = &get_pet.parameters[3];
        let ser = tags.query.as_ref().unwrap();
        assert_eq!(ser.style, QueryStyle::PipeDelimited);
        assert!(!ser.explode);
        assert_eq!(
            get_pet.response_schema.as_ref().unwrap()["properties"]["name"],
            json!({ "type": "string" })
        );
        assert_eq!(get_pet.security_scheme_names(), vec!["bearerAuth"]);

        let put = spec.operation("PUT /pets/{petId}").unwrap();
        assert!(put.security.is_empty());
        let body = put.request_body.as_ref().unwrap();
        assert_eq!(body.encoding, BodyEncoding::Multipart);
        assert!(body.required);
        assert_eq!(body.binary_fields, vec!["photo"]);
        assert_eq!(body.required_fields(), vec!["name"]);
    }

    const PETS_V2: &str = r##"
swagger: 2.0
info: { title: Legacy, version: "1" }
host: api.example.com
paths:
  /pets:
    post:
      operationId: addPet
      parameters:
        - in: body
          name: body
          required: true
          schema: { $ref: "#/definitions/Pet" }
      responses:
        "200": { description: ok, schema: { $ref: "#/definitions/Pet" } }
definitions:
  Pet: { type: object, properties: { name: { type: string } } }
"##;

    #[tokio::test]
    async fn swagger_documents_are_converted() {
        let spec = normalize_str(PETS_V2).await.unwrap();
        assert_eq!(spec.format, SourceFormat::Swagger2);
        assert_eq!(spec.servers, vec!["https://api.example.com"]);
        let op = spec.operation("addPet").unwrap();
        let body = op.request_body.as_ref().unwrap();
        assert_eq!(body.encoding, BodyEncoding::Json);
        assert_eq!(body.schema["properties"]["name"]["type"], "string");
        assert!(op.response_schema.is_some());
    }

    #[test]
    fn normalizing_twice_is_a_no_op() {
        let raw = parse_document("inline", PETS_V2.as_bytes()).unwrap();
        let (format, once) = normalize_document(raw).unwrap();
        assert_eq!(format, SourceFormat::Swagger2);

        let yaml = serde_yaml::to_string(&once).unwrap();
        let reparsed = parse_document("reserialized", yaml.as_bytes()).unwrap();
        let (format, twice) = normalize_document(reparsed).unwrap();
        assert_eq!(format, SourceFormat::OpenApi3);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn unresolvable_operations_abort_loading() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("shared.yaml"),
            "schemas:\n  Pet: { type: object }\n",
        )
        .unwrap();
        let path = dir.path().join("openapi.yaml");
        fs::write(
            &path,
            r#"
openapi: 3.0.3
info: { title: Split, version: "1" }
paths:
  /pets:
    get:
      operationId: listPets
      responses:
        "200": { description: ok }
  /owners:
    get:
      operationId: listOwners
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema: { $ref: "./shared.yaml#/schemas/Owner" }
"#,
        )
        .unwrap();

        let cfg = ApiConfig::new("split", path.display().to_string());
        let err = load_spec(&cfg, &Client::new()).await.unwrap_err();
        let OpenApiToolsError::SpecValidation(problems) = &err else {
            panic!("expected a validation error, got {err}");
        };
        assert_eq!(problems.len(), 1, "{problems:?}");
        assert!(problems[0].starts_with("GET /owners"), "{problems:?}");
        assert!(problems[0].contains("/schemas/Owner"), "{problems:?}");
    }

    #[tokio::test]
    async fn cyclic_schemas_still_load() {
        let spec = normalize_str(
            r##"
openapi: 3.0.3
info: { title: Tree, version: "1" }
components:
  schemas:
    Node:
      type: object
      properties:
        children: { type: array, items: { $ref: "#/components/schemas/Node" } }
paths:
  /tree:
    get:
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema: { $ref: "#/components/schemas/Node" }
"##,
        )
        .await
        .unwrap();
        assert_eq!(spec.operations.len(), 1);
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            parse_document("x", b"- just\n- a list\n"),
            Err(OpenApiToolsError::SpecParse { .. })
        ));
        assert!(matches!(
            parse_document("x", b"{ not: [valid"),
            Err(OpenApiToolsError::SpecParse { .. })
        ));
    }

    #[tokio::test]
    async fn hash_policy_controls_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spec.yaml");
        fs::write(&path, PETS_V3).unwrap();
        let client = Client::new();

        let mut cfg = ApiConfig::new("pets", path.display().to_string());
        cfg.spec_hash = Some(format!("sha256:{}", "0".repeat(64)));
        cfg.spec_hash_policy = HashPolicy::Fail;
        let err = load_spec(&cfg, &client).await.unwrap_err();
        assert!(err.to_string().contains("hash mismatch"), "{err}");

        cfg.spec_hash_policy = HashPolicy::Warn;
        load_spec(&cfg, &client).await.unwrap();

        cfg.spec_hash = Some(format!(
            "sha256:{}",
            hex::encode(Sha256::digest(PETS_V3.as_bytes()))
        ));
        cfg.spec_hash_policy = HashPolicy::Fail;
        load_spec(&cfg, &client).await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let cfg = ApiConfig::new("x", "/definitely/not/here/openapi.yaml");
        let err = load_spec(&cfg, &Client::new()).await.unwrap_err();
        assert!(matches!(err, OpenApiToolsError::SpecUnavailable { .. }));
    }

    #[tokio::test]
    async fn loads_spec_over_http() {
        let server = spawn_router(
            Router::new()
                .route("/openapi.yaml", get(|| async { PETS_V3 }))
                .route(
                    "/broken.yaml",
                    get(|| async { (axum::http::StatusCode::NOT_FOUND, "nope") }),
                ),
        )
        .await
        .unwrap();
        let client = Client::new();

        let spec = load_spec(&ApiConfig::new("pets", server.url("/openapi.yaml")), &client)
            .await
            .unwrap();
        assert_eq!(spec.operations.len(), 2);

        let err = load_spec(&ApiConfig::new("pets", server.url("/broken.yaml")), &client)
            .await
            .unwrap_err();
        assert!(matches!(err, OpenApiToolsError::SpecUnavailable { .. }), "{err}");
    }

    #[tokio::test]
    async fn invalid_documents_fail_validation() {
        let err = normalize_str("openapi: 3.0.0\ninfo: { title: t }\npaths: {}\n")
            .await
            .unwrap_err();
        assert!(matches!(err, OpenApiToolsError::SpecValidation(_)));
    }
}
