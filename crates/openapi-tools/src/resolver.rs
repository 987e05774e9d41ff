//! `OpenAPI` `$ref` resolver.
//!
//! The `openapiv3` crate models `$ref`s using `ReferenceOr<T>` but does not automatically resolve them.
//! Real-world `OpenAPI` specs frequently rely on external references split across files (or URLs).
//!
//! This resolver supports:
//! - Local refs (`#/...`)
//! - File refs (`./common.yaml#/...`, `/abs/path/spec.yaml#/...`, `file:///...#/...`)
//! - URL refs (`https://example.com/common.yaml#/...`)
//!
//! Key detail: `$ref` resolution is **relative to the document that contains the `$ref`**.
//! To ensure correctness across nested references, callers pass the current document id (`DocId`)
//! when resolving.

use crate::error::{OpenApiToolsError, Result};
use openapi_mcp_http::safety::sanitize_reqwest_error;
use openapiv3::{Parameter, PathItem, ReferenceOr, RequestBody, Response, SecurityScheme};
use parking_lot::RwLock;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use url::Url;

/// Nesting limit when inlining schemas; deeper (or cyclic) references become opaque objects.
const MAX_INLINE_DEPTH: usize = 32;

/// Keywords that only matter for documentation renderers.
const DROPPED_SCHEMA_KEYS: &[&str] = &["xml", "externalDocs"];

type InlineFuture<'s> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 's>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocId {
    Url(Url),
    File(PathBuf),
}

impl DocId {
    /// Parse a root spec location into a document identifier (URL or file path).
    ///
    /// # Errors
    ///
    /// Returns an error if the location is an invalid URL or invalid file URL.
    pub fn parse(spec_location: &str) -> Result<Self> {
        if spec_location.starts_with("http://") || spec_location.starts_with("https://") {
            let url = Url::parse(spec_location).map_err(|e| {
                OpenApiToolsError::Config(format!("invalid spec URL '{spec_location}': {e}"))
            })?;
            Ok(DocId::Url(strip_fragment(url)))
        } else if spec_location.starts_with("file://") {
            let url = Url::parse(spec_location).map_err(|e| {
                OpenApiToolsError::Config(format!("invalid spec file URL '{spec_location}': {e}"))
            })?;
            let path = url.to_file_path().map_err(|()| {
                OpenApiToolsError::Config(format!(
                    "invalid file URL (cannot convert to path): {spec_location}"
                ))
            })?;
            Ok(DocId::File(canonicalize_best_effort(path)))
        } else {
            Ok(DocId::File(canonicalize_best_effort(PathBuf::from(
                spec_location,
            ))))
        }
    }

    #[must_use]
    pub fn display(&self) -> String {
        match self {
            DocId::Url(u) => u.to_string(),
            DocId::File(p) => p.display().to_string(),
        }
    }
}

fn strip_fragment(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}

fn canonicalize_best_effort(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}

#[derive(Debug)]
pub struct OpenApiResolver<'a> {
    root_doc: DocId,
    client: &'a Client,
    docs: RwLock<HashMap<DocId, Arc<Value>>>,
}

impl<'a> OpenApiResolver<'a> {
    /// Create a new resolver for a root document that has already been loaded (and normalized).
    #[must_use]
    pub fn new(root_doc: DocId, root_value: Value, client: &'a Client) -> Self {
        let mut docs = HashMap::new();
        docs.insert(root_doc.clone(), Arc::new(root_value));
        Self {
            root_doc,
            client,
            docs: RwLock::new(docs),
        }
    }

    #[must_use]
    pub fn root_doc(&self) -> &DocId {
        &self.root_doc
    }

    /// Resolve a `$ref` for a parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference cannot be resolved, or if the referenced document
    /// cannot be loaded/parsed.
    pub async fn resolve_parameter(
        &self,
        current_doc: &DocId,
        param: &ReferenceOr<Parameter>,
    ) -> Result<(DocId, Parameter)> {
        self.resolve_reference_or(current_doc, param).await
    }

    /// Resolve a `$ref` for a request body.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference cannot be resolved, or if the referenced document
    /// cannot be loaded/parsed.
    pub async fn resolve_request_body(
        &self,
        current_doc: &DocId,
        body: &ReferenceOr<RequestBody>,
    ) -> Result<(DocId, RequestBody)> {
        self.resolve_reference_or(current_doc, body).await
    }

    /// Resolve a `$ref` for a security scheme.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference cannot be resolved, or if the referenced document
    /// cannot be loaded/parsed.
    pub async fn resolve_security_scheme(
        &self,
        current_doc: &DocId,
        scheme: &ReferenceOr<SecurityScheme>,
    ) -> Result<(DocId, SecurityScheme)> {
        self.resolve_reference_or(current_doc, scheme).await
    }

    /// Inline every `$ref` inside a JSON schema value.
    ///
    /// References are resolved relative to the document containing them. Cyclic references (and
    /// anything nested deeper than a fixed limit) are replaced with an opaque object schema, so
    /// the result is always finite.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference cannot be resolved.
    pub async fn inline_schema(&self, current_doc: &DocId, schema: &Value) -> Result<Value> {
        self.inline_value(current_doc.clone(), schema.clone(), Vec::new())
            .await
    }

    fn inline_value(&self, doc: DocId, value: Value, stack: Vec<String>) -> InlineFuture<'_> {
        Box::pin(async move {
            match value {
                Value::Object(map) => {
                    if let Some(Value::String(reference)) = map.get("$ref") {
                        let key = Self::canonical_ref_key(&doc, reference)?;
                        if stack.contains(&key) || stack.len() >= MAX_INLINE_DEPTH {
                            return Ok(serde_json::json!({
                                "type": "object",
                                "description": format!("Recursive reference to {reference}"),
                            }));
                        }
                        let (target_doc, target) = self.resolve_ref_value(&doc, reference).await?;
                        let mut next_stack = stack;
                        next_stack.push(key);
                        let mut inlined = self.inline_value(target_doc, target, next_stack).await?;
                        // A sibling description documents this particular use of the schema.
                        if let (Some(desc), Some(obj)) =
                            (map.get("description"), inlined.as_object_mut())
                        {
                            obj.insert("description".to_string(), desc.clone());
                        }
                        return Ok(inlined);
                    }

                    let mut out = serde_json::Map::with_capacity(map.len());
                    for (k, v) in map {
                        if DROPPED_SCHEMA_KEYS.contains(&k.as_str()) {
                            continue;
                        }
                        let v = self.inline_value(doc.clone(), v, stack.clone()).await?;
                        out.insert(k, v);
                    }
                    Ok(Value::Object(out))
                }
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for v in items {
                        out.push(self.inline_value(doc.clone(), v, stack.clone()).await?);
                    }
                    Ok(Value::Array(out))
                }
                other => Ok(other),
            }
        })
    }

    /// Resolve a `$ref` for a response.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference cannot be resolved, or if the referenced document
    /// cannot be loaded/parsed.
    pub async fn resolve_response(
        &self,
        current_doc: &DocId,
        response: &ReferenceOr<Response>,
    ) -> Result<(DocId, Response)> {
        self.resolve_reference_or(current_doc, response).await
    }

    /// Resolve a `$ref` for a path item.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference cannot be resolved, or if the referenced document
    /// cannot be loaded/parsed.
    pub async fn resolve_path_item(
        &self,
        current_doc: &DocId,
        item: &ReferenceOr<PathItem>,
    ) -> Result<(DocId, PathItem)> {
        self.resolve_reference_or(current_doc, item).await
    }

    async fn resolve_reference_or<T>(
        &self,
        current_doc: &DocId,
        r: &ReferenceOr<T>,
    ) -> Result<(DocId, T)>
    where
        T: Clone + DeserializeOwned,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut doc = current_doc.clone();
        let mut cur: ReferenceOr<T> = r.clone();

        loop {
            match cur {
                ReferenceOr::Item(item) => return Ok((doc, item)),
                ReferenceOr::Reference { reference } => {
                    let key = Self::canonical_ref_key(&doc, &reference)?;
                    if !seen.insert(key) {
                        return Err(OpenApiToolsError::invalid(format!(
                            "cyclic $ref detected while resolving: {reference}"
                        )));
                    }

                    let (target_doc, value) = self.resolve_ref_value(&doc, &reference).await?;
                    let next: ReferenceOr<T> = serde_json::from_value(value).map_err(|e| {
                        OpenApiToolsError::invalid(format!(
                            "referenced value '{}' (doc {}) has the wrong shape: {}",
                            reference,
                            target_doc.display(),
                            e
                        ))
                    })?;

                    doc = target_doc;
                    cur = next;
                }
            }
        }
    }

    async fn resolve_ref_value(
        &self,
        current_doc: &DocId,
        reference: &str,
    ) -> Result<(DocId, Value)> {
        let (target_doc, pointer) = Self::parse_ref(current_doc, reference)?;
        let doc_value = self.load_doc(&target_doc).await?;

        let selected = if let Some(ptr) = pointer {
            doc_value.pointer(&ptr).cloned().ok_or_else(|| {
                OpenApiToolsError::invalid(format!(
                    "unresolved $ref '{}' (doc {}, missing pointer '{}')",
                    reference,
                    target_doc.display(),
                    ptr
                ))
            })?
        } else {
            (*doc_value).clone()
        };

        Ok((target_doc, selected))
    }

    fn parse_ref(current_doc: &DocId, reference: &str) -> Result<(DocId, Option<String>)> {
        if let Some(frag) = reference.strip_prefix('#') {
            let ptr = if frag.is_empty() {
                None
            } else if frag.starts_with('/') {
                Some(frag.to_string())
            } else {
                return Err(OpenApiToolsError::invalid(format!(
                    "unsupported $ref fragment (expected JSON pointer starting with '/'): {reference}"
                )));
            };
            return Ok((current_doc.clone(), ptr));
        }

        let (doc_part, frag_part) = match reference.split_once('#') {
            Some((d, f)) => (d, Some(f)),
            None => (reference, None),
        };

        let target_doc = Self::resolve_doc(current_doc, doc_part)?;

        let ptr = match frag_part {
            Some("") | None => None,
            Some(frag) if frag.starts_with('/') => Some(frag.to_string()),
            Some(_) => {
                return Err(OpenApiToolsError::invalid(format!(
                    "unsupported $ref fragment (expected JSON pointer starting with '/'): {reference}"
                )));
            }
        };

        Ok((target_doc, ptr))
    }

    fn resolve_doc(current_doc: &DocId, doc_part: &str) -> Result<DocId> {
        if doc_part.is_empty() {
            return Ok(current_doc.clone());
        }

        // Absolute URL refs.
        if doc_part.starts_with("http://") || doc_part.starts_with("https://") {
            let url = Url::parse(doc_part).map_err(|e| {
                OpenApiToolsError::invalid(format!("bad $ref URL '{doc_part}': {e}"))
            })?;
            return Ok(DocId::Url(strip_fragment(url)));
        }

        // file:// URL refs.
        if doc_part.starts_with("file://") {
            let url = Url::parse(doc_part).map_err(|e| {
                OpenApiToolsError::invalid(format!("bad $ref file URL '{doc_part}': {e}"))
            })?;
            let path = url.to_file_path().map_err(|()| {
                OpenApiToolsError::invalid(format!("bad $ref file URL (not a path): {doc_part}"))
            })?;
            return Ok(DocId::File(canonicalize_best_effort(path)));
        }

        match current_doc {
            DocId::Url(base) => {
                let joined = base.join(doc_part).map_err(|e| {
                    OpenApiToolsError::invalid(format!(
                        "cannot resolve relative $ref '{doc_part}' against {base}: {e}"
                    ))
                })?;
                Ok(DocId::Url(strip_fragment(joined)))
            }
            DocId::File(base) => {
                // Absolute paths should remain absolute.
                let resolved = if Path::new(doc_part).is_absolute() {
                    PathBuf::from(doc_part)
                } else {
                    base.parent()
                        .unwrap_or_else(|| Path::new("."))
                        .join(doc_part)
                };
                Ok(DocId::File(canonicalize_best_effort(resolved)))
            }
        }
    }

    fn canonical_ref_key(current_doc: &DocId, reference: &str) -> Result<String> {
        let (target_doc, pointer) = Self::parse_ref(current_doc, reference)?;
        let mut key = match &target_doc {
            DocId::Url(u) => format!("url:{u}"),
            DocId::File(p) => format!("file:{}", p.display()),
        };
        if let Some(ptr) = pointer {
            key.push('#');
            key.push_str(&ptr);
        }
        Ok(key)
    }

    async fn load_doc(&self, doc: &DocId) -> Result<Arc<Value>> {
        // Fast path: cache hit.
        if let Some(v) = self.docs.read().get(doc).cloned() {
            return Ok(v);
        }

        // Cache miss: load.
        tracing::debug!(doc = %doc.display(), "loading referenced document");
        let unavailable = |message: String| OpenApiToolsError::SpecUnavailable {
            location: doc.display(),
            message,
        };
        let content = match doc {
            DocId::File(path) => {
                std::fs::read_to_string(path).map_err(|e| unavailable(e.to_string()))?
            }
            DocId::Url(url) => {
                let resp = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| unavailable(sanitize_reqwest_error(&e)))?;
                if !resp.status().is_success() {
                    return Err(unavailable(format!("HTTP {}", resp.status())));
                }
                resp.text()
                    .await
                    .map_err(|e| unavailable(sanitize_reqwest_error(&e)))?
            }
        };

        let parsed: Value = serde_json::from_str(&content)
            .or_else(|_| serde_yaml::from_str(&content))
            .map_err(|e| OpenApiToolsError::SpecParse {
                location: doc.display(),
                message: e.to_string(),
            })?;

        let parsed = Arc::new(parsed);
        self.docs.write().insert(doc.clone(), Arc::clone(&parsed));
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn root() -> DocId {
        DocId::File(PathBuf::from("/virtual/root.yaml"))
    }

    #[tokio::test]
    async fn inlines_local_schema_refs() {
        let doc = json!({
            "components": { "schemas": {
                "Pet": {
                    "type": "object",
                    "properties": { "tag": { "$ref": "#/components/schemas/Tag" } },
                    "xml": { "name": "pet" }
                },
                "Tag": { "type": "string", "enum": ["a", "b"] }
            }}
        });
        let client = Client::new();
        let resolver = OpenApiResolver::new(root(), doc, &client);

        let inlined = resolver
            .inline_schema(&root(), &json!({"$ref": "#/components/schemas/Pet"}))
            .await
            .unwrap();
        assert_eq!(
            inlined,
            json!({
                "type": "object",
                "properties": { "tag": { "type": "string", "enum": ["a", "b"] } }
            })
        );
    }

    #[tokio::test]
    async fn cyclic_schema_refs_terminate() {
        let doc = json!({
            "components": { "schemas": {
                "Node": {
                    "type": "object",
                    "properties": { "next": { "$ref": "#/components/schemas/Node" } }
                }
            }}
        });
        let client = Client::new();
        let resolver = OpenApiResolver::new(root(), doc, &client);

        let inlined = resolver
            .inline_schema(&root(), &json!({"$ref": "#/components/schemas/Node"}))
            .await
            .unwrap();
        let next = &inlined["properties"]["next"];
        assert_eq!(next["type"], "object");
        assert!(next.get("properties").is_none());
    }

    #[tokio::test]
    async fn missing_ref_target_is_a_validation_error() {
        let client = Client::new();
        let resolver = OpenApiResolver::new(root(), json!({}), &client);
        let err = resolver
            .inline_schema(&root(), &json!({"$ref": "#/components/schemas/Nope"}))
            .await
            .unwrap_err();
        assert!(matches!(err, OpenApiToolsError::SpecValidation(_)), "{err}");
    }

    #[tokio::test]
    async fn resolves_external_file_refs_relative_to_containing_doc() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("shared")).unwrap();
        fs::write(
            dir.path().join("shared/params.yaml"),
            r"
components:
  parameters:
    Limit:
      $ref: './schemas.yaml#/LimitParam'
",
        )
        .unwrap();
        fs::write(
            dir.path().join("shared/schemas.yaml"),
            r"
LimitParam:
  name: limit
  in: query
  schema:
    type: integer
",
        )
        .unwrap();

        let root_doc = DocId::File(dir.path().join("root.yaml"));
        let client = Client::new();
        let resolver = OpenApiResolver::new(root_doc.clone(), json!({}), &client);

        let param: ReferenceOr<Parameter> = ReferenceOr::Reference {
            reference: "./shared/params.yaml#/components/parameters/Limit".to_string(),
        };
        let (_, resolved) = resolver.resolve_parameter(&root_doc, &param).await.unwrap();
        assert_eq!(resolved.parameter_data_ref().name, "limit");
    }

    #[tokio::test]
    async fn unreadable_external_doc_is_unavailable() {
        let dir = tempdir().unwrap();
        let root_doc = DocId::File(dir.path().join("root.yaml"));
        let client = Client::new();
        let resolver = OpenApiResolver::new(root_doc.clone(), json!({}), &client);
        let err = resolver
            .inline_schema(&root_doc, &json!({"$ref": "./missing.yaml#/X"}))
            .await
            .unwrap_err();
        assert!(matches!(err, OpenApiToolsError::SpecUnavailable { .. }), "{err}");
    }

    #[test]
    fn parses_doc_ids() {
        assert!(matches!(
            DocId::parse("https://example.com/openapi.json#frag").unwrap(),
            DocId::Url(u) if u.fragment().is_none()
        ));
        assert!(matches!(
            DocId::parse("./openapi.yaml").unwrap(),
            DocId::File(_)
        ));
    }
}
