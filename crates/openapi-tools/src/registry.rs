//! The assembled tool set for one API: spec, synthesized tools and the invoker behind them.

use crate::config::ApiConfig;
use crate::descriptor::NormalizedSpec;
use crate::error::{OpenApiToolsError, Result};
use crate::invoke::{CallObserver, InvocationResult, Invoker, ResponseBody};
use crate::normalize::load_spec;
use crate::synth::{SynthOptions, ToolDescriptor, synthesize};
use base64::Engine as _;
use openapi_mcp_http::auth::AuthProvider;
use openapi_mcp_http::semantics::annotations_for_method;
use reqwest::{Client, Method};
use rmcp::model::{CallToolResult, Content, JsonObject, Tool};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Built-in tool that checks the API is reachable and reports call metrics.
pub const HEALTH_CHECK_TOOL: &str = "health_check";

/// Immutable after startup; cheap to clone.
#[derive(Clone)]
pub struct ToolRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    api_name: String,
    spec: NormalizedSpec,
    tools: Vec<ToolDescriptor>,
    by_name: HashMap<String, usize>,
    invoker: Invoker,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("api_name", &self.inner.api_name)
            .field("tools", &self.inner.tools.len())
            .field("invoker", &self.inner.invoker)
            .finish()
    }
}

impl ToolRegistry {
    /// Load the spec, set up auth and synthesize the tools, all within the startup timeout.
    ///
    /// # Errors
    ///
    /// Returns the startup-fatal errors: config problems, spec load/parse/conversion/validation
    /// failures, or [`OpenApiToolsError::SpecUnavailable`] when the startup timeout expires.
    pub async fn build(
        config: &ApiConfig,
        client: Client,
        observer: Arc<dyn CallObserver>,
    ) -> Result<Self> {
        config.validate()?;

        let startup_timeout = config.startup_timeout();
        let spec = tokio::time::timeout(startup_timeout, load_spec(config, &client))
            .await
            .map_err(|_| OpenApiToolsError::SpecUnavailable {
                location: config.spec.clone(),
                message: format!("startup timeout after {}s", startup_timeout.as_secs()),
            })??;

        Self::from_spec(config, spec, client, observer)
    }

    /// Assemble a registry from an already-normalized spec.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::Config`] when no usable base URL exists, or an auth
    /// configuration error.
    pub fn from_spec(
        config: &ApiConfig,
        spec: NormalizedSpec,
        client: Client,
        observer: Arc<dyn CallObserver>,
    ) -> Result<Self> {
        let base_url = resolve_base_url(config, &spec)?;
        let auth = AuthProvider::new(&config.auth, client.clone())?;

        let mut options = SynthOptions::for_provider(&auth, config.flatten_threshold);
        options.reserved_names.push(HEALTH_CHECK_TOOL.to_string());
        let tools = synthesize(&spec, &options);
        let by_name = tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();

        tracing::info!(
            api = %config.name,
            base_url = %base_url,
            auth = auth.kind(),
            tools = tools.len(),
            "synthesized tools from API spec"
        );

        let invoker = Invoker::new(client, base_url, auth, config, observer);
        Ok(Self {
            inner: Arc::new(RegistryInner {
                api_name: config.name.clone(),
                spec,
                tools,
                by_name,
                invoker,
            }),
        })
    }

    #[must_use]
    pub fn api_name(&self) -> &str {
        &self.inner.api_name
    }

    #[must_use]
    pub fn spec(&self) -> &NormalizedSpec {
        &self.inner.spec
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.inner.invoker.base_url()
    }

    #[must_use]
    pub fn invoker(&self) -> &Invoker {
        &self.inner.invoker
    }

    #[must_use]
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.inner.tools
    }

    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.inner.by_name.get(name).map(|&i| &self.inner.tools[i])
    }

    /// MCP tool definitions, in synthesis order, followed by [`HEALTH_CHECK_TOOL`].
    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        self.inner
            .tools
            .iter()
            .map(ToolDescriptor::to_mcp_tool)
            .chain(std::iter::once(health_check_tool()))
            .collect()
    }

    /// Probe the API base URL and report reachability with the observer's metrics.
    pub async fn health_check(&self, ct: &CancellationToken) -> Value {
        let invoker = &self.inner.invoker;
        let (healthy, message) = match invoker.probe(ct).await {
            Ok(status) if status < 400 => (true, "API is reachable".to_string()),
            Ok(status) => (false, format!("API returned status code {status}")),
            Err(reason) => (false, format!("error connecting to API: {reason}")),
        };
        let status = if healthy { "healthy" } else { "unhealthy" };
        if !healthy {
            tracing::warn!(api = %self.inner.api_name, %message, "health check failed");
        }
        json!({
            "server": {
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "api": {
                "name": self.inner.api_name,
                "status": status,
                "message": message,
                "baseUrl": invoker.base_url(),
            },
            "metrics": invoker.observer().summary(),
        })
    }

    /// Invoke a tool by name.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::UnknownTool`] or any per-call error from the invoker.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Option<&JsonObject>,
        ct: CancellationToken,
    ) -> Result<InvocationResult> {
        let tool = self
            .descriptor(name)
            .ok_or_else(|| OpenApiToolsError::UnknownTool(name.to_string()))?;
        self.inner.invoker.invoke(tool, arguments, ct).await
    }

    /// Invoke a tool and render the outcome as an MCP result.
    ///
    /// Failures of the call itself come back as an error result (`is_error: true`) so the caller
    /// sees the message.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::UnknownTool`] only.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<&JsonObject>,
        ct: CancellationToken,
    ) -> Result<CallToolResult> {
        if name == HEALTH_CHECK_TOOL {
            let report = self.health_check(&ct).await;
            return Ok(CallToolResult {
                content: vec![Content::text(report.to_string())],
                structured_content: Some(report),
                is_error: Some(false),
                meta: None,
            });
        }
        let tool = self
            .descriptor(name)
            .ok_or_else(|| OpenApiToolsError::UnknownTool(name.to_string()))?;

        match self.inner.invoker.invoke(tool, arguments, ct).await {
            Ok(result) => Ok(render_result(tool, result)),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}

fn health_check_tool() -> Tool {
    let mut tool = Tool::new(
        HEALTH_CHECK_TOOL,
        "Check that the API is reachable and report call metrics for this server.",
        Arc::new(JsonObject::from_iter([(
            "type".to_string(),
            Value::String("object".to_string()),
        )])),
    );
    tool.annotations = Some(annotations_for_method(
        &Method::GET,
        Some("Health check".to_string()),
    ));
    tool
}

fn render_result(tool: &ToolDescriptor, result: InvocationResult) -> CallToolResult {
    if let ResponseBody::Binary { mime_type, data } = &result.body
        && result.body.is_image()
    {
        let b64 = base64::engine::general_purpose::STANDARD.encode(data);
        return CallToolResult {
            content: vec![Content::image(b64, mime_type.clone())],
            structured_content: None,
            is_error: Some(false),
            meta: None,
        };
    }

    let body = result.body.to_json();
    if tool.output_schema.is_some() {
        let structured = json!({ "body": body });
        let text = structured.to_string();
        return CallToolResult {
            content: vec![Content::text(text)],
            structured_content: Some(structured),
            is_error: Some(false),
            meta: None,
        };
    }

    let text = match body {
        Value::String(s) => s,
        other => other.to_string(),
    };
    CallToolResult::success(vec![Content::text(text)])
}

/// The configured base URL, else the spec's first server. Relative server URLs are resolved
/// against the spec URL.
fn resolve_base_url(config: &ApiConfig, spec: &NormalizedSpec) -> Result<String> {
    let candidate = config
        .base_url
        .clone()
        .or_else(|| spec.servers.first().cloned())
        .ok_or_else(|| {
            OpenApiToolsError::Config(
                "no base URL configured and the spec declares no servers".to_string(),
            )
        })?;

    if candidate.starts_with("http://") || candidate.starts_with("https://") {
        Url::parse(&candidate)
            .map_err(|e| OpenApiToolsError::Config(format!("invalid base URL '{candidate}': {e}")))?;
        return Ok(candidate);
    }

    if config.spec.starts_with("http://") || config.spec.starts_with("https://") {
        let mut spec_url = Url::parse(&config.spec).map_err(|e| {
            OpenApiToolsError::Config(format!("invalid spec URL '{}': {e}", config.spec))
        })?;
        spec_url.set_fragment(None);
        let resolved = spec_url.join(&candidate).map_err(|e| {
            OpenApiToolsError::Config(format!(
                "invalid base URL '{candidate}': {e} (set the base URL explicitly)"
            ))
        })?;
        return Ok(resolved.to_string());
    }

    Err(OpenApiToolsError::Config(format!(
        "invalid base URL '{candidate}': must be an absolute http(s) URL (set the base URL explicitly)"
    )))
}
