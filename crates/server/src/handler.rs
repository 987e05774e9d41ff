//! MCP request handling on top of the tool registry.

use openapi_mcp_tools::{OpenApiToolsError, ToolRegistry};
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One instance per MCP session; all of them share the registry.
#[derive(Clone)]
pub struct ApiToolServer {
    registry: ToolRegistry,
    message_timeout: Duration,
    shutdown: CancellationToken,
}

impl ApiToolServer {
    #[must_use]
    pub fn new(registry: ToolRegistry, message_timeout: Duration, shutdown: CancellationToken) -> Self {
        Self {
            registry,
            message_timeout,
            shutdown,
        }
    }

    fn instructions(&self) -> String {
        let spec = self.registry.spec();
        format!(
            "Tools for the {} API (version {}). Each tool calls one HTTP operation at {}.",
            spec.title,
            spec.version,
            self.registry.base_url()
        )
    }
}

fn error_result(message: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(message.into())])
}

impl ServerHandler for ApiToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(self.instructions()),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: self.registry.list_tools(),
            ..Default::default()
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let name = request.name.to_string();
        let ct = context.ct.child_token();
        let call = self
            .registry
            .call_tool(&name, request.arguments.as_ref(), ct.clone());

        let outcome = tokio::select! {
            () = self.shutdown.cancelled() => {
                ct.cancel();
                return Ok(error_result(format!("tool '{name}': server is shutting down")));
            }
            r = tokio::time::timeout(self.message_timeout, call) => r,
        };

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e @ OpenApiToolsError::UnknownTool(_))) => {
                Err(McpError::invalid_params(e.to_string(), None))
            }
            Ok(Err(e)) => Ok(error_result(e.to_string())),
            Err(_) => {
                ct.cancel();
                tracing::warn!(tool = %name, "tool call exceeded the message timeout");
                Ok(error_result(format!(
                    "tool '{name}': timed out after {}s",
                    self.message_timeout.as_secs()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openapi_mcp_tools::normalize::{normalize_value, parse_document};
    use openapi_mcp_tools::resolver::DocId;
    use openapi_mcp_tools::{ApiConfig, NoopObserver};
    use std::sync::Arc;

    #[tokio::test]
    async fn server_info_advertises_tools() {
        let doc = parse_document(
            "inline",
            br#"{"openapi":"3.0.3","info":{"title":"Zoo","version":"2"},"paths":{}}"#,
        )
        .unwrap();
        let client = reqwest::Client::new();
        let spec = normalize_value(DocId::File("/virtual/zoo.json".into()), doc, &client)
            .await
            .unwrap();
        let mut cfg = ApiConfig::new("zoo", "/virtual/zoo.json");
        cfg.base_url = Some("http://zoo.test".to_string());
        let registry =
            ToolRegistry::from_spec(&cfg, spec, client, Arc::new(NoopObserver)).unwrap();

        let server = ApiToolServer::new(registry, Duration::from_secs(5), CancellationToken::new());
        let info = server.get_info();
        assert!(info.capabilities.tools.is_some());
        assert_eq!(info.server_info.name, "openapi-mcp-server");
        assert!(info.instructions.unwrap().contains("Zoo"));
    }
}
