#![allow(dead_code)]

use anyhow::Context as _;
use futures::StreamExt as _;
use serde_json::json;
use std::path::Path;
use std::process::{Child, Command};
use std::time::Duration;
use tokio::io::AsyncBufReadExt as _;
use tokio_util::io::StreamReader;

pub use openapi_mcp_test_support::{KillOnDrop, pick_unused_port, spawn_router, wait_http_ok};

/// Start the server binary for a spec file, pointing at `base_url`.
pub fn spawn_server(
    spec_path: &Path,
    base_url: &str,
    port: u16,
    extra: &[(&str, &str)],
) -> anyhow::Result<Child> {
    let bin = env!("CARGO_BIN_EXE_openapi-mcp-server");
    let mut cmd = Command::new(bin);
    cmd.env_clear()
        .env("API_NAME", "fake")
        .env("API_SPEC_PATH", spec_path)
        .env("API_BASE_URL", base_url)
        .env("SERVER_HOST", "127.0.0.1")
        .env("SERVER_PORT", port.to_string())
        .env("RETRY_MIN_DELAY_MS", "1")
        .arg("--log-level")
        .arg("info");
    for (k, v) in extra {
        cmd.env(k, v);
    }
    cmd.spawn().context("spawn server")
}

/// Minimal MCP client for the streamable HTTP endpoint (`/mcp`).
pub struct McpSession {
    client: reqwest::Client,
    endpoint: String,
    session_id: String,
}

impl McpSession {
    pub async fn connect(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::new();
        let endpoint = format!("{}/mcp", base_url.trim_end_matches('/'));

        let init_resp = post_mcp(
            &client,
            &endpoint,
            None,
            json!({
                "jsonrpc": "2.0",
                "id": 0,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": { "name": "openapi-mcp-server-tests", "version": "0" }
                }
            }),
        )
        .await?;

        let session_id = init_resp
            .headers()
            .get("Mcp-Session-Id")
            .and_then(|h| h.to_str().ok())
            .context("missing Mcp-Session-Id header")?
            .to_string();

        let init_msg = read_first_event_stream_json_message(init_resp).await?;
        anyhow::ensure!(init_msg.get("id") == Some(&json!(0)), "unexpected init id");

        let initialized = post_mcp(
            &client,
            &endpoint,
            Some(&session_id),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .await?;
        anyhow::ensure!(
            initialized.status().as_u16() == 202,
            "notifications/initialized returned {}",
            initialized.status()
        );

        Ok(Self {
            client,
            endpoint,
            session_id,
        })
    }

    pub async fn request(
        &self,
        id: u64,
        method: &str,
        params: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let resp = post_mcp(
            &self.client,
            &self.endpoint,
            Some(&self.session_id),
            json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }),
        )
        .await?;

        tokio::time::timeout(
            Duration::from_secs(20),
            read_first_event_stream_json_message(resp),
        )
        .await
        .context("timeout waiting for event-stream response")?
    }

    pub async fn call_tool(
        &self,
        id: u64,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        self.request(
            id,
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        )
        .await
    }
}

async fn post_mcp(
    client: &reqwest::Client,
    endpoint: &str,
    session_id: Option<&str>,
    body: serde_json::Value,
) -> anyhow::Result<reqwest::Response> {
    let mut req = client
        .post(endpoint)
        .header("Accept", "application/json, text/event-stream")
        .header("Content-Type", "application/json")
        .json(&body);
    if let Some(session_id) = session_id {
        req = req.header("Mcp-Session-Id", session_id);
    }
    req.send()
        .await
        .context("POST mcp")?
        .error_for_status()
        .context("POST mcp status")
}

async fn read_first_event_stream_json_message(
    resp: reqwest::Response,
) -> anyhow::Result<serde_json::Value> {
    let mut stream = resp.bytes_stream();
    let byte_stream = futures::stream::poll_fn(move |cx| stream.poll_next_unpin(cx))
        .map(|r| r.map_err(std::io::Error::other));
    let reader = StreamReader::new(byte_stream);
    let mut lines = tokio::io::BufReader::new(reader).lines();

    let mut data_lines: Vec<String> = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end().to_string();
        if line.is_empty() {
            if data_lines.is_empty() {
                continue;
            }
            let data = data_lines.join("\n");
            if data.is_empty() {
                // SSE priming event (empty `data:`), not a JSON-RPC message.
                data_lines.clear();
                continue;
            }
            return serde_json::from_str(&data).context("parse event-stream data as JSON");
        }
        if let Some(v) = line.strip_prefix("data:") {
            data_lines.push(v.trim().to_string());
        }
    }

    anyhow::bail!("event-stream ended without a JSON message")
}
