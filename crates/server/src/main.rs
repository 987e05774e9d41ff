//! Serve an `OpenAPI`/Swagger described API as MCP tools over streamable HTTP.

mod config;
mod error;
mod handler;
mod health;

use crate::config::{Args, LogFormat};
use crate::handler::ApiToolServer;
use crate::health::{CallMetrics, HealthState, health};
use anyhow::Context as _;
use axum::Router;
use axum::routing::get;
use clap::Parser;
use openapi_mcp_tools::ToolRegistry;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let config = args.api_config()?;
    tracing::info!(api = %config.name, spec = %config.spec, auth = config.auth.kind(), "starting");

    let client = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("build HTTP client")?;

    let metrics = Arc::new(CallMetrics::default());
    let registry = ToolRegistry::build(&config, client, metrics.clone())
        .await
        .map_err(error::ServerError::from)?;

    let shutdown = CancellationToken::new();
    let server = ApiToolServer::new(registry.clone(), args.message_timeout(), shutdown.clone());
    let mcp = StreamableHttpService::new(
        move || Ok(server.clone()),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig::default(),
    );

    let path = mount_path(&args.path);
    let app = Router::new()
        .route("/health", get(health))
        .with_state(HealthState { registry, metrics });
    let app = if path == "/" {
        app.fallback_service(mcp)
    } else {
        app.nest_service(&path, mcp)
    };

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(error::ServerError::from)
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, %path, "serving MCP over streamable HTTP");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {e}");
                return;
            }
            tracing::info!("shutting down");
            shutdown.cancel();
        })
        .await
        .context("serve")?;

    Ok(())
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.effective_log_level()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match args.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// `mcp` and `/mcp/` both mount at `/mcp`.
fn mount_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    format!("/{trimmed}")
}
