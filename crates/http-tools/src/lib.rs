//! Outbound HTTP plumbing for OpenAPI-backed MCP tools.
//!
//! This crate knows nothing about OpenAPI documents. It provides the pieces a tool invocation
//! needs once it has been turned into a concrete request:
//! - [`request::OutboundRequest`]: the request as plain data
//! - [`auth::AuthProvider`]: credential injection (including Cognito token exchange)
//! - [`cache::ResponseCache`]: a TTL + LRU response cache
//! - [`retry::RetryPolicy`]: exponential backoff for transient failures

pub mod auth;
pub mod cache;
pub mod cognito;
pub mod error;
pub mod request;
pub mod retry;
pub mod safety;
pub mod semantics;
