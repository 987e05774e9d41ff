//! `OpenAPI` 3.x / Swagger 2.0 -> MCP tools.
//!
//! The pipeline runs once at startup: [`normalize::load_spec`] fetches and normalizes the document,
//! [`synth::synthesize`] turns each operation into a tool, and [`registry::ToolRegistry`] ties the
//! tools to an [`invoke::Invoker`] that executes calls (auth, retries, caching).

pub mod config;
pub mod descriptor;
pub mod error;
pub mod invoke;
pub mod naming;
pub mod normalize;
pub mod registry;
pub mod resolver;
pub mod swagger;
pub mod synth;
pub mod validate;

pub use config::{ApiConfig, HashPolicy};
pub use descriptor::{NormalizedSpec, OperationDescriptor};
pub use error::{OpenApiToolsError, Result};
pub use invoke::{CallEvent, CallObserver, InvocationResult, Invoker, NoopObserver, ResponseBody};
pub use registry::ToolRegistry;
pub use synth::ToolDescriptor;
