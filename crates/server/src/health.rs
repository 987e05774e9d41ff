//! Call metrics and the `/health` endpoint.

use axum::Json;
use axum::extract::State;
use openapi_mcp_tools::{CallEvent, CallObserver, ToolRegistry};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters fed by every tool call.
#[derive(Debug, Default)]
pub struct CallMetrics {
    total: AtomicU64,
    errors: AtomicU64,
    cache_hits: AtomicU64,
    retries: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_calls: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub cache_hits: u64,
    pub retries: u64,
}

impl CallMetrics {
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_calls = self.total.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let error_rate = if total_calls == 0 {
            0.0
        } else {
            errors as f64 / total_calls as f64
        };
        MetricsSnapshot {
            total_calls,
            errors,
            error_rate,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

impl CallObserver for CallMetrics {
    fn on_call(&self, event: &CallEvent<'_>) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if !event.success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        if event.cached {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        self.retries.fetch_add(
            u64::from(event.attempts.saturating_sub(1)),
            Ordering::Relaxed,
        );
    }

    fn summary(&self) -> Option<Value> {
        serde_json::to_value(self.snapshot()).ok()
    }
}

#[derive(Clone)]
pub struct HealthState {
    pub registry: ToolRegistry,
    pub metrics: Arc<CallMetrics>,
}

pub async fn health(State(state): State<HealthState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "api": state.registry.api_name(),
        "title": state.registry.spec().title,
        "tools": state.registry.descriptors().len(),
        "metrics": state.metrics.snapshot(),
    }))
}
