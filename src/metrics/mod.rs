//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Recovery passes and their outcomes
//! - Propagated transaction contexts
//! - Participant resolution cache
//! - Affinity routing decisions

use crate::error::{TccError, TccResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec, Encoder, TextEncoder};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref RECOVERY_PASSES: CounterVec = register_counter_vec!(
        "tcc_recovery_passes_total",
        "Recovery passes by kind and outcome",
        &["pass", "outcome"]
    ).unwrap();

    pub static ref CONTEXTS_PROPAGATED: CounterVec = register_counter_vec!(
        "tcc_contexts_propagated_total",
        "Outbound calls that received propagation headers",
        &[]
    ).unwrap();

    pub static ref RESOLVER_CACHE: CounterVec = register_counter_vec!(
        "tcc_resolver_cache_total",
        "Stateless participant resolutions by cache result",
        &["result"]
    ).unwrap();

    pub static ref AFFINITY_DECISIONS: CounterVec = register_counter_vec!(
        "tcc_affinity_decisions_total",
        "Routing decisions by affinity outcome",
        &["decision"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> TccResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    gather().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Render every registered metric in the text exposition format
pub fn gather() -> TccResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TccError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TccError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_recovery_pass(pass: &str, outcome: &str) {
    RECOVERY_PASSES.with_label_values(&[pass, outcome]).inc();
}

pub fn record_context_propagated() {
    CONTEXTS_PROPAGATED.with_label_values(&[]).inc();
}

pub fn record_resolver_cache(hit: bool) {
    RESOLVER_CACHE
        .with_label_values(&[if hit { "hit" } else { "miss" }])
        .inc();
}

pub fn record_affinity_decision(decision: &str) {
    AFFINITY_DECISIONS.with_label_values(&[decision]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_metrics_are_exposed() {
        record_recovery_pass("global", "not_authorized");
        record_affinity_decision("pinned");

        let text = gather().unwrap();
        assert!(text.contains("tcc_recovery_passes_total"));
        assert!(text.contains("outcome=\"not_authorized\""));
        assert!(text.contains("tcc_affinity_decisions_total"));
    }
}
