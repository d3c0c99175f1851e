//! HTTP API for health checks, status, and monitoring

use crate::config::ApiConfig;
use crate::error::TccResult;
use crate::recovery::WorkerState;
use crate::runtime::TccRuntime;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<TccRuntime>,
}

/// Build the API router
pub fn router(runtime: Arc<TccRuntime>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { runtime })
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, runtime: Arc<TccRuntime>) -> TccResult<()> {
    let app = router(runtime);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - the recovery worker must still be active
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let worker = state.runtime.worker();
    let response = ReadinessResponse {
        ready: worker.current_active(),
        recovery: worker.state(),
        recovery_initialized: worker.is_initialized(),
    };

    let status = if response.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

/// Get coordinator status
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let runtime = &state.runtime;

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoint: runtime.endpoint().identifier().to_string(),
        recovery: runtime.worker().state(),
        stateful_resolution: runtime.resolver().is_stateful(),
        active_contexts: runtime.registry().active_contexts(),
        cached_participants: runtime.resolver().cached_participants(),
        remote_nodes: runtime.directory().len(),
        recorded_affinities: runtime.affinities().len(),
    })
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    recovery: WorkerState,
    recovery_initialized: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    endpoint: String,
    recovery: WorkerState,
    stateful_resolution: bool,
    active_contexts: usize,
    cached_participants: usize,
    remote_nodes: usize,
    recorded_affinities: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::recovery::MockTransactionRecovery;
    use crate::routing::StaticServerList;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn runtime() -> Arc<TccRuntime> {
        let settings = Settings::from_toml_str(
            r#"
            [coordinator]
            application_name = "orderSvc"
            host = "10.0.0.7"
            port = 8080
        "#,
        )
        .unwrap();
        Arc::new(
            TccRuntime::new(
                settings,
                Arc::new(MockTransactionRecovery::new()),
                Arc::new(StaticServerList::new()),
            )
            .unwrap(),
        )
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_status_reports_runtime() {
        let runtime = runtime();
        runtime
            .resolver()
            .resolve("10.0.0.9:stockSvc:7000")
            .unwrap();

        let (status, body) = get_json(router(runtime), "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["endpoint"], "10.0.0.7:orderSvc:8080");
        assert_eq!(body["recovery"], "uninitialized");
        assert_eq!(body["cached_participants"], 1);
        assert_eq!(body["remote_nodes"], 1);
    }

    #[tokio::test]
    async fn test_ready_until_released() {
        let runtime = runtime();

        let (status, body) = get_json(router(runtime.clone()), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);

        runtime.worker().release();
        let (status, body) = get_json(router(runtime), "/ready").await;
        // still inside the grace period
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recovery"], "stopping");
    }
}
