//! REST API Handlers
//!
//! Operator endpoints over the reconciliation manager: lifecycle control,
//! on-demand passes, configuration and a view of the cluster.

use crate::config::Config;
use crate::error::Error;
use crate::manager::{Manager, ManagerState, PassReport};
use crate::storage::FakeStorage;
use crate::topology::StorageNode;
use axum::{
    extract::{Json, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::simulator;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Manager status response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub state: ManagerState,
    pub classes: usize,
    pub allocator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pass: Option<PassReport>,
}

/// Lifecycle change response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    pub state: ManagerState,
}

/// Usage of one class across the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassUsage {
    pub class: String,
    pub utilization: u32,
    pub total_size_gb: u64,
    pub minimum_total_size_gb: u64,
    pub maximum_total_size_gb: u64,
}

/// Cluster topology response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyResponse {
    pub nodes: Vec<StorageNode>,
    pub devices: usize,
    pub classes: Vec<ClassUsage>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    manager: Arc<Manager>,
    simulator: Option<Arc<FakeStorage>>,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(manager: Arc<Manager>) -> Self {
        Self {
            manager,
            simulator: None,
        }
    }

    /// Also serve the `/sim` endpoints over an in-memory storage system
    pub fn with_simulator(mut self, storage: Arc<FakeStorage>) -> Self {
        self.simulator = Some(storage);
        self
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            manager: self.manager,
        };

        let mut router = Router::new()
            // Lifecycle endpoints
            .route("/v1/status", get(get_status))
            .route("/v1/start", post(start_manager))
            .route("/v1/stop", post(stop_manager))
            // Pass endpoints
            .route("/v1/reconcile", post(reconcile_now))
            .route("/v1/trigger", post(trigger_pass))
            // Configuration endpoints
            .route("/v1/config", get(get_config).put(put_config))
            // Cluster view
            .route("/v1/topology", get(get_topology))
            // Metrics endpoint
            .route("/metrics", get(get_metrics))
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .with_state(state);

        if let Some(storage) = self.simulator {
            router = router.merge(simulator::routes(storage));
        }

        router
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    manager: Arc<Manager>,
}

fn error_response(status: StatusCode, code: &str, err: &Error) -> Response {
    (
        status,
        Json(ApiErrorResponse {
            error: code.into(),
            message: err.to_string(),
            details: Some(format!("{:?}", err.action())),
        }),
    )
        .into_response()
}

// =============================================================================
// Handlers
// =============================================================================

/// Manager status and last pass
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let manager = &state.manager;
    (
        StatusCode::OK,
        Json(StatusResponse {
            state: manager.state(),
            classes: manager.config().classes.len(),
            allocator: manager.options().allocator.to_string(),
            last_pass: manager.last_report(),
        }),
    )
}

/// Start the control loop
async fn start_manager(State(state): State<AppState>) -> Response {
    match state.manager.start() {
        Ok(()) => (
            StatusCode::OK,
            Json(StateResponse {
                state: state.manager.state(),
            }),
        )
            .into_response(),
        Err(e @ Error::AlreadyRunning) => error_response(StatusCode::CONFLICT, "already_running", &e),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "start_failed", &e),
    }
}

/// Stop the control loop
async fn stop_manager(State(state): State<AppState>) -> impl IntoResponse {
    state.manager.stop();
    (
        StatusCode::OK,
        Json(StateResponse {
            state: state.manager.state(),
        }),
    )
}

/// Run a pass and wait for it
async fn reconcile_now(State(state): State<AppState>) -> Response {
    info!("Reconciliation requested through the API");
    let result = state.manager.reconcile().await;
    let report = state.manager.last_report();

    match result {
        Ok(()) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            error!("Reconciliation failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "reconcile_failed", &e)
        }
    }
}

/// Queue a pass on the running loop
async fn trigger_pass(State(state): State<AppState>) -> Response {
    if state.manager.trigger() {
        (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "triggered" })),
        )
            .into_response()
    } else {
        (
            StatusCode::CONFLICT,
            Json(ApiErrorResponse {
                error: "not_running".into(),
                message: "Manager is stopped".into(),
                details: None,
            }),
        )
            .into_response()
    }
}

/// Current configuration
async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.manager.config()))
}

/// Replace the configuration
async fn put_config(State(state): State<AppState>, Json(config): Json<Config>) -> Response {
    match state.manager.set_config(config) {
        Ok(()) => (StatusCode::OK, Json(state.manager.config())).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, "invalid_config", &e),
    }
}

/// Nodes, devices and per-class usage
async fn get_topology(State(state): State<AppState>) -> Response {
    let topology = match state.manager.topology().await {
        Ok(topology) => topology,
        Err(e) => return error_response(StatusCode::BAD_GATEWAY, "topology_unavailable", &e),
    };

    let classes = state
        .manager
        .config()
        .classes
        .iter()
        .map(|c| ClassUsage {
            class: c.name.clone(),
            utilization: topology.utilization(c),
            total_size_gb: topology.total_storage(c),
            minimum_total_size_gb: c.minimum_total_size_gb,
            maximum_total_size_gb: c.maximum_total_size_gb,
        })
        .collect();

    (
        StatusCode::OK,
        Json(TopologyResponse {
            devices: topology.num_devices(),
            nodes: topology.nodes,
            classes,
        }),
    )
        .into_response()
}

/// Prometheus exposition
async fn get_metrics(State(state): State<AppState>) -> Response {
    match state.manager.metrics().render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics_failed", &e),
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.manager.is_running() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "manager stopped")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::FakeCloud;
    use crate::config::Class;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> (Router, Arc<Manager>) {
        let class = Class {
            name: "gp2".into(),
            watermark_high: 75,
            watermark_low: 25,
            disk_size_gb: 8,
            maximum_total_size_gb: 1024,
            minimum_total_size_gb: 32,
            ..Default::default()
        };
        let manager = Manager::new(
            Config::new(vec![class]),
            Arc::new(FakeCloud::new()),
            Arc::new(FakeStorage::with_nodes(["one", "two"])),
        )
        .unwrap();
        (RestRouter::new(manager.clone()).build(), manager)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<String>) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_and_readiness() {
        let (app, manager) = router();
        assert_eq!(send(&app, "GET", "/health", None).await.0, StatusCode::OK);
        assert_eq!(
            send(&app, "GET", "/ready", None).await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );

        manager.start().unwrap();
        assert_eq!(send(&app, "GET", "/ready", None).await.0, StatusCode::OK);
        manager.stop();
    }

    #[tokio::test]
    async fn test_lifecycle_endpoints() {
        let (app, manager) = router();

        let (status, _) = send(&app, "POST", "/v1/trigger", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app, "POST", "/v1/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("running"));

        let (status, body) = send(&app, "POST", "/v1/start", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body.contains("already_running"));

        assert_eq!(send(&app, "POST", "/v1/trigger", None).await.0, StatusCode::ACCEPTED);

        let (status, body) = send(&app, "POST", "/v1/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("stopped"));
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_reconcile_and_status() {
        let (app, _) = router();
        let (status, body) = send(&app, "POST", "/v1/reconcile", None).await;
        assert_eq!(status, StatusCode::OK);
        let report: PassReport = serde_json::from_str(&body).unwrap();
        assert_eq!(report.devices_added(), 1);

        let (_, body) = send(&app, "GET", "/v1/status", None).await;
        let status: StatusResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(status.state, ManagerState::Stopped);
        assert_eq!(status.allocator, "round-robin");
        assert!(status.last_pass.is_some());

        let (_, body) = send(&app, "GET", "/v1/topology", None).await;
        let topology: TopologyResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(topology.devices, 1);
        assert_eq!(topology.classes[0].total_size_gb, 8);

        let (status, body) = send(&app, "GET", "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("autoscaler_reconcile_passes_total 1"));
    }

    #[tokio::test]
    async fn test_simulator_routes_only_when_enabled() {
        let (app, _) = router();
        let (status, _) = send(&app, "POST", "/sim/nodes", Some(r#"{"instanceId":"x"}"#.into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let storage = Arc::new(FakeStorage::with_nodes(["one"]));
        let manager = Manager::new(
            Config::new(vec![]),
            Arc::new(FakeCloud::new()),
            storage.clone(),
        )
        .unwrap();
        let app = RestRouter::new(manager).with_simulator(storage.clone()).build();

        let (status, _) = send(&app, "POST", "/sim/nodes", Some(r#"{"instanceId":"two"}"#.into())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, body) = send(&app, "GET", "/v1/topology", None).await;
        let topology: TopologyResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(topology.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_config_endpoints() {
        let (app, manager) = router();
        let (status, body) = send(&app, "GET", "/v1/config", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("watermarkHigh"));

        let bad = r#"{"classes":[{"name":"gp2","watermarkHigh":10,"watermarkLow":20,"maximumTotalSize":8,"minimumTotalSize":0,"diskSize":8}]}"#;
        let (status, body) = send(&app, "PUT", "/v1/config", Some(bad.into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("invalid_config"));

        let good = r#"{"classes":[{"name":"st1","watermarkHigh":80,"watermarkLow":20,"maximumTotalSize":64,"minimumTotalSize":0,"diskSize":16}]}"#;
        let (status, _) = send(&app, "PUT", "/v1/config", Some(good.into())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(manager.config().classes[0].name, "st1");
    }
}
