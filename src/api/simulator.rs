//! Simulator Endpoints
//!
//! Drives the in-memory storage cluster from outside: node churn and
//! utilization changes, so the control loop can be watched reacting.

use super::rest::ApiErrorResponse;
use crate::config::Class;
use crate::error::Error;
use crate::storage::FakeStorage;
use crate::topology::StorageNode;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// New node request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAddRequest {
    pub instance_id: String,
    #[serde(default)]
    pub zone: String,
}

/// Utilization change request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtilizationRequest {
    pub class: String,
    pub utilization: u32,
}

#[derive(Clone)]
struct SimState {
    storage: Arc<FakeStorage>,
}

/// Routes under `/sim` over a fake storage system
pub fn routes(storage: Arc<FakeStorage>) -> Router {
    Router::new()
        .route("/sim/nodes", post(node_add))
        .route("/sim/nodes/:id", delete(node_delete))
        .route("/sim/nodes/:id/utilization", put(set_node_utilization))
        .route("/sim/utilization", put(set_utilization))
        .with_state(SimState { storage })
}

fn rejected(status: StatusCode, err: &Error) -> Response {
    (
        status,
        Json(ApiErrorResponse {
            error: "simulator_rejected".into(),
            message: err.to_string(),
            details: None,
        }),
    )
        .into_response()
}

fn check_utilization(utilization: u32) -> Option<Response> {
    (utilization > 100).then(|| {
        rejected(
            StatusCode::BAD_REQUEST,
            &Error::Configuration(format!("utilization {} is above 100", utilization)),
        )
    })
}

async fn node_add(State(state): State<SimState>, Json(req): Json<NodeAddRequest>) -> Response {
    let mut node = StorageNode::new(req.instance_id);
    node.metadata.zone = req.zone;
    if let Err(e) = node.verify() {
        return rejected(StatusCode::BAD_REQUEST, &e);
    }

    let id = node.id().to_string();
    match state.storage.node_add(node) {
        Ok(()) => {
            info!(node = %id, "Simulated node added");
            (StatusCode::CREATED, Json(state.storage.topology().node(&id).cloned())).into_response()
        }
        Err(e) => rejected(StatusCode::CONFLICT, &e),
    }
}

async fn node_delete(State(state): State<SimState>, Path(id): Path<String>) -> Response {
    match state.storage.node_delete(&id) {
        Ok(node) => {
            info!(node = %id, devices = node.devices.len(), "Simulated node deleted");
            (StatusCode::OK, Json(node)).into_response()
        }
        Err(e) => rejected(StatusCode::NOT_FOUND, &e),
    }
}

async fn set_utilization(
    State(state): State<SimState>,
    Json(req): Json<UtilizationRequest>,
) -> Response {
    if let Some(resp) = check_utilization(req.utilization) {
        return resp;
    }
    state
        .storage
        .set_utilization(&Class::named(req.class.as_str()), req.utilization);
    info!(class = %req.class, utilization = req.utilization, "Simulated utilization set");
    StatusCode::NO_CONTENT.into_response()
}

async fn set_node_utilization(
    State(state): State<SimState>,
    Path(id): Path<String>,
    Json(req): Json<UtilizationRequest>,
) -> Response {
    if let Some(resp) = check_utilization(req.utilization) {
        return resp;
    }
    match state
        .storage
        .set_node_utilization(&id, &Class::named(req.class.as_str()), req.utilization)
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => rejected(StatusCode::NOT_FOUND, &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageProvider;
    use crate::topology::Device;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    async fn send(app: &Router, method: &str, uri: &str, body: &str) -> StatusCode {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        app.clone().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_node_churn() {
        let storage = Arc::new(FakeStorage::with_nodes(["one"]));
        let app = routes(storage.clone());

        assert_eq!(
            send(&app, "POST", "/sim/nodes", r#"{"instanceId":"two","zone":"a"}"#).await,
            StatusCode::CREATED
        );
        assert_eq!(
            send(&app, "POST", "/sim/nodes", r#"{"instanceId":"two"}"#).await,
            StatusCode::CONFLICT
        );
        assert_eq!(
            send(&app, "POST", "/sim/nodes", r#"{"instanceId":""}"#).await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(storage.topology().nodes.len(), 2);
        assert_eq!(storage.topology().node("two").unwrap().metadata.zone, "a");

        assert_eq!(send(&app, "DELETE", "/sim/nodes/one", "").await, StatusCode::OK);
        assert_eq!(send(&app, "DELETE", "/sim/nodes/one", "").await, StatusCode::NOT_FOUND);
        assert!(storage.topology().node("one").is_none());
    }

    #[tokio::test]
    async fn test_utilization_changes() {
        let storage = Arc::new(FakeStorage::with_nodes(["one", "two"]));
        for node in storage.topology().nodes {
            let device = Device {
                id: format!("{}-d", node.id()),
                class: "gp2".into(),
                size_gb: 8,
                ..Default::default()
            };
            storage.device_add(&node, None, vec![device]).await.unwrap();
        }
        let app = routes(storage.clone());
        let gp2 = Class::named("gp2");

        assert_eq!(
            send(&app, "PUT", "/sim/utilization", r#"{"class":"gp2","utilization":80}"#).await,
            StatusCode::NO_CONTENT
        );
        assert_eq!(storage.topology().utilization(&gp2), 80);

        assert_eq!(
            send(&app, "PUT", "/sim/nodes/two/utilization", r#"{"class":"gp2","utilization":20}"#)
                .await,
            StatusCode::NO_CONTENT
        );
        assert_eq!(storage.topology().utilization(&gp2), 50);

        assert_eq!(
            send(&app, "PUT", "/sim/nodes/nine/utilization", r#"{"class":"gp2","utilization":20}"#)
                .await,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            send(&app, "PUT", "/sim/utilization", r#"{"class":"gp2","utilization":101}"#).await,
            StatusCode::BAD_REQUEST
        );
    }
}
