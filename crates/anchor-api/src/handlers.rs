//! REST API handlers.
//!
//! Each handler goes through the `SchedulerController`, the cluster state
//! cache or the update bus and returns a JSON envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use tracing::{debug, warn};

use anchor_scheduler::{SchedulerError, StatusReport};
use anchor_state::WorkloadSpec;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn scheduler_error(e: &SchedulerError) -> axum::response::Response {
    let status = match e {
        SchedulerError::WorkloadVanished(_) | SchedulerError::JobNotFound(_) => StatusCode::NOT_FOUND,
        SchedulerError::InvalidUpdate(_) => StatusCode::BAD_REQUEST,
        SchedulerError::CacheNotReady => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

// ── Pods ───────────────────────────────────────────────────────

/// POST /api/v1/pods
pub async fn create_pod(
    State(state): State<ApiState>,
    Json(spec): Json<WorkloadSpec>,
) -> impl IntoResponse {
    match state.controller.schedule_pod(spec) {
        Ok(record) => (StatusCode::CREATED, ApiResponse::ok(record)).into_response(),
        Err(e) => scheduler_error(&e),
    }
}

/// Query parameters for pod listing.
#[derive(Debug, Default, Deserialize)]
pub struct PodQuery {
    pub namespace: Option<String>,
}

/// GET /api/v1/pods
pub async fn list_pods(
    State(state): State<ApiState>,
    Query(query): Query<PodQuery>,
) -> impl IntoResponse {
    match state.controller.list_pods(query.namespace.as_deref()) {
        Ok(pods) => ApiResponse::ok(pods).into_response(),
        Err(e) => scheduler_error(&e),
    }
}

/// GET /api/v1/pods/:id
pub async fn get_pod(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.controller.get_pod(&id) {
        Ok(Some(record)) => ApiResponse::ok(record).into_response(),
        Ok(None) => error_response("pod not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => scheduler_error(&e),
    }
}

/// DELETE /api/v1/pods/:id
pub async fn delete_pod(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.controller.delete_pod(&id) {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => error_response("pod not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => scheduler_error(&e),
    }
}

/// PATCH /api/v1/pods/:id/status
pub async fn report_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(report): Json<StatusReport>,
) -> impl IntoResponse {
    match state.controller.report_status(&id, report) {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => scheduler_error(&e),
    }
}

// ── Nodes ──────────────────────────────────────────────────────

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.cache.all_nodes().await)
}

/// POST /api/v1/nodes/updates
///
/// Body is a raw wire update, e.g.
/// `{"type":"NODE_METRICS","nodeId":"n1","metrics":{"cpuUsagePercent":40}}`.
pub async fn publish_node_update(State(state): State<ApiState>, body: String) -> impl IntoResponse {
    match state.updates.publish_json(&body) {
        Ok(receivers) => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(serde_json::json!({ "receivers": receivers })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "rejected node update");
            scheduler_error(&e)
        }
    }
}

/// Event name carried by assignment stream messages.
pub const ASSIGNMENT_EVENT: &str = "pod_start";

/// GET /api/v1/nodes/:id/assignments
///
/// Registers the node's private channel and streams each `PodAssignment`
/// as a `pod_start` event. Disconnecting closes the channel.
pub async fn watch_assignments(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = state.controller.channels().register(&node_id).await;
    debug!(%node_id, "assignment stream opened");
    let events = stream::unfold(rx, |mut rx| async move {
        let assignment = rx.recv().await?;
        let event = Event::default().event(ASSIGNMENT_EVENT).json_data(&assignment);
        Some((event, rx))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

// ── Queue / health ─────────────────────────────────────────────

/// GET /api/v1/queue
pub async fn queue_counts(State(state): State<ApiState>) -> impl IntoResponse {
    match state.controller.queue().counts() {
        Ok(counts) => ApiResponse::ok(counts).into_response(),
        Err(e) => scheduler_error(&e),
    }
}

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    if state.cache.is_ready() {
        ApiResponse::ok(serde_json::json!({
            "status": "ok",
            "nodes": state.cache.len().await,
        }))
        .into_response()
    } else {
        error_response("cluster state not hydrated", StatusCode::SERVICE_UNAVAILABLE).into_response()
    }
}
