//! anchor-api — REST API for the Anchor scheduler.
//!
//! Provides axum route handlers for admitting pods, reading workload
//! records, accepting execution-status reports from node agents, feeding
//! node updates to the cluster state cache, and inspecting the queue.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/pods` | Admit a pod for scheduling |
//! | GET | `/api/v1/pods?namespace=` | List pods, newest first |
//! | GET | `/api/v1/pods/{id}` | Get one pod |
//! | DELETE | `/api/v1/pods/{id}` | Delete a pod record |
//! | PATCH | `/api/v1/pods/{id}/status` | Execution-status report |
//! | GET | `/api/v1/nodes` | Cached node snapshots |
//! | POST | `/api/v1/nodes/updates` | Publish a node update |
//! | GET | `/api/v1/nodes/{id}/assignments` | Assignment stream for a node agent (SSE) |
//! | GET | `/api/v1/queue` | Scheduling job counts |
//! | GET | `/healthz` | Readiness (cache hydrated) |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};

use anchor_scheduler::{ClusterStateCache, SchedulerController, UpdateBus};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<SchedulerController>,
    pub cache: Arc<ClusterStateCache>,
    pub updates: UpdateBus,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/pods", get(handlers::list_pods).post(handlers::create_pod))
        .route("/pods/{id}", get(handlers::get_pod).delete(handlers::delete_pod))
        .route("/pods/{id}/status", patch(handlers::report_status))
        .route("/nodes", get(handlers::list_nodes))
        .route("/nodes/updates", post(handlers::publish_node_update))
        .route("/nodes/{id}/assignments", get(handlers::watch_assignments))
        .route("/queue", get(handlers::queue_counts))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz).with_state(state))
}
