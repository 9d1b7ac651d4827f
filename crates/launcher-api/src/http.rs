use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
};
use launcher_core::WorkloadSnapshot;
use launcher_exec::Lifecycle;
use serde::Serialize;

use crate::{error::ApiError, hub::Hub, ws::ws_handler};

/// HTTP / WebSocket service builder.
pub struct HttpApi<L: Lifecycle> {
    hub: Arc<Hub<L>>,
}

impl<L> HttpApi<L>
where
    L: Lifecycle,
{
    pub fn new(hub: Arc<Hub<L>>) -> Self {
        Self { hub }
    }

    /// Build axum router with mounted endpoints.
    ///
    /// Routes:
    /// - GET /ws/{slug} - viewer WebSocket
    /// - GET /api/v1/workloads - list workloads
    /// - GET /api/v1/workloads/{slug} - one workload
    /// - GET /health - liveness
    ///
    /// Serve with `into_make_service_with_connect_info::<SocketAddr>()`; the WebSocket
    /// handler needs the peer address.
    pub fn router(self) -> Router {
        Router::new()
            .route("/ws/{slug}", get(ws_handler::<L>))
            .route("/api/v1/workloads", get(list_workloads::<L>))
            .route("/api/v1/workloads/{slug}", get(get_workload::<L>))
            .route("/health", get(health))
            .with_state(self.hub)
    }
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ListWorkloadsResponse {
    workloads: Vec<WorkloadSnapshot>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/workloads
async fn list_workloads<L>(State(hub): State<Arc<Hub<L>>>) -> impl IntoResponse
where
    L: Lifecycle,
{
    Json(list(&hub))
}

fn list<L: Lifecycle>(hub: &Hub<L>) -> ListWorkloadsResponse {
    let workloads = hub
        .registry()
        .list()
        .iter()
        .map(|w| w.snapshot())
        .collect();
    ListWorkloadsResponse { workloads }
}

/// GET /api/v1/workloads/{slug}
async fn get_workload<L>(
    State(hub): State<Arc<Hub<L>>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    L: Lifecycle,
{
    Ok(Json(snapshot(&hub, &slug)?))
}

fn snapshot<L: Lifecycle>(hub: &Hub<L>, slug: &str) -> Result<WorkloadSnapshot, ApiError> {
    hub.registry()
        .get(slug)
        .map(|w| w.snapshot())
        .ok_or_else(|| ApiError::UnknownWorkload(slug.to_string()))
}

/// GET /health
async fn health() -> &'static str {
    "ok"
}
