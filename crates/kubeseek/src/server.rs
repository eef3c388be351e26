//! HTTP read interface.
//!
//! Every endpoint serves the latest published snapshot. Before the first
//! cycle completes the mappings are empty, never an error.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::store::{HealthView, StatusFacade, StatusView};
use crate::types::{PodIssueReport, Snapshot};

/// Build the HTTP router.
pub fn build_router(facade: Arc<StatusFacade>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/issues", get(issues_handler))
        .route("/snapshot", get(snapshot_handler))
        .route("/healthz", get(liveness_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(facade)
}

/// Serve until `shutdown` is cancelled, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    facade: Arc<StatusFacade>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "HTTP server listening");
    }

    axum::serve(listener, build_router(facade))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Node and namespace health.
async fn health_handler(State(facade): State<Arc<StatusFacade>>) -> Json<HealthView> {
    Json(facade.health_view().await)
}

/// Namespace health only.
async fn status_handler(State(facade): State<Arc<StatusFacade>>) -> Json<StatusView> {
    Json(facade.status_view().await)
}

async fn issues_handler(State(facade): State<Arc<StatusFacade>>) -> Json<Vec<PodIssueReport>> {
    Json(facade.current_pod_issues().await)
}

async fn snapshot_handler(State(facade): State<Arc<StatusFacade>>) -> Json<Snapshot> {
    Json(facade.full_snapshot().await.as_ref().clone())
}

async fn liveness_handler() -> &'static str {
    "ok"
}
