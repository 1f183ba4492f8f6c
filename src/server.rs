//! Keep-alive and status HTTP surface.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

use crate::error::{Error, Result};
use crate::liveness::Liveness;
use crate::scheduler::SharedStatus;

const SERVICE_NAME: &str = "YouTube Shorts Automation";

#[derive(Clone)]
pub struct AppState {
    pub liveness: Liveness,
    pub scheduler: SharedStatus,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(liveness: Liveness, scheduler: SharedStatus) -> Self {
        Self {
            liveness,
            scheduler,
            start_time: Instant::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(keep_alive))
        .route("/api/health", get(health))
        .route("/api/scheduler/status", get(scheduler_status))
        .fallback(not_found)
        .with_state(state)
}

/// Always 200, so an uptime monitor never sees a long run as a dead process.
async fn keep_alive(State(state): State<AppState>) -> impl IntoResponse {
    let processing = state.liveness.snapshot();
    let body = if processing.is_processing {
        let task = processing.current_task.unwrap_or_default();
        json!({
            "status": "processing",
            "service": SERVICE_NAME,
            "current_task": task,
            "started_at": processing.started_at,
            "message": format!("Currently processing: {task}"),
        })
    } else {
        json!({
            "status": "alive",
            "service": SERVICE_NAME,
            "message": "Server is running",
        })
    };
    (StatusCode::OK, Json(body))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let processing = state.liveness.snapshot();
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "is_processing": processing.is_processing,
        "current_task": processing.current_task,
    }))
}

async fn scheduler_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.read().clone())
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Not found", "status": 404 })),
    )
}

/// Serves until `shutdown` resolves.
pub async fn serve<S>(state: AppState, bind_address: &str, port: u16, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{bind_address}:{port}")
        .parse()
        .map_err(|e| Error::config(format!("Invalid address {bind_address}:{port}: {e}")))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Keep-alive server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;
    Ok(())
}
