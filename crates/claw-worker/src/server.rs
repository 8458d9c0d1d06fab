//! HTTP surface for the Worker service.
//!
//! Entry validation is the only transport-level rejection: the worktree
//! path must canonicalize under the theater root and carry a `.git`
//! marker. Everything past entry returns HTTP 200 with the domain status
//! in the body.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::runner::{ExecuteRequest, Runner};

pub struct AppState {
    pub runner: Arc<Runner>,
    pub theater_root: PathBuf,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/execute", post(execute_order))
        .with_state(state)
}

pub async fn start_server(
    runner: Arc<Runner>,
    theater_root: PathBuf,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let theater_root = theater_root.canonicalize().unwrap_or(theater_root);
    let state = Arc::new(AppState {
        runner,
        theater_root,
    });
    let router = create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("worker listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Canonicalize and validate the worktree path from a request.
fn validate_worktree_path(
    theater_root: &std::path::Path,
    path: &str,
) -> Result<PathBuf, String> {
    let canonical = PathBuf::from(path)
        .canonicalize()
        .map_err(|_| format!("invalid worktree path: {path}"))?;
    if !canonical.starts_with(theater_root) {
        return Err(format!(
            "invalid worktree path: outside theater root {}",
            theater_root.display()
        ));
    }
    if !canonical.join(".git").exists() {
        return Err("invalid worktree: no .git marker found".to_string());
    }
    Ok(canonical)
}

/// POST /execute - Run one mission attempt.
async fn execute_order(
    State(state): State<Arc<AppState>>,
    Json(mut req): Json<ExecuteRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let canonical = validate_worktree_path(&state.theater_root, &req.worktree_path).map_err(
        |error| {
            warn!(order_id = %req.order_id, "rejecting execute: {error}");
            (StatusCode::BAD_REQUEST, Json(ErrorResponse { error }))
        },
    )?;
    req.worktree_path = canonical.display().to_string();

    let response = state.runner.run(&req).await;
    Ok(Json(response))
}
