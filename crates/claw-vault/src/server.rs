//! HTTP surface for the Vault service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::manager::{VaultError, WorktreeManager};

pub struct AppState {
    pub manager: Arc<WorktreeManager>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/worktrees", post(create_worktree))
        .route("/worktrees/{theater}/{order_id}", get(get_worktree))
        .route(
            "/worktrees/{theater}/{order_id}/archive",
            post(archive_worktree),
        )
        .route(
            "/worktrees/{theater}/{order_id}/remove",
            post(remove_worktree),
        )
        .with_state(state)
}

pub async fn start_server(
    manager: Arc<WorktreeManager>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = Arc::new(AppState { manager });
    let router = create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("vault listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn map_error(e: VaultError) -> (StatusCode, Json<ErrorResponse>) {
    let status = if e.is_validation() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    warn!("vault error: {e}");
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn default_base_ref() -> String {
    "master".to_string()
}

/// Request body for POST /worktrees.
#[derive(Debug, Deserialize)]
pub struct WorktreeCreateRequest {
    pub theater: String,
    pub order_id: String,
    #[serde(default = "default_base_ref")]
    pub base_ref: String,
}

/// Response for worktree creation and status queries.
#[derive(Debug, Serialize)]
pub struct WorktreeResponse {
    pub order_id: String,
    pub path: String,
    pub exists: bool,
    pub created: bool,
}

/// Response for POST .../archive.
#[derive(Debug, Serialize)]
pub struct ArchiveResponse {
    pub order_id: String,
    pub archive_path: String,
    pub success: bool,
}

/// POST /worktrees - Provision a worktree; existing is a no-op.
async fn create_worktree(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WorktreeCreateRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let (path, created) = state
        .manager
        .create(&req.theater, &req.order_id, &req.base_ref)
        .map_err(map_error)?;
    Ok(Json(WorktreeResponse {
        order_id: req.order_id,
        path: path.display().to_string(),
        exists: true,
        created,
    }))
}

/// GET /worktrees/{theater}/{order_id} - Existence check.
async fn get_worktree(
    State(state): State<Arc<AppState>>,
    Path((theater, order_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let path = state.manager.status(&theater, &order_id).map_err(map_error)?;
    Ok(Json(match path {
        Some(path) => WorktreeResponse {
            order_id,
            path: path.display().to_string(),
            exists: true,
            created: false,
        },
        None => WorktreeResponse {
            order_id,
            path: String::new(),
            exists: false,
            created: false,
        },
    }))
}

/// POST /worktrees/{theater}/{order_id}/archive - Tarball the worktree.
async fn archive_worktree(
    State(state): State<Arc<AppState>>,
    Path((theater, order_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let archive_path = state
        .manager
        .archive(&theater, &order_id)
        .map_err(map_error)?;
    Ok(Json(ArchiveResponse {
        order_id,
        archive_path: archive_path.display().to_string(),
        success: true,
    }))
}

/// POST /worktrees/{theater}/{order_id}/remove - Archive, then remove.
async fn remove_worktree(
    State(state): State<Arc<AppState>>,
    Path((theater, order_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let archive_path = state
        .manager
        .remove(&theater, &order_id)
        .map_err(map_error)?;
    Ok(Json(serde_json::json!({
        "status": "removed",
        "archive_path": archive_path.display().to_string(),
    })))
}
