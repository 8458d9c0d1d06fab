//! HTTP surface for the Ledger service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use claw_core::NewEvent;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::storage::Storage;

/// Shared state for HTTP handlers.
pub struct AppState {
    pub storage: Arc<Storage>,
}

/// Create the HTTP router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/events", post(create_event).get(list_events))
        .route("/runs", get(list_runs))
        .route("/runs/{id}", get(get_run))
        .route("/orders/{id}", get(get_order))
        .route("/rebuild", post(rebuild))
        .with_state(state)
}

/// Start the HTTP server on localhost.
pub async fn start_server(
    storage: Arc<Storage>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = Arc::new(AppState { storage });
    let router = create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("ledger listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<ErrorResponse>) {
    error!("ledger error: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /events - Append an event; duplicate `event_id` is a no-op.
async fn create_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<NewEvent>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let (_, ack) = state
        .storage
        .insert_event(event)
        .await
        .map_err(internal_error)?;
    Ok(Json(ack))
}

/// Query params for GET /events.
#[derive(Debug, Deserialize, Default)]
pub struct ListEventsQuery {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// GET /events - Raw events, insertion-descending.
async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListEventsQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let events = state
        .storage
        .list_events(
            query.run_id.as_deref(),
            query.order_id.as_deref(),
            query.limit.unwrap_or(100),
            query.offset.unwrap_or(0),
        )
        .await
        .map_err(internal_error)?;
    Ok(Json(events))
}

/// GET /runs - All run snapshots.
async fn list_runs(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let runs = state.storage.list_runs().await.map_err(internal_error)?;
    Ok(Json(runs))
}

/// GET /runs/{id} - One run snapshot.
async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let run = state
        .storage
        .get_run(&id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("run not found: {id}"),
                }),
            )
        })?;
    Ok(Json(run))
}

/// GET /orders/{id} - One order snapshot.
async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let order = state
        .storage
        .get_order(&id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("order not found: {id}"),
                }),
            )
        })?;
    Ok(Json(order))
}

/// POST /rebuild - Force a full snapshot rebuild from the events table.
async fn rebuild(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    state.storage.rebuild().await.map_err(internal_error)?;
    Ok(Json(serde_json::json!({ "status": "rebuilt" })))
}
