//! HTTP surface for the Observer service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tracing::info;

use crate::monitor::Monitor;
use crate::signals::ObserverSignals;

pub struct AppState {
    pub monitor: Arc<Monitor>,
    pub signals: Arc<ObserverSignals>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(monitor_status))
        .route("/alerts", get(alerts))
        .with_state(state)
}

pub async fn start_server(
    monitor: Arc<Monitor>,
    signals: Arc<ObserverSignals>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = Arc::new(AppState { monitor, signals });
    let router = create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("observer listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

/// GET /healthz - Liveness plus the monitoring parameters.
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.monitor.config();
    Json(serde_json::json!({
        "status": "ok",
        "theater": config.theater,
        "poll_interval": config.poll_interval_seconds,
    }))
}

/// GET /status - Monitor counters.
async fn monitor_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.monitor.stats())
}

/// GET /alerts - Dedupe cache snapshot (episode key -> age in seconds).
async fn alerts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.signals.cache_snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MonitorConfig;
    use crate::signals::DEFAULT_DEDUPE_TTL;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn create_test_app(dir: &TempDir) -> Router {
        let signals = Arc::new(ObserverSignals::new(
            "http://127.0.0.1:9",
            "demo",
            dir.path().join("alerts.jsonl"),
            DEFAULT_DEDUPE_TTL,
        ));
        let monitor = Arc::new(Monitor::new(
            MonitorConfig {
                theater: "demo".to_string(),
                ledger_url: "http://127.0.0.1:9".to_string(),
                vault_url: "http://127.0.0.1:9".to_string(),
                theater_root: dir.path().to_path_buf(),
                stall_seconds: 1800,
                poll_interval_seconds: 30,
                enable_vault_cleanup: false,
                event_fetch_limit: 1000,
            },
            Arc::clone(&signals),
        ));
        create_router(Arc::new(AppState { monitor, signals }))
    }

    #[tokio::test]
    async fn healthz_reports_theater_and_interval() {
        let dir = TempDir::new().unwrap();
        let app = create_test_app(&dir);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["theater"], "demo");
        assert_eq!(json["poll_interval"], 30);
    }

    #[tokio::test]
    async fn status_returns_counters() {
        let dir = TempDir::new().unwrap();
        let app = create_test_app(&dir);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["stalled_detected"], 0);
        assert_eq!(json["alerts_emitted"], 0);
    }

    #[tokio::test]
    async fn alerts_starts_empty() {
        let dir = TempDir::new().unwrap();
        let app = create_test_app(&dir);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/alerts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }
}
