//! End-to-end tests for the Ledger HTTP surface: the full lifecycle
//! event trail of a successful order, terminal-event deduplication
//! between Worker and Conductor, and snapshot/rebuild equality.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use claw_ledger::server::{create_router, AppState};
use claw_ledger::storage::Storage;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

async fn create_app() -> (Router, TempDir) {
    let dir = TempDir::new().unwrap();
    let storage = Storage::new(&dir.path().join("ledger.db")).await.unwrap();
    let state = Arc::new(AppState {
        storage: Arc::new(storage),
    });
    (create_router(state), dir)
}

async fn post_event(app: &Router, event: serde_json::Value) -> serde_json::Value {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/events")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&event).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}

/// The event trail of one successful chat, as the Conductor and Worker
/// emit it. Event ids follow the deterministic scheme for request id
/// `req-1`; the two ORDER_COMPLETED emissions share one id on purpose.
fn happy_path_events() -> Vec<serde_json::Value> {
    let run_id = "run_0123456789abcdef";
    let order_id = "order_0123456789abcdef";
    let base = |event_id: &str, event_type: &str, payload: serde_json::Value| {
        serde_json::json!({
            "event_id": event_id,
            "run_id": run_id,
            "order_id": order_id,
            "event_type": event_type,
            "payload": payload,
        })
    };

    vec![
        base("h1", "RUN_CREATED", serde_json::json!({"message": "Say 'IronClaw'"})),
        base(
            "h2",
            "ORDER_CREATED",
            serde_json::json!({"theater": "demo", "objective": "Process chat"}),
        ),
        base("h3", "ORDER_QUEUED", serde_json::json!({})),
        base("h4", "ORDER_WORKTREE_REQUESTED", serde_json::json!({})),
        base(
            "h5",
            "ORDER_WORKTREE_READY",
            serde_json::json!({"worktree_path": "/theaters/demo/worktrees/order_0123456789abcdef"}),
        ),
        base(
            "h6",
            "ORDER_RUNNING",
            serde_json::json!({
                "status": "running",
                "stage": "initializing",
                "attempt": 1,
                "worktree": "/theaters/demo/worktrees/order_0123456789abcdef",
            }),
        ),
        // Worker-emitted terminal event.
        base(
            "req-1-completed",
            "ORDER_COMPLETED",
            serde_json::json!({
                "status": "completed",
                "order_head": "abc123def456",
                "stage": "done",
                "answer": "IronClaw",
                "attempt": 1,
            }),
        ),
        base(
            "h7",
            "ORDER_ARCHIVED",
            serde_json::json!({"archive_path": "/theaters/demo/archive/order_x.tar.gz"}),
        ),
        base("h8", "RUN_COMPLETED", serde_json::json!({"status": "completed"})),
    ]
}

#[tokio::test]
async fn happy_path_trail_produces_completed_snapshots() {
    let (app, _dir) = create_app().await;

    for event in happy_path_events() {
        let ack = post_event(&app, event).await;
        assert_eq!(ack["status"], "created");
    }

    // The Conductor's ORDER_COMPLETED replays the Worker's id: a no-op.
    let duplicate = serde_json::json!({
        "event_id": "req-1-completed",
        "run_id": "run_0123456789abcdef",
        "order_id": "order_0123456789abcdef",
        "event_type": "ORDER_COMPLETED",
        "payload": {"status": "completed", "order_head": "should-not-win"},
    });
    let ack = post_event(&app, duplicate).await;
    assert_eq!(ack["status"], "exists");

    let (status, order) = get_json(&app, "/orders/order_0123456789abcdef").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "completed");
    assert_eq!(order["order_head"], "abc123def456");
    assert_eq!(order["extra"]["answer"], "IronClaw");
    assert_eq!(
        order["extra"]["archive_path"],
        "/theaters/demo/archive/order_x.tar.gz"
    );

    let (status, run) = get_json(&app, "/runs/run_0123456789abcdef").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["status"], "completed");
    assert_eq!(run["message"], "Say 'IronClaw'");
    assert_eq!(run["order_head"], "abc123def456");

    // Exactly one ORDER_COMPLETED in the log.
    let (_, events) = get_json(&app, "/events?order_id=order_0123456789abcdef&limit=100").await;
    let completed_count = events
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["event_type"] == "ORDER_COMPLETED")
        .count();
    assert_eq!(completed_count, 1);
}

#[tokio::test]
async fn rebuild_matches_incremental_snapshots() {
    let (app, _dir) = create_app().await;
    for event in happy_path_events() {
        post_event(&app, event).await;
    }

    let (_, incremental_order) = get_json(&app, "/orders/order_0123456789abcdef").await;
    let (_, incremental_run) = get_json(&app, "/runs/run_0123456789abcdef").await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/rebuild")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (_, rebuilt_order) = get_json(&app, "/orders/order_0123456789abcdef").await;
    let (_, rebuilt_run) = get_json(&app, "/runs/run_0123456789abcdef").await;

    assert_eq!(incremental_order, rebuilt_order);
    assert_eq!(incremental_run, rebuilt_run);
}

#[tokio::test]
async fn failed_order_trail_produces_failed_snapshots() {
    let (app, _dir) = create_app().await;
    let events = [
        serde_json::json!({
            "event_id": "f1",
            "run_id": "run_f",
            "order_id": "order_f",
            "event_type": "ORDER_RUNNING",
            "payload": {"status": "running", "stage": "initializing"},
        }),
        serde_json::json!({
            "event_id": "req-2-failed",
            "run_id": "run_f",
            "order_id": "order_f",
            "event_type": "ORDER_FAILED",
            "payload": {"status": "failed", "stage": "calling_model", "error": "model unreachable"},
        }),
        serde_json::json!({
            "event_id": "f2",
            "run_id": "run_f",
            "event_type": "RUN_FAILED",
            "payload": {"status": "failed", "error": "model unreachable"},
        }),
    ];
    for event in events {
        post_event(&app, event).await;
    }

    let (_, order) = get_json(&app, "/orders/order_f").await;
    assert_eq!(order["status"], "failed");
    assert_eq!(order["extra"]["error"], "model unreachable");
    assert_eq!(order["extra"]["stage"], "calling_model");

    let (_, run) = get_json(&app, "/runs/run_f").await;
    assert_eq!(run["status"], "failed");
}

#[tokio::test]
async fn unknown_ids_are_404() {
    let (app, _dir) = create_app().await;
    let (status, _) = get_json(&app, "/orders/order_missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get_json(&app, "/runs/run_missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
