//! Best-effort event emission to the Ledger.
//!
//! Ledger writes never fail a mission: emission errors are logged and the
//! deterministic event-id scheme makes any retried emission collide with
//! itself server-side.

use claw_core::{event_id_for, NewEvent};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct LedgerEmitter {
    http: reqwest::Client,
    base_url: String,
}

impl LedgerEmitter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Emit a lifecycle event with a deterministic id.
    ///
    /// `payload` must be a JSON object; the standard envelope keys
    /// (`status`, `attempt`, ids, `worktree`) are expected to already be
    /// in it.
    pub async fn emit(
        &self,
        request_id: &str,
        event_type: &str,
        run_id: &str,
        order_id: &str,
        attempt: u32,
        payload: Value,
    ) {
        let event = NewEvent {
            event_id: Some(event_id_for(
                request_id, event_type, run_id, order_id, attempt,
            )),
            ts: None,
            run_id: Some(run_id.to_string()),
            order_id: Some(order_id.to_string()),
            event_type: event_type.to_string(),
            payload,
        };

        let result = self
            .http
            .post(format!("{}/events", self.base_url))
            .timeout(Duration::from_secs(5))
            .json(&event)
            .send()
            .await;

        if let Err(e) = result {
            warn!(event_type, order_id, "failed to emit ledger event: {e}");
        }
    }
}
