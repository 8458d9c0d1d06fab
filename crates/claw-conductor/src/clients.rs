//! HTTP clients for the services the Conductor drives.

use claw_core::{event_id_for, NewEvent, OrderSnapshot};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{service} returned {status}: {message}")]
    Status {
        service: &'static str,
        status: u16,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, ClientError>;

async fn error_from(
    service: &'static str,
    response: reqwest::Response,
) -> ClientError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    ClientError::Status {
        service,
        status,
        message,
    }
}

/// Client for the Ledger service.
#[derive(Debug, Clone)]
pub struct LedgerClient {
    http: reqwest::Client,
    base_url: String,
}

impl LedgerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetch an order snapshot; a 404 means no order exists yet.
    pub async fn get_order(&self, order_id: &str) -> Result<Option<OrderSnapshot>> {
        let response = self
            .http
            .get(format!("{}/orders/{order_id}", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from("ledger", response).await);
        }
        Ok(Some(response.json().await?))
    }

    /// Best-effort event emission with the deterministic id scheme.
    pub async fn emit(
        &self,
        request_id: &str,
        event_type: &str,
        run_id: &str,
        order_id: &str,
        payload: Value,
    ) {
        let event = NewEvent {
            event_id: Some(event_id_for(request_id, event_type, run_id, order_id, 1)),
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

#[derive(Debug, Deserialize)]
struct WorktreeResponse {
    path: String,
}

#[derive(Debug, Deserialize)]
struct RemoveResponse {
    #[serde(default)]
    archive_path: Option<String>,
}

/// Client for the Vault service.
#[derive(Debug, Clone)]
pub struct VaultClient {
    http: reqwest::Client,
    base_url: String,
}

impl VaultClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Provision a worktree for an order; returns its path.
    pub async fn create_worktree(&self, theater: &str, order_id: &str) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/worktrees", self.base_url))
            .timeout(Duration::from_secs(10))
            .json(&serde_json::json!({ "theater": theater, "order_id": order_id }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from("vault", response).await);
        }
        let body: WorktreeResponse = response.json().await?;
        Ok(body.path)
    }

    /// Archive and remove a worktree; returns the archive path.
    pub async fn remove_worktree(&self, theater: &str, order_id: &str) -> Result<Option<String>> {
        let response = self
            .http
            .post(format!(
                "{}/worktrees/{theater}/{order_id}/remove",
                self.base_url
            ))
            .timeout(Duration::from_secs(30))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from("vault", response).await);
        }
        let body: RemoveResponse = response.json().await?;
        Ok(body.archive_path)
    }
}

/// Result of a Worker `/execute` call.
#[derive(Debug, Deserialize)]
pub struct WorkerResult {
    pub status: String,
    #[serde(default)]
    pub order_head: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Client for the Worker service.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    http: reqwest::Client,
    base_url: String,
}

impl WorkerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Execute an order, blocking until the Worker responds.
    ///
    /// The timeout wraps the Worker's own hard timeout with headroom so
    /// the Worker's failure AAR wins over a client-side abort.
    pub async fn execute(&self, request: Value, hard_timeout_seconds: u64) -> Result<WorkerResult> {
        let response = self
            .http
            .post(format!("{}/execute", self.base_url))
            .timeout(Duration::from_secs(hard_timeout_seconds + 30))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from("worker", response).await);
        }
        Ok(response.json().await?)
    }
}
