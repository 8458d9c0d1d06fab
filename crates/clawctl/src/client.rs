//! HTTP client for the IronClaw stack.

use claw_core::{EventRecord, OrderSnapshot, RunSnapshot};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("service not reachable at {addr}\n  → is the IronClaw stack running?")]
    ConnectionFailed { addr: String },

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            let addr = e
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            ClientError::ConnectionFailed { addr }
        } else {
            ClientError::HttpError {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

pub struct ClawClient {
    http: reqwest::Client,
    co_url: String,
    ledger_url: String,
}

impl ClawClient {
    pub fn new(co_url: impl Into<String>, ledger_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            co_url: co_url.into(),
            ledger_url: ledger_url.into(),
        }
    }

    /// POST /chat on the Conductor. Returns the raw response body so the
    /// renderer can show error payloads verbatim.
    pub async fn chat(&self, body: Value, timeout_seconds: u64) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}/chat", self.co_url))
            .timeout(Duration::from_secs(timeout_seconds))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        if !status.is_success() {
            return Err(ClientError::HttpError {
                status: status.as_u16(),
                message: body
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(body)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<RunSnapshot> {
        self.get_json(&format!("{}/runs/{run_id}", self.ledger_url))
            .await
    }

    pub async fn get_order(&self, order_id: &str) -> Result<OrderSnapshot> {
        self.get_json(&format!("{}/orders/{order_id}", self.ledger_url))
            .await
    }

    pub async fn list_events(
        &self,
        run_id: Option<&str>,
        order_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<EventRecord>> {
        let mut url = format!("{}/events?limit={limit}", self.ledger_url);
        if let Some(rid) = run_id {
            url.push_str(&format!("&run_id={rid}"));
        }
        if let Some(oid) = order_id {
            url.push_str(&format!("&order_id={oid}"));
        }
        self.get_json(&url).await
    }

    /// Probe a health endpoint; returns the reported body.
    pub async fn health(&self, base_url: &str, path: &str) -> Result<Value> {
        self.get_json(&format!("{base_url}{path}")).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::HttpError {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}
