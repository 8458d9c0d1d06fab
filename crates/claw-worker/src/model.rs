//! Client for the upstream chat-completion API.
//!
//! The endpoint is treated as an opaque `(config, prompt) -> (text, usage,
//! latency)` service. Transient failures are retried with exponential
//! backoff; the latency reported covers the whole call including retries.

use claw_core::ResolvedModelConfig;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_RETRIES: u64 = 3;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("malformed model response: {0}")]
    Malformed(String),
    #[error("model call failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u64, last: String },
}

pub type Result<T> = std::result::Result<T, ModelError>;

/// A completed model call.
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub text: String,
    pub usage: Value,
    pub latency_ms: f64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Backoff before retry `attempt` (0-based): 1s, 2s, 4s, ...
fn backoff_delay(attempt: u64) -> Duration {
    Duration::from_secs(1 << attempt.min(6))
}

pub struct ModelClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ModelClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Call the chat-completion endpoint with retries.
    ///
    /// `retries` and `timeout_seconds` may be overridden per call through
    /// the resolved config's extra keys.
    pub async fn call(&self, config: &ResolvedModelConfig, prompt: &str) -> Result<ModelReply> {
        let retries = config
            .extra
            .get("retries")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_RETRIES)
            .max(1);
        let timeout = config
            .extra
            .get("timeout_seconds")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS);

        let start = Instant::now();
        let mut last_error = String::new();

        for attempt in 0..retries {
            match self.try_call(config, prompt, timeout).await {
                Ok((text, usage)) => {
                    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                    return Ok(ModelReply {
                        text,
                        usage,
                        latency_ms,
                    });
                }
                Err(e) => {
                    warn!(attempt, "model call attempt failed: {e}");
                    last_error = e.to_string();
                    if attempt + 1 < retries {
                        tokio::time::sleep(backoff_delay(attempt)).await;
                    }
                }
            }
        }

        Err(ModelError::Exhausted {
            attempts: retries,
            last: last_error,
        })
    }

    async fn try_call(
        &self,
        config: &ResolvedModelConfig,
        prompt: &str,
        timeout_seconds: u64,
    ) -> Result<(String, Value)> {
        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), Value::String(config.model.clone()));
        body.insert(
            "messages".to_string(),
            serde_json::json!([{ "role": "user", "content": prompt }]),
        );
        if let Some(temperature) = config.temperature {
            body.insert("temperature".to_string(), serde_json::json!(temperature));
        }
        if let Some(max_tokens) = config.max_tokens {
            body.insert("max_tokens".to_string(), serde_json::json!(max_tokens));
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(timeout_seconds))
            .json(&Value::Object(body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let text = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| ModelError::Malformed("no choices in response".to_string()))?;
        let usage = parsed.usage.unwrap_or_else(|| serde_json::json!({}));
        Ok((text, usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        // Capped so a long retry budget cannot sleep for hours.
        assert_eq!(backoff_delay(20), Duration::from_secs(64));
    }

    #[test]
    fn parses_chat_completion_response() {
        let raw = serde_json::json!({
            "id": "mock-res",
            "choices": [{
                "message": { "role": "assistant", "content": "ACK from mock model" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        });
        let parsed: ChatCompletionResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("ACK from mock model")
        );
        assert_eq!(parsed.usage.unwrap()["total_tokens"], 15);
    }

    #[test]
    fn usage_is_optional() {
        let raw = serde_json::json!({
            "choices": [{ "message": { "content": "hi" } }]
        });
        let parsed: ChatCompletionResponse = serde_json::from_value(raw).unwrap();
        assert!(parsed.usage.is_none());
    }
}
