//! Alert emission with in-memory deduplication.
//!
//! Each alert episode escalates once per TTL window: to the local
//! `alerts.jsonl` audit stream and to the Ledger as an `observer.*`
//! event. The dedupe cache is in-memory only; after a restart the same
//! alert may fire once more, and Ledger `event_id` uniqueness still
//! bounds what lands in persistent storage.

use claw_core::{utc_now_iso, NewEvent};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

pub const DEFAULT_DEDUPE_TTL: Duration = Duration::from_secs(3600);

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub struct ObserverSignals {
    http: reqwest::Client,
    ledger_url: String,
    theater: String,
    audit_log: PathBuf,
    dedupe_ttl: Duration,
    /// `(alert_type, run_id, order_id)` key -> unix timestamp of last emit.
    dedupe_cache: Mutex<HashMap<String, f64>>,
}

impl ObserverSignals {
    pub fn new(
        ledger_url: impl Into<String>,
        theater: impl Into<String>,
        audit_log: PathBuf,
        dedupe_ttl: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            ledger_url: ledger_url.into(),
            theater: theater.into(),
            audit_log,
            dedupe_ttl,
            dedupe_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Emit an alert unless the same episode fired within the TTL.
    ///
    /// Returns whether the alert was actually emitted.
    pub async fn emit(
        &self,
        alert_type: &str,
        message: &str,
        run_id: Option<&str>,
        order_id: Option<&str>,
        payload_extra: Map<String, Value>,
    ) -> bool {
        let cache_key = format!(
            "{alert_type}:{}:{}",
            run_id.unwrap_or("none"),
            order_id.unwrap_or("none")
        );
        let now = unix_now();

        {
            let mut cache = self.dedupe_cache.lock().expect("dedupe cache poisoned");
            if let Some(last) = cache.get(&cache_key) {
                if now - last < self.dedupe_ttl.as_secs_f64() {
                    return false;
                }
            }
            cache.insert(cache_key, now);
        }

        let mut payload = Map::new();
        payload.insert("theater".to_string(), Value::String(self.theater.clone()));
        payload.insert(
            "alert_type".to_string(),
            Value::String(alert_type.to_string()),
        );
        payload.insert("message".to_string(), Value::String(message.to_string()));
        payload.insert(
            "run_id".to_string(),
            run_id.map_or(Value::Null, |r| Value::String(r.to_string())),
        );
        payload.insert(
            "order_id".to_string(),
            order_id.map_or(Value::Null, |o| Value::String(o.to_string())),
        );
        payload.insert("observed_at".to_string(), Value::String(utc_now_iso()));
        payload.extend(payload_extra);
        let payload = Value::Object(payload);

        self.append_audit(&payload);

        let event_id = format!(
            "obs-{alert_type}-{}-{}-{}",
            run_id.unwrap_or("none"),
            order_id.unwrap_or("none"),
            now as i64
        );
        let event = NewEvent {
            event_id: Some(event_id),
            ts: None,
            run_id: run_id.map(String::from),
            order_id: order_id.map(String::from),
            event_type: format!("observer.{alert_type}"),
            payload,
        };

        let result = self
            .http
            .post(format!("{}/events", self.ledger_url))
            .timeout(Duration::from_secs(5))
            .json(&event)
            .send()
            .await;
        if let Err(e) = result {
            warn!(alert_type, "failed to emit alert to ledger: {e}");
        }

        true
    }

    fn append_audit(&self, payload: &Value) {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.audit_log.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.audit_log)?;
            writeln!(file, "{payload}")
        };
        if let Err(e) = write() {
            warn!("failed to append alert audit log: {e}");
        }
    }

    /// Snapshot of the dedupe cache: key -> age of the entry in seconds.
    pub fn cache_snapshot(&self) -> Value {
        let now = unix_now();
        let cache = self.dedupe_cache.lock().expect("dedupe cache poisoned");
        let mut map = Map::new();
        for (key, ts) in cache.iter() {
            map.insert(key.clone(), serde_json::json!(now - ts));
        }
        Value::Object(map)
    }
}

impl std::fmt::Debug for ObserverSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSignals")
            .field("theater", &self.theater)
            .field("dedupe_ttl", &self.dedupe_ttl)
            .finish_non_exhaustive()
    }
}
