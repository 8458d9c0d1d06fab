//! The Observer's polling monitor.
//!
//! Each tick: derive per-order latest state from the Ledger event log,
//! flag stalled running orders and dirty completed worktrees, and scan
//! the theater for worktrees the Ledger has never heard of.

use crate::signals::ObserverSignals;
use chrono::{DateTime, Utc};
use claw_core::types::status;
use claw_core::EventRecord;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub theater: String,
    pub ledger_url: String,
    pub vault_url: String,
    pub theater_root: PathBuf,
    pub stall_seconds: u64,
    pub poll_interval_seconds: u64,
    pub enable_vault_cleanup: bool,
    /// Page size for the event fetch each tick.
    pub event_fetch_limit: i64,
}

/// Counters exposed on `GET /status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStats {
    pub last_poll: f64,
    pub active_runs: u64,
    pub stalled_detected: u64,
    pub orphans_detected: u64,
    pub integrity_failures: u64,
    pub alerts_emitted: u64,
}

/// What an integrity probe of a completed worktree found.
#[derive(Debug, PartialEq, Eq)]
pub enum IntegrityIssue {
    MissingAar,
    DirtyTree(String),
}

/// Latest event per order, by Ledger insertion id.
pub fn latest_by_order(events: &[EventRecord]) -> BTreeMap<String, &EventRecord> {
    let mut latest: BTreeMap<String, &EventRecord> = BTreeMap::new();
    for event in events {
        let Some(order_id) = event.order_id.as_deref() else {
            continue;
        };
        match latest.get(order_id) {
            Some(current) if current.id >= event.id => {}
            _ => {
                latest.insert(order_id.to_string(), event);
            }
        }
    }
    latest
}

/// Seconds since the event's timestamp, when it exceeds the threshold.
pub fn stall_delta(ts: &str, now: DateTime<Utc>, stall_seconds: u64) -> Option<f64> {
    let last = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);
    let delta = (now - last).num_seconds();
    if delta > stall_seconds as i64 {
        Some(delta as f64)
    } else {
        None
    }
}

/// Probe a completed worktree: AAR present, tree committed.
pub fn check_worktree_integrity(worktree: &Path) -> Option<IntegrityIssue> {
    if !worktree.join("aar.json").exists() {
        return Some(IntegrityIssue::MissingAar);
    }
    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(worktree)
        .output()
        .ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() && !stdout.is_empty() {
        return Some(IntegrityIssue::DirtyTree(stdout));
    }
    None
}

pub struct Monitor {
    config: MonitorConfig,
    signals: Arc<ObserverSignals>,
    http: reqwest::Client,
    stats: Mutex<MonitorStats>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, signals: Arc<ObserverSignals>) -> Self {
        Self {
            config,
            signals,
            http: reqwest::Client::new(),
            stats: Mutex::new(MonitorStats::default()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats.lock().expect("stats poisoned").clone()
    }

    fn with_stats(&self, f: impl FnOnce(&mut MonitorStats)) {
        f(&mut self.stats.lock().expect("stats poisoned"));
    }

    /// One monitoring tick.
    pub async fn poll(&self) {
        debug!(theater = %self.config.theater, "observer polling");
        self.with_stats(|s| {
            s.last_poll = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
        });

        match self.fetch_events().await {
            Ok(events) => self.check_stalls_and_integrity(&events).await,
            Err(e) => warn!("monitor failed to reach ledger: {e}"),
        }

        self.check_orphans().await;
    }

    async fn fetch_events(&self) -> Result<Vec<EventRecord>, reqwest::Error> {
        self.http
            .get(format!(
                "{}/events?limit={}",
                self.config.ledger_url, self.config.event_fetch_limit
            ))
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    async fn check_stalls_and_integrity(&self, events: &[EventRecord]) {
        let now = Utc::now();
        let mut active = 0u64;

        for (order_id, event) in latest_by_order(events) {
            let payload = &event.payload;
            let order_status = payload.get("status").and_then(Value::as_str).unwrap_or("");
            let theater = payload
                .get("theater")
                .and_then(Value::as_str)
                .unwrap_or(&self.config.theater);
            if theater != self.config.theater {
                continue;
            }

            match order_status {
                status::RUNNING => {
                    active += 1;
                    self.verify_stall(&order_id, event, now).await;
                }
                status::COMPLETED => {
                    self.verify_integrity(&order_id, event).await;
                }
                _ => {}
            }
        }

        self.with_stats(|s| s.active_runs = active);
    }

    async fn verify_stall(&self, order_id: &str, event: &EventRecord, now: DateTime<Utc>) {
        let Some(delta) = stall_delta(&event.ts, now, self.config.stall_seconds) else {
            return;
        };

        let mut extra = Map::new();
        extra.insert("delta_seconds".to_string(), serde_json::json!(delta));
        extra.insert(
            "last_status".to_string(),
            Value::String(status::RUNNING.to_string()),
        );
        let emitted = self
            .signals
            .emit(
                "stalled",
                &format!("Order {order_id} stalled for {}s", delta as i64),
                event.run_id.as_deref(),
                Some(order_id),
                extra,
            )
            .await;
        if emitted {
            self.with_stats(|s| {
                s.stalled_detected += 1;
                s.alerts_emitted += 1;
            });
        }
    }

    async fn verify_integrity(&self, order_id: &str, event: &EventRecord) {
        let Some(worktree) = event.payload.get("worktree").and_then(Value::as_str) else {
            return;
        };
        let worktree = Path::new(worktree);
        // A missing worktree after archival is the normal end state.
        if !worktree.exists() {
            return;
        }

        let Some(issue) = check_worktree_integrity(worktree) else {
            return;
        };
        let (message, mut extra) = match issue {
            IntegrityIssue::MissingAar => {
                let mut extra = Map::new();
                extra.insert("missing".to_string(), serde_json::json!("aar.json"));
                (format!("Completed order {order_id} missing aar.json"), extra)
            }
            IntegrityIssue::DirtyTree(git_status) => {
                let mut extra = Map::new();
                extra.insert("git_status".to_string(), Value::String(git_status));
                (
                    format!("Completed order {order_id} has uncommitted changes"),
                    extra,
                )
            }
        };
        extra.insert(
            "worktree".to_string(),
            serde_json::json!(worktree.display().to_string()),
        );

        let emitted = self
            .signals
            .emit(
                "integrity_failed",
                &message,
                event.run_id.as_deref(),
                Some(order_id),
                extra,
            )
            .await;
        if emitted {
            self.with_stats(|s| {
                s.integrity_failures += 1;
                s.alerts_emitted += 1;
            });
        }
    }

    async fn check_orphans(&self) {
        let worktrees_dir = self
            .config
            .theater_root
            .join(&self.config.theater)
            .join("worktrees");
        let Ok(entries) = std::fs::read_dir(&worktrees_dir) else {
            return;
        };

        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let Ok(order_id) = entry.file_name().into_string() else {
                continue;
            };

            match self.order_exists(&order_id).await {
                Ok(false) => {
                    self.emit_orphan(&order_id, &entry.path()).await;
                }
                Ok(true) => {
                    debug!(order_id, "worktree has a ledger record, not an orphan");
                }
                Err(e) => warn!(order_id, "orphan check failed: {e}"),
            }
        }
    }

    /// Whether the Ledger knows this order. A 404 marks an orphan.
    async fn order_exists(&self, order_id: &str) -> Result<bool, reqwest::Error> {
        let response = self
            .http
            .get(format!("{}/orders/{order_id}", self.config.ledger_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        Ok(response.status() != reqwest::StatusCode::NOT_FOUND)
    }

    async fn emit_orphan(&self, order_id: &str, path: &Path) {
        let mut extra = Map::new();
        extra.insert(
            "path".to_string(),
            serde_json::json!(path.display().to_string()),
        );
        let emitted = self
            .signals
            .emit(
                "orphan_worktree",
                &format!("Detected orphan worktree: {order_id} (no ledger record)"),
                None,
                Some(order_id),
                extra,
            )
            .await;
        if emitted {
            self.with_stats(|s| {
                s.orphans_detected += 1;
                s.alerts_emitted += 1;
            });

            if self.config.enable_vault_cleanup {
                let url = format!(
                    "{}/worktrees/{}/{order_id}/remove",
                    self.config.vault_url, self.config.theater
                );
                let result = self
                    .http
                    .post(url)
                    .timeout(Duration::from_secs(10))
                    .send()
                    .await;
                if let Err(e) = result {
                    warn!(order_id, "vault cleanup for orphan failed: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(id: i64, ts: &str, order_id: Option<&str>, payload: Value) -> EventRecord {
        EventRecord {
            id,
            event_id: format!("ev-{id}"),
            ts: ts.to_string(),
            run_id: Some("run_a".to_string()),
            order_id: order_id.map(String::from),
            event_type: "E".to_string(),
            payload,
        }
    }

    #[test]
    fn latest_by_order_takes_highest_insertion_id() {
        let events = vec![
            event(3, "t3", Some("order_a"), serde_json::json!({"status": "completed"})),
            event(1, "t1", Some("order_a"), serde_json::json!({"status": "running"})),
            event(2, "t2", Some("order_b"), serde_json::json!({"status": "running"})),
            event(4, "t4", None, serde_json::json!({})),
        ];
        let latest = latest_by_order(&events);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["order_a"].id, 3);
        assert_eq!(latest["order_b"].id, 2);
    }

    #[test]
    fn stall_delta_triggers_past_threshold() {
        let now = DateTime::parse_from_rfc3339("2026-01-01T01:00:00+00:00")
            .unwrap()
            .with_timezone(&Utc);

        assert!(stall_delta("2026-01-01T00:59:30+00:00", now, 1800).is_none());
        let delta = stall_delta("2026-01-01T00:00:00+00:00", now, 1800).unwrap();
        assert!((delta - 3600.0).abs() < 1.0);
        // Unparseable timestamps never alert.
        assert!(stall_delta("not-a-timestamp", now, 0).is_none());
    }

    fn setup_repo(dir: &Path) {
        for args in [
            vec!["init", "-b", "master"],
            vec!["config", "user.email", "test@test.com"],
            vec!["config", "user.name", "Test"],
        ] {
            Command::new("git")
                .args(&args)
                .current_dir(dir)
                .output()
                .unwrap();
        }
        std::fs::write(dir.join("aar.json"), "{}").unwrap();
        Command::new("git")
            .args(["add", "."])
            .current_dir(dir)
            .output()
            .unwrap();
        Command::new("git")
            .args(["commit", "-m", "initial"])
            .current_dir(dir)
            .output()
            .unwrap();
    }

    #[test]
    fn clean_committed_worktree_passes_integrity() {
        let dir = TempDir::new().unwrap();
        setup_repo(dir.path());
        assert_eq!(check_worktree_integrity(dir.path()), None);
    }

    #[test]
    fn missing_aar_is_flagged() {
        let dir = TempDir::new().unwrap();
        setup_repo(dir.path());
        std::fs::remove_file(dir.path().join("aar.json")).unwrap();
        Command::new("git")
            .args(["add", "."])
            .current_dir(dir.path())
            .output()
            .unwrap();
        Command::new("git")
            .args(["commit", "-m", "drop aar"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        assert_eq!(
            check_worktree_integrity(dir.path()),
            Some(IntegrityIssue::MissingAar)
        );
    }

    #[test]
    fn uncommitted_changes_are_flagged() {
        let dir = TempDir::new().unwrap();
        setup_repo(dir.path());
        std::fs::write(dir.path().join("stray.txt"), "uncommitted").unwrap();
        match check_worktree_integrity(dir.path()) {
            Some(IntegrityIssue::DirtyTree(status)) => assert!(status.contains("stray.txt")),
            other => panic!("expected dirty tree, got {other:?}"),
        }
    }
}
