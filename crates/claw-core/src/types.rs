//! Core types shared across the IronClaw services.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current UTC time as an ISO-8601 string, the wire format for all
/// timestamps (event `ts`, AAR `started_at`/`ended_at`, heartbeats).
pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Well-known status strings carried in event payloads and snapshots.
///
/// The set is open: the Ledger stores whatever status an emitter sends.
/// These constants cover the statuses the core services emit.
pub mod status {
    pub const QUEUED: &str = "queued";
    pub const RUNNING: &str = "running";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

/// Placeholder for snapshot fields no event has populated yet.
pub const UNSET: &str = "-";

/// Worker execution stage, recorded in heartbeats and the AAR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Starting,
    Initializing,
    CallingModel,
    ModelReturned,
    WritingArtifacts,
    Committing,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Initializing => "initializing",
            Self::CallingModel => "calling_model",
            Self::ModelReturned => "model_returned",
            Self::WritingArtifacts => "writing_artifacts",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mission dispatch tag.
///
/// Unknown tags fall back to the default single-shot mission so new
/// mission types can be introduced without breaking older workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissionType {
    #[default]
    Default,
    CallSummary,
}

impl MissionType {
    pub const CALL_SUMMARY_TAG: &'static str = "filesystem_agent.call_summary";

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            Self::CALL_SUMMARY_TAG => Self::CallSummary,
            _ => Self::Default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::CallSummary => Self::CALL_SUMMARY_TAG,
        }
    }
}

/// Request body for `POST /events` on the Ledger.
///
/// Missing `event_id` and `ts` are filled in server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub event_type: String,
    pub payload: Value,
}

/// A stored event as returned by `GET /events`.
///
/// `id` is the Ledger insertion id and the only authoritative global order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub event_id: String,
    pub ts: String,
    pub run_id: Option<String>,
    pub order_id: Option<String>,
    pub event_type: String,
    pub payload: Value,
}

/// Acknowledgement for `POST /events`.
///
/// `status` is `created` for a fresh insert, `exists` for a duplicate
/// `event_id` (a successful no-op).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAck {
    pub status: String,
    pub event_id: String,
}

/// Run snapshot derived by folding events in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub status: String,
    pub message: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub order_ids: Vec<String>,
    pub worktree: String,
    pub order_head: String,
}

impl RunSnapshot {
    pub fn empty(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: UNSET.to_string(),
            message: UNSET.to_string(),
            started_at: None,
            ended_at: None,
            order_ids: Vec::new(),
            worktree: UNSET.to_string(),
            order_head: UNSET.to_string(),
        }
    }
}

/// Order snapshot derived by folding events in insertion order.
///
/// `extra` accumulates every payload key not claimed by a named column;
/// later events overwrite earlier values key by key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: String,
    pub run_id: String,
    pub status: String,
    pub ts: String,
    pub worktree: String,
    pub unit_head: String,
    pub order_head: String,
    pub extra: Value,
}

impl OrderSnapshot {
    pub fn empty(order_id: impl Into<String>, ts: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            run_id: UNSET.to_string(),
            status: UNSET.to_string(),
            ts: ts.into(),
            worktree: UNSET.to_string(),
            unit_head: UNSET.to_string(),
            order_head: UNSET.to_string(),
            extra: Value::Object(serde_json::Map::new()),
        }
    }

    /// Fetch a string value out of `extra`.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Stage::CallingModel).unwrap(),
            "\"calling_model\""
        );
        assert_eq!(
            serde_json::to_string(&Stage::WritingArtifacts).unwrap(),
            "\"writing_artifacts\""
        );
    }

    #[test]
    fn stage_round_trips() {
        for stage in [
            Stage::Starting,
            Stage::Initializing,
            Stage::CallingModel,
            Stage::ModelReturned,
            Stage::WritingArtifacts,
            Stage::Committing,
            Stage::Done,
            Stage::Failed,
        ] {
            let json = serde_json::to_string(&stage).unwrap();
            let back: Stage = serde_json::from_str(&json).unwrap();
            assert_eq!(back, stage);
        }
    }

    #[test]
    fn mission_type_from_tag() {
        assert_eq!(
            MissionType::from_tag("filesystem_agent.call_summary"),
            MissionType::CallSummary
        );
        assert_eq!(MissionType::from_tag("default"), MissionType::Default);
        assert_eq!(
            MissionType::from_tag("some.future.mission"),
            MissionType::Default
        );
    }

    #[test]
    fn new_event_omits_absent_optionals() {
        let event = NewEvent {
            event_id: None,
            ts: None,
            run_id: Some("run_1".to_string()),
            order_id: None,
            event_type: "ORDER_QUEUED".to_string(),
            payload: serde_json::json!({}),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("event_id").is_none());
        assert!(json.get("ts").is_none());
        assert_eq!(json["run_id"], "run_1");
    }

    #[test]
    fn order_snapshot_extra_lookup() {
        let mut snapshot = OrderSnapshot::empty("order_1", "2026-01-01T00:00:00+00:00");
        snapshot.extra = serde_json::json!({"answer": "hello", "attempt": 1});
        assert_eq!(snapshot.extra_str("answer"), Some("hello"));
        assert_eq!(snapshot.extra_str("attempt"), None);
        assert_eq!(snapshot.extra_str("missing"), None);
    }

    #[test]
    fn utc_now_iso_parses_back() {
        let ts = utc_now_iso();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
