//! Snapshot projection: folding events into run and order snapshots.
//!
//! The same fold runs for the incremental refresh after each insert and
//! for a full rebuild, so rebuilding from scratch always equals the
//! incremental view. Events are folded in Ledger insertion order (`id`),
//! the only authoritative global order.

use claw_core::{EventRecord, OrderSnapshot, RunSnapshot};
use serde_json::Value;
use std::collections::BTreeMap;

/// Payload keys mapped to named snapshot columns. Everything else lands
/// in the order snapshot's `extra` object.
const CLAIMED_KEYS: [&str; 11] = [
    "ts",
    "run_id",
    "order_id",
    "status",
    "worktree",
    "unit_head",
    "order_head",
    "message",
    "started_at",
    "ended_at",
    "order_ids",
];

fn payload_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Fold events into run snapshots, keyed by `run_id`.
pub fn fold_runs(events: &[EventRecord]) -> BTreeMap<String, RunSnapshot> {
    let mut runs: BTreeMap<String, RunSnapshot> = BTreeMap::new();

    for event in events {
        let Some(run_id) = event.run_id.as_deref() else {
            continue;
        };
        let run = runs
            .entry(run_id.to_string())
            .or_insert_with(|| RunSnapshot::empty(run_id));
        let payload = &event.payload;

        if let Some(started) = payload_str(payload, "started_at") {
            match &run.started_at {
                Some(current) if current.as_str() <= started => {}
                _ => run.started_at = Some(started.to_string()),
            }
        }
        if let Some(ended) = payload_str(payload, "ended_at") {
            match &run.ended_at {
                Some(current) if current.as_str() >= ended => {}
                _ => run.ended_at = Some(ended.to_string()),
            }
        }
        if let Some(message) = payload_str(payload, "message") {
            run.message = message.to_string();
        }
        if let Some(order_ids) = payload.get("order_ids").and_then(Value::as_array) {
            for oid in order_ids.iter().filter_map(Value::as_str) {
                if !run.order_ids.iter().any(|existing| existing == oid) {
                    run.order_ids.push(oid.to_string());
                }
            }
        }
        if let Some(worktree) = payload_str(payload, "worktree") {
            run.worktree = worktree.to_string();
        }
        if let Some(order_head) = payload_str(payload, "order_head") {
            run.order_head = order_head.to_string();
        }
        if let Some(status) = payload_str(payload, "status") {
            run.status = status.to_string();
        }
    }

    runs
}

/// Fold events into order snapshots, keyed by `order_id`.
pub fn fold_orders(events: &[EventRecord]) -> BTreeMap<String, OrderSnapshot> {
    let mut orders: BTreeMap<String, OrderSnapshot> = BTreeMap::new();

    for event in events {
        let Some(order_id) = event.order_id.as_deref() else {
            continue;
        };
        let order = orders.entry(order_id.to_string()).or_insert_with(|| {
            let mut snapshot = OrderSnapshot::empty(order_id, event.ts.clone());
            if let Some(run_id) = event.run_id.as_deref() {
                snapshot.run_id = run_id.to_string();
            }
            snapshot
        });
        let payload = &event.payload;

        if let Some(status) = payload_str(payload, "status") {
            order.status = status.to_string();
            order.ts = event.ts.clone();
        }
        if let Some(run_id) = payload_str(payload, "run_id") {
            order.run_id = run_id.to_string();
        }
        if let Some(worktree) = payload_str(payload, "worktree") {
            order.worktree = worktree.to_string();
        }
        if let Some(unit_head) = payload_str(payload, "unit_head") {
            order.unit_head = unit_head.to_string();
        }
        if let Some(order_head) = payload_str(payload, "order_head") {
            order.order_head = order_head.to_string();
        }

        if let (Value::Object(extra), Value::Object(payload_map)) = (&mut order.extra, payload) {
            for (key, value) in payload_map {
                if CLAIMED_KEYS.contains(&key.as_str()) {
                    continue;
                }
                extra.insert(key.clone(), value.clone());
            }
        }
    }

    orders
}

#[cfg(test)]
mod tests {
    use super::*;
    use claw_core::types::UNSET;
    use serde_json::json;

    fn event(
        id: i64,
        ts: &str,
        run_id: Option<&str>,
        order_id: Option<&str>,
        event_type: &str,
        payload: Value,
    ) -> EventRecord {
        EventRecord {
            id,
            event_id: format!("ev-{id}"),
            ts: ts.to_string(),
            run_id: run_id.map(String::from),
            order_id: order_id.map(String::from),
            event_type: event_type.to_string(),
            payload,
        }
    }

    #[test]
    fn run_fold_takes_last_status_and_extreme_timestamps() {
        let events = vec![
            event(
                1,
                "t1",
                Some("run_a"),
                None,
                "RUN_CREATED",
                json!({"status": "queued", "started_at": "2026-01-01T00:00:05+00:00"}),
            ),
            event(
                2,
                "t2",
                Some("run_a"),
                None,
                "ORDER_RUNNING",
                json!({"status": "running", "started_at": "2026-01-01T00:00:01+00:00"}),
            ),
            event(
                3,
                "t3",
                Some("run_a"),
                None,
                "RUN_COMPLETED",
                json!({"status": "completed", "ended_at": "2026-01-01T00:01:00+00:00"}),
            ),
        ];

        let runs = fold_runs(&events);
        let run = &runs["run_a"];
        assert_eq!(run.status, "completed");
        assert_eq!(run.started_at.as_deref(), Some("2026-01-01T00:00:01+00:00"));
        assert_eq!(run.ended_at.as_deref(), Some("2026-01-01T00:01:00+00:00"));
    }

    #[test]
    fn run_fold_unions_order_ids() {
        let events = vec![
            event(
                1,
                "t1",
                Some("run_a"),
                None,
                "RUN_CREATED",
                json!({"order_ids": ["order_1", "order_2"]}),
            ),
            event(
                2,
                "t2",
                Some("run_a"),
                None,
                "RUN_CREATED",
                json!({"order_ids": ["order_2", "order_3"]}),
            ),
        ];
        let runs = fold_runs(&events);
        assert_eq!(runs["run_a"].order_ids, vec!["order_1", "order_2", "order_3"]);
    }

    #[test]
    fn order_fold_tracks_status_ts_and_heads() {
        let events = vec![
            event(
                1,
                "t1",
                Some("run_a"),
                Some("order_a"),
                "ORDER_CREATED",
                json!({"theater": "demo"}),
            ),
            event(
                2,
                "t2",
                Some("run_a"),
                Some("order_a"),
                "ORDER_RUNNING",
                json!({"status": "running", "worktree": "/theaters/demo/worktrees/order_a"}),
            ),
            event(
                3,
                "t3",
                Some("run_a"),
                Some("order_a"),
                "ORDER_COMPLETED",
                json!({"status": "completed", "order_head": "abc123", "answer": "hi"}),
            ),
        ];

        let orders = fold_orders(&events);
        let order = &orders["order_a"];
        assert_eq!(order.run_id, "run_a");
        assert_eq!(order.status, "completed");
        assert_eq!(order.ts, "t3");
        assert_eq!(order.worktree, "/theaters/demo/worktrees/order_a");
        assert_eq!(order.order_head, "abc123");
        assert_eq!(order.unit_head, UNSET);
        // Unclaimed keys accumulate in extra.
        assert_eq!(order.extra_str("theater"), Some("demo"));
        assert_eq!(order.extra_str("answer"), Some("hi"));
    }

    #[test]
    fn order_fold_later_extra_wins() {
        let events = vec![
            event(1, "t1", None, Some("order_a"), "E", json!({"note": "first"})),
            event(2, "t2", None, Some("order_a"), "E", json!({"note": "second"})),
        ];
        let orders = fold_orders(&events);
        assert_eq!(orders["order_a"].extra_str("note"), Some("second"));
    }

    #[test]
    fn fold_is_deterministic_under_replay() {
        let events = vec![
            event(
                1,
                "t1",
                Some("run_a"),
                Some("order_a"),
                "ORDER_RUNNING",
                json!({"status": "running"}),
            ),
            event(
                2,
                "t2",
                Some("run_a"),
                Some("order_a"),
                "ORDER_COMPLETED",
                json!({"status": "completed", "order_head": "abc"}),
            ),
        ];
        let first = fold_orders(&events);
        let second = fold_orders(&events);
        assert_eq!(
            serde_json::to_value(&first["order_a"]).unwrap(),
            serde_json::to_value(&second["order_a"]).unwrap()
        );
    }
}
