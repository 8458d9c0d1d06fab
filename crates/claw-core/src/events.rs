//! Event type names and the shared event-id scheme.
//!
//! The Conductor and the Worker derive event ids with the same function so
//! that a retried emission of the same terminal event collides at the
//! Ledger and becomes a no-op. The id conventions are part of the wire
//! contract and must not change without a data migration.

use crate::fingerprint::sha256_hex;

// Lifecycle events emitted by the Conductor.
pub const RUN_CREATED: &str = "RUN_CREATED";
pub const ORDER_CREATED: &str = "ORDER_CREATED";
pub const ORDER_QUEUED: &str = "ORDER_QUEUED";
pub const ORDER_WORKTREE_REQUESTED: &str = "ORDER_WORKTREE_REQUESTED";
pub const ORDER_WORKTREE_READY: &str = "ORDER_WORKTREE_READY";
pub const ORDER_ARCHIVED: &str = "ORDER_ARCHIVED";
pub const RUN_COMPLETED: &str = "RUN_COMPLETED";
pub const RUN_FAILED: &str = "RUN_FAILED";

// Events emitted by the Worker (ORDER_COMPLETED/ORDER_FAILED are also
// emitted by the Conductor; dedupe keeps each at most once).
pub const ORDER_RUNNING: &str = "ORDER_RUNNING";
pub const ORDER_COMPLETED: &str = "ORDER_COMPLETED";
pub const ORDER_FAILED: &str = "ORDER_FAILED";
pub const MODEL_CALL_STARTED: &str = "worker.model_call.started";
pub const MODEL_CALL_COMPLETED: &str = "worker.model_call.completed";
pub const MODEL_CALL_FAILED: &str = "worker.model_call.failed";

// Alert events emitted by the Observer.
pub const OBSERVER_STALLED: &str = "observer.stalled";
pub const OBSERVER_INTEGRITY_FAILED: &str = "observer.integrity_failed";
pub const OBSERVER_ORPHAN_WORKTREE: &str = "observer.orphan_worktree";

/// Derive the deterministic event id for an emission.
///
/// Terminal events encode the request id directly so any emitter producing
/// the same outcome lands on the same id. Every other event hashes a
/// colon-delimited seed and keeps the first 32 hex chars.
pub fn event_id_for(
    request_id: &str,
    event_type: &str,
    run_id: &str,
    order_id: &str,
    attempt: u32,
) -> String {
    match event_type {
        ORDER_COMPLETED => format!("{request_id}-completed"),
        ORDER_FAILED => format!("{request_id}-failed"),
        _ => {
            let seed = format!("{request_id}:{event_type}:{run_id}:{order_id}:{attempt}");
            sha256_hex(seed.as_bytes())[..32].to_string()
        }
    }
}
