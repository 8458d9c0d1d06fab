//! claw-ledger - IronClaw Ledger service.
//!
//! An append-only event log with derived run/order snapshots, the single
//! source of truth for request status. Events are immutable; snapshots are
//! a pure projection of the log and can always be rebuilt.

pub mod projection;
pub mod server;
pub mod storage;
