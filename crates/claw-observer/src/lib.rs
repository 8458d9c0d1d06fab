//! claw-observer - IronClaw Observer service.
//!
//! A passive health probe: it watches the Ledger and the theater
//! filesystem for stalled orders, integrity failures in completed
//! worktrees, and orphan workspaces, and escalates each episode at most
//! once per dedupe window. Never on the request path.

pub mod monitor;
pub mod server;
pub mod signals;
