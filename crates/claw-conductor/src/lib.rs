//! claw-conductor - IronClaw Conductor (CO) service.
//!
//! The orchestrator: derives deterministic ids from the caller's request
//! id, consults the Ledger for an idempotent short-circuit, drives
//! Vault -> Worker -> Vault, and emits the lifecycle event trail.

pub mod clients;
pub mod logic;
pub mod playbooks;
pub mod server;
