//! claw-vault - IronClaw Vault service.
//!
//! Manages per-order isolated git worktrees under a theater root, with
//! archive-before-destroy semantics: a worktree is always tarballed into
//! the theater archive before `git worktree remove` runs.

pub mod manager;
pub mod server;
