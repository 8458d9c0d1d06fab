//! The After-Action Report: the Worker's locked per-attempt record.
//!
//! `aar.json` sits at the worktree root and doubles as the Worker's
//! short-circuit marker: a completed AAR for the same attempt means the
//! work was already done.

use crate::types::{status, Stage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// One promoted artifact, relative to the worktree root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ArtifactRef {
    pub fn new(path: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: kind.into(),
        }
    }
}

/// After-Action Report written by the Worker at the end of every attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aar {
    pub order_id: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_type: Option<String>,
    pub attempt: u32,
    pub status: String,
    pub stage: Stage,
    pub started_at: String,
    pub ended_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template_commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Aar {
    /// Read the AAR from a worktree root, if one exists.
    pub fn load(worktree: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(worktree.join("aar.json")).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// True when this report marks `attempt` as successfully completed.
    pub fn is_completed_attempt(&self, attempt: u32) -> bool {
        self.status == status::COMPLETED && self.attempt == attempt
    }
}
