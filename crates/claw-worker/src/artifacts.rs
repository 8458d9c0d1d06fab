//! Atomic artifact writes and heartbeats.
//!
//! Outputs land under temporary `_tmp_` names and are renamed into place,
//! so no partial file is ever visible at a canonical path.

use claw_core::{utc_now_iso, Stage};
use std::io;
use std::path::Path;

/// Write `contents` to `path` via a `_tmp_` sibling and an atomic rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    std::fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = parent.join(format!("_tmp_{file_name}"));

    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

/// Record the current stage in `outputs/heartbeat.json`.
pub fn write_heartbeat(worktree: &Path, stage: Stage) -> io::Result<()> {
    let heartbeat = serde_json::json!({
        "ts": utc_now_iso(),
        "stage": stage,
    });
    write_atomic(
        &worktree.join("outputs").join("heartbeat.json"),
        heartbeat.to_string().as_bytes(),
    )
}

/// Read the stage out of the last heartbeat, if one was written.
pub fn last_heartbeat_stage(worktree: &Path) -> Option<Stage> {
    let raw = std::fs::read_to_string(worktree.join("outputs").join("heartbeat.json")).ok()?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    serde_json::from_value(value.get("stage")?.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_atomic_creates_parents_and_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("outputs").join("model_output.txt");

        write_atomic(&target, b"hello").unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello");
        assert!(!dir
            .path()
            .join("outputs")
            .join("_tmp_model_output.txt")
            .exists());
    }

    #[test]
    fn write_atomic_replaces_existing_content() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("aar.json");
        write_atomic(&target, b"{\"a\":1}").unwrap();
        write_atomic(&target, b"{\"a\":2}").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "{\"a\":2}");
    }

    #[test]
    fn heartbeat_round_trips_stage() {
        let dir = TempDir::new().unwrap();
        write_heartbeat(dir.path(), Stage::CallingModel).unwrap();

        let raw =
            std::fs::read_to_string(dir.path().join("outputs").join("heartbeat.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["stage"], "calling_model");
        assert!(value["ts"].as_str().is_some());

        assert_eq!(last_heartbeat_stage(dir.path()), Some(Stage::CallingModel));
    }

    #[test]
    fn last_heartbeat_stage_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(last_heartbeat_stage(dir.path()), None);
    }
}
