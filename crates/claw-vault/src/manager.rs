//! Worktree lifecycle operations.
//!
//! All paths pass through lexical normalization and an ancestor check
//! against the theater prefix before any filesystem operation. No symlink
//! traversal, no `..` escapes.

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid theater path: {0}")]
    InvalidTheater(String),
    #[error("theater does not exist: {0}")]
    TheaterMissing(String),
    #[error("invalid worktree path: {0}")]
    InvalidWorktree(String),
    #[error("git repository not found in theater: {0}")]
    RepoMissing(String),
    #[error("worktree does not exist: {0}")]
    WorktreeMissing(String),
    #[error("git command failed: {0}")]
    Git(String),
    #[error("archive failed: {0}")]
    Archive(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VaultError>;

impl VaultError {
    /// Validation errors surface as 400; git and archive failures as 500.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTheater(_)
                | Self::TheaterMissing(_)
                | Self::InvalidWorktree(_)
                | Self::RepoMissing(_)
                | Self::WorktreeMissing(_)
        )
    }
}

/// Normalize a path by resolving `.` and `..` components lexically.
fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                components.pop();
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }
    components.iter().collect()
}

/// Per-theater workspace manager.
pub struct WorktreeManager {
    theaters_root: PathBuf,
}

impl WorktreeManager {
    pub fn new(theaters_root: impl Into<PathBuf>) -> Self {
        let root = theaters_root.into();
        let theaters_root = root.canonicalize().unwrap_or_else(|_| normalize_path(&root));
        Self { theaters_root }
    }

    pub fn theaters_root(&self) -> &Path {
        &self.theaters_root
    }

    /// Validate a theater name against the theaters root.
    fn validate_theater(&self, theater: &str) -> Result<PathBuf> {
        let theater_path = normalize_path(&self.theaters_root.join(theater));
        if !theater_path.starts_with(&self.theaters_root) || theater_path == self.theaters_root {
            return Err(VaultError::InvalidTheater(theater.to_string()));
        }
        if !theater_path.exists() {
            return Err(VaultError::TheaterMissing(theater.to_string()));
        }
        Ok(theater_path)
    }

    /// Resolve the git repository backing a theater: `repo/` if present,
    /// else the theater root when it carries `.git` directly.
    fn repo_path(&self, theater_path: &Path) -> Result<PathBuf> {
        let repo = theater_path.join("repo");
        if repo.exists() {
            return Ok(repo);
        }
        if theater_path.join(".git").exists() {
            return Ok(theater_path.to_path_buf());
        }
        Err(VaultError::RepoMissing(theater_path.display().to_string()))
    }

    /// Compute and validate the worktree path for an order.
    fn worktree_path(&self, theater_path: &Path, order_id: &str) -> Result<PathBuf> {
        let worktrees = theater_path.join("worktrees");
        let path = normalize_path(&worktrees.join(order_id));
        if !path.starts_with(&worktrees) || path == worktrees {
            return Err(VaultError::InvalidWorktree(order_id.to_string()));
        }
        Ok(path)
    }

    /// Create a worktree for an order on a branch named after it.
    ///
    /// An existing worktree is a no-op returning `created = false`.
    pub fn create(&self, theater: &str, order_id: &str, base_ref: &str) -> Result<(PathBuf, bool)> {
        let theater_path = self.validate_theater(theater)?;
        let repo_path = self.repo_path(&theater_path)?;
        let worktree_path = self.worktree_path(&theater_path, order_id)?;

        if worktree_path.exists() {
            return Ok((worktree_path, false));
        }

        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let output = Command::new("git")
            .args(["worktree", "add", "-b", order_id])
            .arg(&worktree_path)
            .arg(base_ref)
            .current_dir(&repo_path)
            .output()
            .map_err(|e| VaultError::Git(format!("failed to execute git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VaultError::Git(format!("git worktree add: {stderr}")));
        }

        info!(theater, order_id, path = %worktree_path.display(), "worktree created");
        Ok((worktree_path, true))
    }

    /// Path of an order's worktree if it exists on disk.
    pub fn status(&self, theater: &str, order_id: &str) -> Result<Option<PathBuf>> {
        let theater_path = self.validate_theater(theater)?;
        let worktree_path = self.worktree_path(&theater_path, order_id)?;
        if worktree_path.exists() {
            Ok(Some(worktree_path))
        } else {
            Ok(None)
        }
    }

    /// Archive a worktree into `<theater>/archive/<order_id>_<ts>.tar.gz`.
    pub fn archive(&self, theater: &str, order_id: &str) -> Result<PathBuf> {
        let theater_path = self.validate_theater(theater)?;
        let worktree_path = self.worktree_path(&theater_path, order_id)?;
        if !worktree_path.exists() {
            return Err(VaultError::WorktreeMissing(order_id.to_string()));
        }

        let archive_dir = theater_path.join("archive");
        std::fs::create_dir_all(&archive_dir)?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let archive_path = archive_dir.join(format!("{order_id}_{stamp}.tar.gz"));

        let file = std::fs::File::create(&archive_path)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(order_id, &worktree_path)?;
        builder.into_inner()?.finish()?;

        info!(theater, order_id, archive = %archive_path.display(), "worktree archived");
        Ok(archive_path)
    }

    /// Remove a worktree, ALWAYS archiving first.
    ///
    /// An archive failure aborts the removal; there is no forget-without-
    /// evidence path. Returns the archive path.
    pub fn remove(&self, theater: &str, order_id: &str) -> Result<PathBuf> {
        let archive_path = self.archive(theater, order_id)?;

        let theater_path = self.validate_theater(theater)?;
        let repo_path = self.repo_path(&theater_path)?;
        let worktree_path = self.worktree_path(&theater_path, order_id)?;

        if worktree_path.exists() {
            let output = Command::new("git")
                .args(["worktree", "remove", "--force"])
                .arg(&worktree_path)
                .current_dir(&repo_path)
                .output()
                .map_err(|e| VaultError::Git(format!("failed to execute git: {e}")))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(VaultError::Git(format!("git worktree remove: {stderr}")));
            }
        }

        info!(theater, order_id, "worktree removed");
        Ok(archive_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Build a theater with a git repo at `<root>/<theater>/repo`.
    fn setup_theater(root: &Path, theater: &str) {
        let repo = root.join(theater).join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        for args in [
            vec!["init", "-b", "master"],
            vec!["config", "user.email", "test@test.com"],
            vec!["config", "user.name", "Test"],
        ] {
            Command::new("git")
                .args(&args)
                .current_dir(&repo)
                .output()
                .unwrap();
        }
        std::fs::write(repo.join("README.md"), "# Theater").unwrap();
        Command::new("git")
            .args(["add", "."])
            .current_dir(&repo)
            .output()
            .unwrap();
        Command::new("git")
            .args(["commit", "-m", "initial"])
            .current_dir(&repo)
            .output()
            .unwrap();
    }

    fn manager() -> (WorktreeManager, TempDir) {
        let dir = TempDir::new().unwrap();
        setup_theater(dir.path(), "demo");
        (WorktreeManager::new(dir.path()), dir)
    }

    #[test]
    fn create_makes_worktree_on_order_branch() {
        let (manager, _dir) = manager();
        let (path, created) = manager.create("demo", "order_1", "master").unwrap();

        assert!(created);
        assert!(path.exists());
        assert!(path.ends_with("demo/worktrees/order_1"));
        // Linked worktrees carry a .git file pointing at the repo.
        assert!(path.join(".git").exists());

        let output = Command::new("git")
            .args(["branch", "--show-current"])
            .current_dir(&path)
            .output()
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&output.stdout).trim(),
            "order_1"
        );
    }

    #[test]
    fn create_twice_is_a_noop() {
        let (manager, _dir) = manager();
        let (first, created) = manager.create("demo", "order_1", "master").unwrap();
        assert!(created);

        let (second, created) = manager.create("demo", "order_1", "master").unwrap();
        assert!(!created);
        assert_eq!(first, second);
    }

    #[test]
    fn traversal_order_id_is_rejected() {
        let (manager, _dir) = manager();
        let err = manager.create("demo", "../../etc", "master").unwrap_err();
        assert!(matches!(err, VaultError::InvalidWorktree(_)));
        assert!(err.is_validation());
    }

    #[test]
    fn traversal_theater_is_rejected() {
        let (manager, _dir) = manager();
        let err = manager.create("../outside", "order_1", "master").unwrap_err();
        assert!(matches!(err, VaultError::InvalidTheater(_)));
    }

    #[test]
    fn missing_theater_is_rejected() {
        let (manager, _dir) = manager();
        let err = manager.create("ghost", "order_1", "master").unwrap_err();
        assert!(matches!(err, VaultError::TheaterMissing(_)));
    }

    #[test]
    fn status_reports_existence() {
        let (manager, _dir) = manager();
        assert!(manager.status("demo", "order_1").unwrap().is_none());

        manager.create("demo", "order_1", "master").unwrap();
        assert!(manager.status("demo", "order_1").unwrap().is_some());
    }

    #[test]
    fn archive_produces_tarball() {
        let (manager, dir) = manager();
        manager.create("demo", "order_1", "master").unwrap();

        let archive = manager.archive("demo", "order_1").unwrap();
        assert!(archive.exists());
        assert!(archive.starts_with(dir.path().join("demo").join("archive")));
        let name = archive.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("order_1_"));
        assert!(name.ends_with(".tar.gz"));
        assert!(std::fs::metadata(&archive).unwrap().len() > 0);
    }

    #[test]
    fn archive_of_missing_worktree_fails() {
        let (manager, _dir) = manager();
        let err = manager.archive("demo", "order_1").unwrap_err();
        assert!(matches!(err, VaultError::WorktreeMissing(_)));
    }

    #[test]
    fn remove_archives_then_deletes() {
        let (manager, _dir) = manager();
        let (path, _) = manager.create("demo", "order_1", "master").unwrap();

        let archive = manager.remove("demo", "order_1").unwrap();
        assert!(archive.exists());
        assert!(!path.exists());
    }

    #[test]
    fn remove_without_worktree_fails_at_archive() {
        let (manager, _dir) = manager();
        let err = manager.remove("demo", "order_1").unwrap_err();
        assert!(matches!(err, VaultError::WorktreeMissing(_)));
    }

    #[test]
    fn theater_with_git_at_root_is_accepted() {
        let dir = TempDir::new().unwrap();
        let theater = dir.path().join("bare");
        std::fs::create_dir_all(&theater).unwrap();
        for args in [
            vec!["init", "-b", "master"],
            vec!["config", "user.email", "test@test.com"],
            vec!["config", "user.name", "Test"],
        ] {
            Command::new("git")
                .args(&args)
                .current_dir(&theater)
                .output()
                .unwrap();
        }
        std::fs::write(theater.join("file.txt"), "x").unwrap();
        Command::new("git")
            .args(["add", "."])
            .current_dir(&theater)
            .output()
            .unwrap();
        Command::new("git")
            .args(["commit", "-m", "initial"])
            .current_dir(&theater)
            .output()
            .unwrap();

        let manager = WorktreeManager::new(dir.path());
        let (path, created) = manager.create("bare", "order_1", "master").unwrap();
        assert!(created);
        assert!(path.exists());
    }
}
