//! Git operations the Worker performs inside a worktree.

use std::path::Path;
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("failed to execute git: {0}")]
    Execution(#[from] std::io::Error),
    #[error("invalid utf-8 in git output")]
    InvalidUtf8,
}

pub type Result<T> = std::result::Result<T, GitError>;

/// Current HEAD sha of the worktree.
pub fn rev_parse_head(worktree: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(worktree)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GitError::CommandFailed(format!("git rev-parse: {stderr}")));
    }

    Ok(String::from_utf8(output.stdout)
        .map_err(|_| GitError::InvalidUtf8)?
        .trim()
        .to_string())
}

/// Stage everything and commit. Returns the new HEAD sha.
pub fn commit_all(worktree: &Path, message: &str) -> Result<String> {
    let add = Command::new("git")
        .args(["add", "."])
        .current_dir(worktree)
        .output()?;
    if !add.status.success() {
        let stderr = String::from_utf8_lossy(&add.stderr);
        return Err(GitError::CommandFailed(format!("git add: {stderr}")));
    }

    let commit = Command::new("git")
        .args(["commit", "-m", message])
        .current_dir(worktree)
        .output()?;
    if !commit.status.success() {
        let stderr = String::from_utf8_lossy(&commit.stderr);
        return Err(GitError::CommandFailed(format!("git commit: {stderr}")));
    }

    rev_parse_head(worktree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        for args in [
            vec!["init", "-b", "master"],
            vec!["config", "user.email", "test@test.com"],
            vec!["config", "user.name", "Test"],
        ] {
            Command::new("git")
                .args(&args)
                .current_dir(dir.path())
                .output()
                .unwrap();
        }
        std::fs::write(dir.path().join("README.md"), "# Test").unwrap();
        Command::new("git")
            .args(["add", "."])
            .current_dir(dir.path())
            .output()
            .unwrap();
        Command::new("git")
            .args(["commit", "-m", "initial"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        dir
    }

    #[test]
    fn commit_all_advances_head() {
        let dir = setup_test_repo();
        let before = rev_parse_head(dir.path()).unwrap();

        std::fs::write(dir.path().join("new.txt"), "content").unwrap();
        let after = commit_all(dir.path(), "worker: order_1 attempt 1").unwrap();

        assert_ne!(before, after);
        assert_eq!(after.len(), 40);
        assert_eq!(after, rev_parse_head(dir.path()).unwrap());
    }

    #[test]
    fn commit_with_nothing_staged_fails() {
        let dir = setup_test_repo();
        let err = commit_all(dir.path(), "empty").unwrap_err();
        assert!(matches!(err, GitError::CommandFailed(_)));
    }

    #[test]
    fn rev_parse_outside_repo_fails() {
        let dir = TempDir::new().unwrap();
        assert!(rev_parse_head(dir.path()).is_err());
    }
}
