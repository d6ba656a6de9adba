//! Git operations wrapper for VibeCheck's lightweight scan pipeline.
//!
//! Provides safe git operations with dry-run support and error handling.

#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, instrument, warn};

/// Errors that can occur during git operations
#[derive(Debug, Error)]
pub enum GitError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Clone operation failed
    #[error("Clone failed: {0}")]
    CloneFailed(String),
}

/// Wall-clock budget for [`clone_shallow`], matching the clone-timeout
/// invariant of the lightweight pipeline.
pub const SHALLOW_CLONE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Shallow-clone (`--depth 1`) `url` into `target`, failing with
/// [`GitError::CloneFailed`] if it doesn't finish within
/// [`SHALLOW_CLONE_TIMEOUT`].
#[instrument]
pub async fn clone_shallow(url: &str, target: impl AsRef<Path> + std::fmt::Debug) -> Result<PathBuf, GitError> {
    let target = target.as_ref().to_path_buf();
    info!("Shallow-cloning {} into {}", url, target.display());

    let clone_future = async {
        let result = Command::new("git")
            .args(["clone", "--depth", "1", url, &target.to_string_lossy()])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if result.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&result.stderr).to_string();
            Err(GitError::CloneFailed(stderr))
        }
    };

    match tokio::time::timeout(SHALLOW_CLONE_TIMEOUT, clone_future).await {
        Ok(Ok(())) => {
            info!("Shallow clone successful");
            Ok(target)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!("Clone of {} timed out after {:?}", url, SHALLOW_CLONE_TIMEOUT);
            Err(GitError::CloneFailed(format!(
                "clone of {url} did not complete within {SHALLOW_CLONE_TIMEOUT:?}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn clone_shallow_clones_a_local_repo() -> anyhow::Result<()> {
        let source = TempDir::new()?;
        let init = Command::new("git")
            .args(["init"])
            .current_dir(source.path())
            .output()
            .await?;
        if !init.status.success() {
            return Err(anyhow::anyhow!(
                "git init failed: {}",
                String::from_utf8_lossy(&init.stderr)
            ));
        }
        Command::new("git")
            .args(["config", "user.email", "test@test.com"])
            .current_dir(source.path())
            .output()
            .await?;
        Command::new("git")
            .args(["config", "user.name", "Test"])
            .current_dir(source.path())
            .output()
            .await?;
        tokio::fs::write(source.path().join("README.md"), "# test\n").await?;
        Command::new("git")
            .args(["add", "."])
            .current_dir(source.path())
            .output()
            .await?;
        let commit = Command::new("git")
            .args(["-c", "commit.gpgsign=false", "commit", "-m", "Initial commit"])
            .current_dir(source.path())
            .output()
            .await?;
        if !commit.status.success() {
            return Err(anyhow::anyhow!(
                "git commit failed: {}",
                String::from_utf8_lossy(&commit.stderr)
            ));
        }

        let dest = TempDir::new()?;
        let target = dest.path().join("clone");
        let cloned = clone_shallow(&format!("file://{}", source.path().display()), &target).await?;
        assert_eq!(cloned, target);
        assert!(target.join("README.md").exists());
        Ok(())
    }

    #[tokio::test]
    async fn clone_shallow_fails_on_a_nonexistent_source() -> anyhow::Result<()> {
        let dest = TempDir::new()?;
        let target = dest.path().join("clone");
        let missing = dest.path().join("does-not-exist");

        let result = clone_shallow(&format!("file://{}", missing.display()), &target).await;
        assert!(result.is_err());
        Ok(())
    }
}
