//! Version control collaborator (§H): a thin git-subprocess-backed seam used
//! by the provider layer to diff the working tree and by the executor to
//! stage/commit/push at end of run. Deliberately minimal — no rebase,
//! merge, or history rewriting.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{EngineError, GitErrorKind};

#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Paths with uncommitted changes (modified, added, deleted), relative
    /// to the repository root.
    async fn dirty_files(&self) -> Result<Vec<String>, EngineError>;

    async fn stage(&self, paths: &[String]) -> Result<(), EngineError>;

    async fn unstage(&self, paths: &[String]) -> Result<(), EngineError>;

    async fn commit(&self, message: &str) -> Result<(), EngineError>;

    async fn push(&self) -> Result<(), EngineError>;
}

pub struct GitVersionControl {
    pub repo_root: PathBuf,
}

impl GitVersionControl {
    pub fn new(repo_root: PathBuf) -> Self {
        Self { repo_root }
    }

    async fn run(&self, args: &[&str], on_failure: GitErrorKind) -> Result<std::process::Output, EngineError> {
        debug!(args = ?args, "GitVersionControl::run: called");
        let output = tokio::process::Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|_| EngineError::Git { kind: on_failure })?;
        if !output.status.success() {
            return Err(EngineError::Git { kind: on_failure });
        }
        Ok(output)
    }
}

#[async_trait]
impl VersionControl for GitVersionControl {
    async fn dirty_files(&self) -> Result<Vec<String>, EngineError> {
        let output = self.run(&["status", "--porcelain"], GitErrorKind::StatusFailed).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(|line| line.get(3..).map(str::to_string))
            .filter(|p| !p.is_empty())
            .collect())
    }

    async fn stage(&self, paths: &[String]) -> Result<(), EngineError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run(&args, GitErrorKind::StatusFailed).await?;
        Ok(())
    }

    async fn unstage(&self, paths: &[String]) -> Result<(), EngineError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["reset", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run(&args, GitErrorKind::StatusFailed).await?;
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<(), EngineError> {
        self.run(&["commit", "-m", message], GitErrorKind::CommitFailed).await?;
        Ok(())
    }

    async fn push(&self) -> Result<(), EngineError> {
        self.run(&["push"], GitErrorKind::PushFailed).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        tokio::process::Command::new("git").arg("init").current_dir(dir.path()).output().await.unwrap();
        tokio::process::Command::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(dir.path())
            .output()
            .await
            .unwrap();
        tokio::process::Command::new("git")
            .args(["config", "user.name", "test"])
            .current_dir(dir.path())
            .output()
            .await
            .unwrap();
        dir
    }

    #[tokio::test]
    async fn dirty_files_reports_untracked_file() {
        let dir = init_repo().await;
        tokio::fs::write(dir.path().join("a.txt"), "hi").await.unwrap();
        let vcs = GitVersionControl::new(dir.path().to_path_buf());
        let files = vcs.dirty_files().await.unwrap();
        assert_eq!(files, vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn stage_and_commit_clears_dirty_files() {
        let dir = init_repo().await;
        tokio::fs::write(dir.path().join("a.txt"), "hi").await.unwrap();
        let vcs = GitVersionControl::new(dir.path().to_path_buf());
        vcs.stage(&["a.txt".to_string()]).await.unwrap();
        vcs.commit("add a.txt").await.unwrap();
        assert!(vcs.dirty_files().await.unwrap().is_empty());
    }
}
