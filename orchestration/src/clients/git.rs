//! Git operations for per-run workspaces.
//!
//! Shells out to the `git` binary. Transient failures (index locks, remote
//! hiccups) are retried with exponential backoff.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// Default number of retry attempts for transient failures.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay between retries in milliseconds.
const RETRY_BASE_DELAY_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("Git operation failed: {operation} - {message}")]
    Operation { operation: String, message: String },
}

impl GitError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Lock contention and remote transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        let Self::Operation { message, .. } = self;
        let message = message.to_lowercase();
        message.contains("index.lock")
            || message.contains("unable to access")
            || message.contains("could not resolve host")
            || message.contains("connection timed out")
            || message.contains("early eof")
    }
}

pub type GitResult<T> = Result<T, GitError>;

/// Git client bound to one working directory.
pub struct GitClient {
    working_dir: PathBuf,
    max_retries: u32,
}

impl GitClient {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn run_git_in(&self, dir: &Path, args: &[&str]) -> GitResult<String> {
        debug!(?args, dir = %dir.display(), "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| GitError::new("execute", e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::new(args.join(" "), stderr.to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn run_git(&self, args: &[&str]) -> GitResult<String> {
        self.run_git_in(&self.working_dir, args)
    }

    /// Run with automatic retry for transient failures.
    /// Exponential backoff: 100 ms, 200 ms, 400 ms…
    fn run_git_with_retry(&self, args: &[&str]) -> GitResult<String> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match self.run_git(args) {
                Ok(output) => return Ok(output),
                Err(e) => {
                    if e.is_retryable() && attempt < self.max_retries {
                        let delay = RETRY_BASE_DELAY_MS * (1 << attempt);
                        std::thread::sleep(std::time::Duration::from_millis(delay));
                        last_error = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| GitError::new("retry", "Max retries exceeded")))
    }

    /// Clone `url` into the working directory, optionally at a branch.
    pub fn clone_repo(&self, url: &str, branch: Option<&str>) -> GitResult<()> {
        let parent = self
            .working_dir
            .parent()
            .ok_or_else(|| GitError::new("clone", "working directory has no parent"))?;
        std::fs::create_dir_all(parent).map_err(|e| GitError::new("clone", e.to_string()))?;

        let dest = self.working_dir.to_string_lossy().to_string();
        let mut args = vec!["clone"];
        if let Some(branch) = branch {
            args.extend_from_slice(&["--branch", branch]);
        }
        args.push(url);
        args.push(&dest);
        self.run_git_in(parent, &args)?;
        Ok(())
    }

    /// Check out a branch, creating it when `create` is set.
    pub fn checkout(&self, branch: &str, create: bool) -> GitResult<()> {
        if create {
            self.run_git(&["checkout", "-b", branch])?;
        } else {
            self.run_git(&["checkout", branch])?;
        }
        Ok(())
    }

    pub fn current_branch(&self) -> GitResult<String> {
        self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn current_commit(&self) -> GitResult<String> {
        self.run_git(&["rev-parse", "HEAD"])
    }

    pub fn add_all(&self) -> GitResult<()> {
        self.run_git_with_retry(&["add", "-A"])?;
        Ok(())
    }

    /// Staged paths; used to verify a non-empty change set before commit.
    pub fn diff_names_cached(&self) -> GitResult<Vec<String>> {
        let output = self.run_git(&["diff", "--name-only", "--cached"])?;
        Ok(output
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    pub fn commit(&self, message: &str) -> GitResult<String> {
        self.run_git_with_retry(&["commit", "-m", message])?;
        self.run_git(&["rev-parse", "--short", "HEAD"])
    }

    /// Push a branch to a remote URL (token already embedded by the caller).
    pub fn push(&self, branch: &str, remote_url: &str) -> GitResult<()> {
        self.run_git_with_retry(&["push", remote_url, &format!("HEAD:{}", branch)])?;
        Ok(())
    }

    pub fn has_uncommitted_changes(&self) -> GitResult<bool> {
        let status = self.run_git(&["status", "--porcelain"])?;
        Ok(!status.is_empty())
    }
}

/// Async facade over git used by the workflow nodes. Implemented by
/// `SystemGit` in production; tests substitute scripted fakes.
#[async_trait::async_trait]
pub trait GitOps: Send + Sync {
    async fn clone_repo(
        &self,
        url: &str,
        branch: Option<&str>,
        dest: &Path,
    ) -> CollaboratorResult<()>;

    async fn checkout(&self, dir: &Path, branch: &str, create: bool) -> CollaboratorResult<()>;

    async fn add_all(&self, dir: &Path) -> CollaboratorResult<()>;

    async fn diff_names_cached(&self, dir: &Path) -> CollaboratorResult<Vec<String>>;

    async fn commit(&self, dir: &Path, message: &str) -> CollaboratorResult<String>;

    async fn push(&self, dir: &Path, branch: &str, remote_url: &str) -> CollaboratorResult<()>;

    async fn head_commit(&self, dir: &Path) -> CollaboratorResult<String>;
}

use super::{CollaboratorError, CollaboratorResult};

impl From<GitError> for CollaboratorError {
    fn from(err: GitError) -> Self {
        if err.is_retryable() {
            CollaboratorError::unavailable(err.to_string())
        } else {
            CollaboratorError::invalid(err.to_string())
        }
    }
}

/// Production `GitOps` backed by the `git` subprocess. Blocking calls run
/// on the blocking pool so the worker task stays responsive.
#[derive(Debug, Default)]
pub struct SystemGit;

impl SystemGit {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl GitOps for SystemGit {
    async fn clone_repo(
        &self,
        url: &str,
        branch: Option<&str>,
        dest: &Path,
    ) -> CollaboratorResult<()> {
        let url = url.to_string();
        let branch = branch.map(String::from);
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || {
            GitClient::new(&dest).clone_repo(&url, branch.as_deref())
        })
        .await
        .map_err(|e| CollaboratorError::unavailable(e.to_string()))??;
        Ok(())
    }

    async fn checkout(&self, dir: &Path, branch: &str, create: bool) -> CollaboratorResult<()> {
        let dir = dir.to_path_buf();
        let branch = branch.to_string();
        tokio::task::spawn_blocking(move || GitClient::new(&dir).checkout(&branch, create))
            .await
            .map_err(|e| CollaboratorError::unavailable(e.to_string()))??;
        Ok(())
    }

    async fn add_all(&self, dir: &Path) -> CollaboratorResult<()> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || GitClient::new(&dir).add_all())
            .await
            .map_err(|e| CollaboratorError::unavailable(e.to_string()))??;
        Ok(())
    }

    async fn diff_names_cached(&self, dir: &Path) -> CollaboratorResult<Vec<String>> {
        let dir = dir.to_path_buf();
        let names = tokio::task::spawn_blocking(move || GitClient::new(&dir).diff_names_cached())
            .await
            .map_err(|e| CollaboratorError::unavailable(e.to_string()))??;
        Ok(names)
    }

    async fn commit(&self, dir: &Path, message: &str) -> CollaboratorResult<String> {
        let dir = dir.to_path_buf();
        let message = message.to_string();
        let hash = tokio::task::spawn_blocking(move || GitClient::new(&dir).commit(&message))
            .await
            .map_err(|e| CollaboratorError::unavailable(e.to_string()))??;
        Ok(hash)
    }

    async fn push(&self, dir: &Path, branch: &str, remote_url: &str) -> CollaboratorResult<()> {
        let dir = dir.to_path_buf();
        let branch = branch.to_string();
        let remote_url = remote_url.to_string();
        tokio::task::spawn_blocking(move || GitClient::new(&dir).push(&branch, &remote_url))
            .await
            .map_err(|e| CollaboratorError::unavailable(e.to_string()))??;
        Ok(())
    }

    async fn head_commit(&self, dir: &Path) -> CollaboratorResult<String> {
        let dir = dir.to_path_buf();
        let hash = tokio::task::spawn_blocking(move || GitClient::new(&dir).current_commit())
            .await
            .map_err(|e| CollaboratorError::unavailable(e.to_string()))??;
        Ok(hash)
    }
}
