//! Git client for checkouts and revision listing
//!
//! All git invocations go through the injected [`CommandRunner`].

use crate::error::{BisectError, BisectResult};
use crate::runner::{CommandRunner, CommandSpec};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Default number of retry attempts for transient failures
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay between retries in milliseconds
const RETRY_BASE_DELAY_MS: u64 = 100;

/// Upper bound for a single git invocation
const GIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Thin git client
#[derive(Clone)]
pub struct GitClient {
    runner: Arc<dyn CommandRunner>,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl GitClient {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
        }
    }

    /// Create client with custom retry settings
    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    /// Run git command and return trimmed stdout
    async fn run_git(&self, repo: &Path, args: &[&str]) -> BisectResult<String> {
        let spec = CommandSpec::new("git")
            .args(args.iter().copied())
            .current_dir(repo)
            .timeout(GIT_TIMEOUT);

        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| BisectError::git("execute", e.to_string()))?;

        if !output.success() {
            let message = if output.stderr.trim().is_empty() {
                output.status.to_string()
            } else {
                output.stderr.trim().to_string()
            };
            return Err(BisectError::git(args.join(" "), message));
        }

        Ok(output.stdout.trim().to_string())
    }

    /// Run git command with automatic retry for transient failures
    ///
    /// Uses exponential backoff: 100ms, 200ms, 400ms, etc.
    async fn run_git_with_retry(&self, repo: &Path, args: &[&str]) -> BisectResult<String> {
        let mut attempt = 0;
        loop {
            match self.run_git(repo, args).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_base_delay * (1 << attempt);
                    tracing::debug!(attempt, ?delay, error = %e, "Retrying git command");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Check out `revision` in the working copy at `work_tree`
    pub async fn checkout(&self, work_tree: &Path, revision: &str) -> BisectResult<()> {
        self.run_git_with_retry(work_tree, &["checkout", "--quiet", revision])
            .await?;
        Ok(())
    }

    /// List revisions newest first, one `<short-hash> <subject>` per line.
    ///
    /// `range` is any git revision range (`a..b`); `None` lists from HEAD.
    pub async fn list_revisions(&self, repo: &Path, range: Option<&str>) -> BisectResult<String> {
        let mut args = vec!["log", "--format=%h %s"];
        if let Some(range) = range {
            args.push(range);
        }
        self.run_git(repo, &args).await
    }
}
