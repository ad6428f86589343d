use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{PolymergeError, Result};

/// Completed git invocation. `status` is `None` when the process was killed
/// by a signal.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Last-commit summary parsed from `log -1 --pretty=format:%H|%an|%ad|%s`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub message: String,
}

/// Async driver for the external git tool.
///
/// Every invocation carries a fixed deadline and is never retried; retry
/// policy belongs to the caller. Failures surface as
/// `PolymergeError::GitCommand` with the exit status and captured stderr.
#[derive(Debug, Clone)]
pub struct GitClient {
    repo_path: PathBuf,
    remote: String,
    deadline: Duration,
}

impl GitClient {
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Self {
        Self {
            repo_path: repo_path.as_ref().to_path_buf(),
            remote: "origin".to_string(),
            deadline: Duration::from_secs(30),
        }
    }

    /// Build a client from the loaded configuration.
    pub fn from_config<P: AsRef<Path>>(repo_path: P, config: &crate::config::GitConfig) -> Self {
        Self::new(repo_path)
            .with_remote(config.remote.clone())
            .with_deadline(Duration::from_secs(config.timeout_secs.max(1)))
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Run a git command, erroring on non-zero exit.
    pub async fn run(&self, args: &[&str]) -> Result<GitOutput> {
        let output = self.run_unchecked(args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(PolymergeError::GitCommand {
                command: format!("git {}", args.join(" ")),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Run a git command, erroring only on spawn failure or timeout.
    /// Callers inspect `status` themselves.
    pub async fn run_unchecked(&self, args: &[&str]) -> Result<GitOutput> {
        debug!(args = ?args, "Running git command");

        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(&self.repo_path)
            .kill_on_drop(true);

        let output = timeout(self.deadline, command.output())
            .await
            .map_err(|_| {
                PolymergeError::git_timeout(
                    format!("git {}", args.join(" ")),
                    self.deadline.as_secs(),
                )
            })??;

        Ok(GitOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    pub async fn current_branch(&self) -> Result<String> {
        let output = self.run(&["branch", "--show-current"]).await?;
        Ok(output.stdout.trim().to_string())
    }

    pub async fn branch_exists(&self, name: &str) -> Result<bool> {
        let output = self
            .run_unchecked(&["branch", "--list", name])
            .await?;
        Ok(!output.stdout.trim().is_empty())
    }

    /// All branch names from `git branch -a`, with the current-branch marker
    /// and the remote prefix stripped.
    pub async fn list_branches(&self) -> Result<Vec<String>> {
        let output = self.run(&["branch", "-a"]).await?;
        let remote_prefix = format!("remotes/{}/", self.remote);

        let mut names = Vec::new();
        for line in output.stdout.lines() {
            let name = line.trim().trim_start_matches("* ").trim();
            if name.is_empty() || name.contains("->") {
                continue;
            }
            let name = name.strip_prefix(&remote_prefix).unwrap_or(name);
            if !names.iter().any(|existing| existing == name) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    pub async fn fetch(&self, branch: &str) -> Result<()> {
        let remote = self.remote.clone();
        self.run(&["fetch", remote.as_str(), branch]).await?;
        Ok(())
    }

    pub async fn checkout(&self, branch: &str) -> Result<()> {
        self.run(&["checkout", branch]).await?;
        Ok(())
    }

    pub async fn checkout_new(&self, branch: &str, start_point: &str) -> Result<()> {
        self.run(&["checkout", "-b", branch, start_point]).await?;
        Ok(())
    }

    pub async fn stage(&self, path: &str) -> Result<()> {
        self.run(&["add", "--", path]).await?;
        Ok(())
    }

    pub async fn delete_branch(&self, branch: &str) -> Result<()> {
        self.run(&["branch", "-d", branch]).await?;
        Ok(())
    }

    /// Best-effort remote branch deletion; missing remote branches are fine.
    pub async fn delete_remote_branch(&self, branch: &str) -> Result<GitOutput> {
        let remote = self.remote.clone();
        self.run_unchecked(&["push", remote.as_str(), "--delete", branch])
            .await
    }

    pub async fn merge_base(&self, branch1: &str, branch2: &str) -> Result<String> {
        let output = self.run(&["merge-base", branch1, branch2]).await?;
        Ok(output.stdout.trim().to_string())
    }

    /// Non-destructive three-way merge simulation. Returns raw output; the
    /// exit status is irrelevant since conflicting merges are expected.
    pub async fn merge_tree(&self, base: &str, branch1: &str, branch2: &str) -> Result<String> {
        let output = self
            .run_unchecked(&["merge-tree", base, branch1, branch2])
            .await?;
        Ok(output.stdout)
    }

    /// Two-ref merge simulation as used for quick conflict listings.
    pub async fn merge_tree_pair(&self, target: &str, branch: &str) -> Result<String> {
        let output = self.run_unchecked(&["merge-tree", target, branch]).await?;
        Ok(output.stdout)
    }

    /// Files changed on `branch` relative to HEAD, mapped to their
    /// single-letter change status (A/M/D/...).
    pub async fn changed_files(&self, branch: &str) -> Result<HashMap<String, String>> {
        let range = format!("HEAD..{branch}");
        let output = self
            .run_unchecked(&["diff", "--name-status", &range])
            .await?;

        let mut files = HashMap::new();
        for line in output.stdout.lines() {
            let mut parts = line.split('\t');
            if let (Some(status), Some(path)) = (parts.next(), parts.next()) {
                if !status.is_empty() && !path.is_empty() {
                    // Rename statuses look like R100; keep the leading letter.
                    let status = status.chars().next().unwrap_or('M').to_string();
                    files.insert(path.to_string(), status);
                }
            }
        }
        Ok(files)
    }

    /// File content as of `branch`, or `None` when the path does not exist
    /// on that branch.
    pub async fn file_content(&self, branch: &str, path: &str) -> Result<Option<String>> {
        let spec = format!("{branch}:{path}");
        let output = self.run_unchecked(&["show", &spec]).await?;
        if output.success() {
            Ok(Some(output.stdout))
        } else {
            Ok(None)
        }
    }

    /// Unix timestamp of the last commit on a branch.
    pub async fn last_commit_timestamp(&self, branch: &str) -> Result<Option<i64>> {
        let output = self
            .run_unchecked(&["log", "-1", "--format=%ct", branch])
            .await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(output.stdout.trim().parse::<i64>().ok())
    }

    pub async fn last_commit_summary(&self, branch: &str) -> Result<Option<CommitSummary>> {
        let output = self
            .run_unchecked(&["log", "-1", "--pretty=format:%H|%an|%ad|%s", branch])
            .await?;
        if !output.success() {
            return Ok(None);
        }

        let line = output.stdout.trim();
        let parts: Vec<&str> = line.splitn(4, '|').collect();
        if parts.len() != 4 {
            return Ok(None);
        }
        Ok(Some(CommitSummary {
            hash: parts[0].chars().take(8).collect(),
            author: parts[1].to_string(),
            date: parts[2].to_string(),
            message: parts[3].to_string(),
        }))
    }

    /// (behind, ahead) counts of `branch` against `base`.
    pub async fn ahead_behind(&self, base: &str, branch: &str) -> Result<(u64, u64)> {
        let range = format!("{base}...{branch}");
        let output = self
            .run(&["rev-list", "--left-right", "--count", &range])
            .await?;

        let counts: Vec<u64> = output
            .stdout
            .split_whitespace()
            .filter_map(|n| n.parse().ok())
            .collect();
        match counts.as_slice() {
            [behind, ahead] => Ok((*behind, *ahead)),
            _ => Ok((0, 0)),
        }
    }

    /// Commits on a branch within the recent window.
    pub async fn commit_count_since(&self, branch: &str, since: &str) -> Result<u64> {
        let since_arg = format!("--since={since}");
        let output = self
            .run_unchecked(&["rev-list", "--count", &since_arg, branch])
            .await?;
        if !output.success() {
            return Ok(0);
        }
        Ok(output.stdout.trim().parse().unwrap_or(0))
    }

    /// Total lines touched on `branch` relative to HEAD, from `diff --stat`.
    pub async fn lines_changed(&self, branch: &str) -> Result<u64> {
        let range = format!("HEAD..{branch}");
        let output = self.run_unchecked(&["diff", "--stat", &range]).await?;
        if !output.success() {
            return Ok(0);
        }

        // The summary line reads "N files changed, X insertions(+), Y deletions(-)".
        let mut total = 0u64;
        if let Some(summary) = output.stdout.lines().last() {
            for part in summary.split(',') {
                let part = part.trim();
                if part.contains("insertion") || part.contains("deletion") {
                    if let Some(count) = part.split_whitespace().next() {
                        total += count.parse::<u64>().unwrap_or(0);
                    }
                }
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_output_success_requires_zero_exit() {
        let ok = GitOutput {
            status: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        };
        let failed = GitOutput {
            status: Some(1),
            stdout: String::new(),
            stderr: String::new(),
        };
        let killed = GitOutput {
            status: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(ok.success());
        assert!(!failed.success());
        assert!(!killed.success());
    }
}
