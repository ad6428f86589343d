use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{PolymergeError, Result};
use crate::git::client::{CommitSummary, GitClient};

static NON_SLUG_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9-]+").unwrap());
static DASH_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-{2,}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Active,
    Merged,
    Abandoned,
}

/// Persisted metadata for an agent branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub base_branch: String,
    pub created_at: DateTime<Utc>,
    pub status: BranchStatus,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl BranchInfo {
    fn unknown(name: &str) -> Self {
        Self {
            name: name.to_string(),
            base_branch: "unknown".to_string(),
            created_at: Utc::now(),
            status: BranchStatus::Active,
            metadata: HashMap::new(),
        }
    }
}

/// Detailed status report for one branch.
#[derive(Debug, Clone)]
pub struct BranchStatusReport {
    pub name: String,
    pub base_branch: String,
    pub created_at: DateTime<Utc>,
    pub status: BranchStatus,
    pub ahead: u64,
    pub behind: u64,
    pub last_commit: Option<CommitSummary>,
    pub metadata: HashMap<String, Value>,
}

/// Conflict listing from a non-destructive merge simulation.
#[derive(Debug, Clone)]
pub struct BranchConflictReport {
    pub branch: String,
    pub target: String,
    pub has_conflicts: bool,
    pub conflicts: Vec<String>,
}

/// Manages git branch lifecycle for parallel agent development.
///
/// Branch metadata is persisted as JSON under the tool data directory and
/// reloaded on construction, so branches created by a previous process are
/// still known. Branches discovered in git but absent from the metadata get
/// minimal entries created lazily.
pub struct BranchManager {
    git: GitClient,
    branch_prefix: String,
    data_dir: PathBuf,
    branches: Mutex<HashMap<String, BranchInfo>>,
}

impl BranchManager {
    pub fn new(git: GitClient, branch_prefix: impl Into<String>, data_dir: impl Into<String>) -> Self {
        let data_dir = git.repo_path().join(data_dir.into());
        let branches = Self::load_metadata(&data_dir.join("branches.json"));
        Self {
            git,
            branch_prefix: branch_prefix.into(),
            data_dir,
            branches: Mutex::new(branches),
        }
    }

    pub fn git(&self) -> &GitClient {
        &self.git
    }

    fn metadata_file(&self) -> PathBuf {
        self.data_dir.join("branches.json")
    }

    fn load_metadata(path: &std::path::Path) -> HashMap<String, BranchInfo> {
        if !path.exists() {
            return HashMap::new();
        }

        match std::fs::read_to_string(path)
            .map_err(PolymergeError::from)
            .and_then(|raw| Ok(serde_json::from_str::<HashMap<String, BranchInfo>>(&raw)?))
        {
            Ok(loaded) => {
                info!(count = loaded.len(), "Loaded branch metadata");
                loaded
            }
            Err(error) => {
                warn!(%error, "Failed to load branch metadata, starting empty");
                HashMap::new()
            }
        }
    }

    fn persist(&self, branches: &HashMap<String, BranchInfo>) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;

        let lock_file = File::create(self.data_dir.join("branches.lock"))?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write()?;

        let json = serde_json::to_string_pretty(branches)?;
        std::fs::write(self.metadata_file(), json)?;
        debug!(count = branches.len(), "Saved branch metadata");
        Ok(())
    }

    /// Sanitize an issue name into the `[a-z0-9-]+` branch slug grammar:
    /// lowercase, non-alphanumerics collapsed to single dashes, no leading
    /// or trailing dash.
    pub fn sanitize_issue_name(issue_name: &str) -> String {
        let lowered = issue_name.to_lowercase();
        let replaced = NON_SLUG_CHARS.replace_all(&lowered, "-");
        let collapsed = DASH_RUNS.replace_all(&replaced, "-");
        collapsed.trim_matches('-').to_string()
    }

    /// Create a feature branch for an issue from the fetched head of
    /// `base_branch`, record its metadata, and return the branch name.
    pub async fn create_feature_branch(
        &self,
        issue_name: &str,
        base_branch: &str,
    ) -> Result<String> {
        let slug = Self::sanitize_issue_name(issue_name);
        if slug.is_empty() {
            return Err(PolymergeError::Validation(format!(
                "issue name '{issue_name}' contains no usable characters"
            )));
        }

        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let branch_name = format!("{}/{slug}-{timestamp}", self.branch_prefix);

        if !self.git.branch_exists(base_branch).await? {
            return Err(PolymergeError::Validation(format!(
                "base branch '{base_branch}' does not exist"
            )));
        }

        info!(base = %base_branch, "Fetching latest changes");
        self.git.fetch(base_branch).await?;

        info!(branch = %branch_name, base = %base_branch, "Creating branch");
        let start_point = format!("{}/{base_branch}", self.git.remote());
        self.git.checkout_new(&branch_name, &start_point).await?;

        let mut metadata = HashMap::new();
        metadata.insert("issue_name".to_string(), Value::from(issue_name));
        metadata.insert("agent_id".to_string(), Value::Null);

        let entry = BranchInfo {
            name: branch_name.clone(),
            base_branch: base_branch.to_string(),
            created_at: Utc::now(),
            status: BranchStatus::Active,
            metadata,
        };

        let mut branches = self.branches.lock().await;
        branches.insert(branch_name.clone(), entry);
        self.persist(&branches)?;

        info!(branch = %branch_name, "Created feature branch");
        Ok(branch_name)
    }

    /// Active agent branches: the union of git's branch listing and the
    /// persisted metadata, filtered to this manager's prefix.
    pub async fn list_active_branches(&self) -> Result<Vec<BranchInfo>> {
        let all = self.git.list_branches().await?;

        let mut branches = self.branches.lock().await;
        let mut discovered = false;
        let mut active = Vec::new();

        for name in all {
            if !name.contains(&self.branch_prefix) {
                continue;
            }
            let entry = branches.entry(name.clone()).or_insert_with(|| {
                discovered = true;
                BranchInfo::unknown(&name)
            });
            if entry.status == BranchStatus::Active {
                active.push(entry.clone());
            }
        }

        if discovered {
            self.persist(&branches)?;
        }

        active.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(active)
    }

    /// Detailed status of a branch: ahead/behind counts against its base
    /// plus the last commit summary.
    pub async fn get_branch_status(&self, branch_name: &str) -> Result<BranchStatusReport> {
        if !self.git.branch_exists(branch_name).await? {
            return Err(PolymergeError::Validation(format!(
                "branch '{branch_name}' does not exist"
            )));
        }

        let info = {
            let branches = self.branches.lock().await;
            branches
                .get(branch_name)
                .cloned()
                .unwrap_or_else(|| BranchInfo::unknown(branch_name))
        };

        let (behind, ahead) = if info.base_branch != "unknown" {
            let base_ref = format!("{}/{}", self.git.remote(), info.base_branch);
            self.git
                .ahead_behind(&base_ref, branch_name)
                .await
                .unwrap_or((0, 0))
        } else {
            (0, 0)
        };

        let last_commit = self.git.last_commit_summary(branch_name).await?;

        Ok(BranchStatusReport {
            name: branch_name.to_string(),
            base_branch: info.base_branch,
            created_at: info.created_at,
            status: info.status,
            ahead,
            behind,
            last_commit,
            metadata: info.metadata,
        })
    }

    /// Simulate a merge against the target branch (the recorded base when
    /// not given) and report `CONFLICT` lines. Read-only.
    pub async fn get_branch_conflicts(
        &self,
        branch_name: &str,
        target_branch: Option<&str>,
    ) -> Result<BranchConflictReport> {
        if !self.git.branch_exists(branch_name).await? {
            return Err(PolymergeError::Validation(format!(
                "branch '{branch_name}' does not exist"
            )));
        }

        let target = match target_branch {
            Some(target) => target.to_string(),
            None => {
                let branches = self.branches.lock().await;
                branches
                    .get(branch_name)
                    .map(|info| info.base_branch.clone())
                    .unwrap_or_else(|| "main".to_string())
            }
        };

        let target_ref = format!("{}/{target}", self.git.remote());
        let output = self.git.merge_tree_pair(&target_ref, branch_name).await?;

        let conflicts: Vec<String> = output
            .lines()
            .filter(|line| line.starts_with("CONFLICT"))
            .map(|line| line.to_string())
            .collect();

        Ok(BranchConflictReport {
            branch: branch_name.to_string(),
            target,
            has_conflicts: !conflicts.is_empty(),
            conflicts,
        })
    }

    pub async fn switch_branch(&self, branch_name: &str) -> Result<()> {
        if !self.git.branch_exists(branch_name).await? {
            return Err(PolymergeError::Validation(format!(
                "branch '{branch_name}' does not exist"
            )));
        }
        self.git.checkout(branch_name).await?;
        info!(branch = %branch_name, "Switched branch");
        Ok(())
    }

    /// Merge new metadata entries into a branch's record, creating a minimal
    /// record for unknown branches.
    pub async fn update_branch_metadata(
        &self,
        branch_name: &str,
        metadata: HashMap<String, Value>,
    ) -> Result<()> {
        let mut branches = self.branches.lock().await;
        let entry = branches.entry(branch_name.to_string()).or_insert_with(|| {
            warn!(branch = %branch_name, "Branch not in metadata, creating entry");
            BranchInfo::unknown(branch_name)
        });
        entry.metadata.extend(metadata);
        self.persist(&branches)
    }

    pub async fn mark_branch_merged(&self, branch_name: &str) -> Result<()> {
        let mut branches = self.branches.lock().await;
        if let Some(entry) = branches.get_mut(branch_name) {
            entry.status = BranchStatus::Merged;
            self.persist(&branches)?;
            info!(branch = %branch_name, "Marked branch as merged");
        }
        Ok(())
    }

    /// Delete branches flagged merged, locally and (best-effort) remotely.
    /// With `dry_run` the deletion candidates are only listed.
    pub async fn cleanup_merged_branches(&self, dry_run: bool) -> Result<Vec<String>> {
        let merged: Vec<String> = {
            let branches = self.branches.lock().await;
            branches
                .values()
                .filter(|info| info.status == BranchStatus::Merged)
                .map(|info| info.name.clone())
                .collect()
        };

        let mut cleaned = Vec::new();
        for name in merged {
            if !self.git.branch_exists(&name).await? {
                continue;
            }
            if !dry_run {
                if let Err(error) = self.git.delete_branch(&name).await {
                    warn!(branch = %name, %error, "Failed to delete branch");
                    continue;
                }
                info!(branch = %name, "Deleted local branch");
                let _ = self.git.delete_remote_branch(&name).await;
            }
            cleaned.push(name);
        }

        if !dry_run && !cleaned.is_empty() {
            let mut branches = self.branches.lock().await;
            for name in &cleaned {
                branches.remove(name);
            }
            self.persist(&branches)?;
        }

        Ok(cleaned)
    }

    /// Names of currently active branches, for monitors that only need the
    /// branch set.
    pub async fn active_branch_names(&self) -> Result<Vec<String>> {
        Ok(self
            .list_active_branches()
            .await?
            .into_iter()
            .map(|info| info.name)
            .collect())
    }
}
