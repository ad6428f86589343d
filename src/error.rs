use thiserror::Error;

/// Core error taxonomy for the coordination layer.
///
/// Every variant carries enough context for a caller to decide whether to
/// retry, escalate, or surface the problem to a human. `recovery_hint`
/// returns a short actionable suggestion for the last case.
#[derive(Debug, Error)]
pub enum PolymergeError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("git {command} failed (exit {status:?}): {stderr}")]
    GitCommand {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("parse error in {file}: {reason}")]
    Parse { file: String, reason: String },

    #[error("merge failed for {file}: {reason}")]
    MergeFailure { file: String, reason: String },

    #[error("escalation required: {0}")]
    EscalationRequired(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl PolymergeError {
    /// Git command that exceeded its deadline. Timeouts are reported through
    /// the same variant as non-zero exits so callers have one failure path
    /// per subprocess invocation.
    pub fn git_timeout(command: impl Into<String>, timeout_secs: u64) -> Self {
        PolymergeError::GitCommand {
            command: command.into(),
            status: None,
            stderr: format!("timed out after {timeout_secs}s"),
        }
    }

    /// Short, human-readable suggestion for recovering from this error.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            PolymergeError::Validation(_) => "check the input values and retry",
            PolymergeError::GitCommand { .. } => {
                "verify the repository state with `git status` and that the named refs exist"
            }
            PolymergeError::Parse { .. } => {
                "the file was skipped; fix its syntax or exclude it from analysis"
            }
            PolymergeError::MergeFailure { .. } => {
                "re-run with a more conservative strategy or merge the file manually"
            }
            PolymergeError::EscalationRequired(_) => {
                "no automatic strategy qualifies; a human must resolve this conflict"
            }
            PolymergeError::Io(_) => "check filesystem permissions and free space",
            PolymergeError::Serde(_) => {
                "the persisted state file may be corrupt; delete it to start fresh"
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, PolymergeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_git_command_variant() {
        let err = PolymergeError::git_timeout("git merge-tree a b", 30);
        match err {
            PolymergeError::GitCommand { status, stderr, .. } => {
                assert!(status.is_none());
                assert!(stderr.contains("30s"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn every_variant_has_a_hint() {
        let err = PolymergeError::Validation("bad branch name".into());
        assert!(!err.recovery_hint().is_empty());
    }
}
