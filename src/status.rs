use serde::Serialize;
use std::path::Path;

use crate::git::{AheadBehind, BranchLead, GitBackend, GitError};

/// Drift of a local clone relative to origin, measured after a fetch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    /// Branch the comparison ran against, `None` when neither the API
    /// default nor a main/master fallback exists on origin.
    pub default_branch: Option<String>,
    /// Local commits on the default branch that origin lacks
    pub ahead: u32,
    /// Origin commits on the default branch the clone lacks
    pub behind: u32,
    /// Staged, unstaged or untracked changes in the work tree
    pub dirty: bool,
    /// Local branches holding commits origin does not have
    pub unpushed: Vec<BranchLead>,
}

impl SyncStatus {
    /// True when the clone matches origin exactly and has no local work.
    pub fn is_clean(&self) -> bool {
        self.ahead == 0 && self.behind == 0 && !self.dirty && self.unpushed.is_empty()
    }
}

/// Pick the branch drift is measured against: the API-reported default if
/// origin has it, otherwise `main`, otherwise `master`.
pub async fn resolve_default_branch(
    git: &dyn GitBackend,
    repo: &Path,
    api_default: Option<&str>,
) -> Result<Option<String>, GitError> {
    let mut candidates: Vec<&str> = Vec::new();
    if let Some(name) = api_default {
        candidates.push(name);
    }
    for fallback in ["main", "master"] {
        if !candidates.contains(&fallback) {
            candidates.push(fallback);
        }
    }

    for name in candidates {
        if git.remote_branch_exists(repo, name).await? {
            return Ok(Some(name.to_string()));
        }
    }
    Ok(None)
}

/// Measure a clone against origin. Assumes remote-tracking refs are fresh;
/// callers fetch first.
///
/// Ahead/behind counts need both sides of the comparison: when the default
/// branch has no local counterpart (or none resolved at all) they stay at
/// zero while dirtiness and unpushed branches are still reported.
pub async fn analyze(
    git: &dyn GitBackend,
    path: &Path,
    api_default: Option<&str>,
) -> Result<SyncStatus, GitError> {
    let default_branch = resolve_default_branch(git, path, api_default).await?;

    let mut counts = AheadBehind::default();
    if let Some(branch) = default_branch.as_deref() {
        if git.local_branch_exists(path, branch).await? {
            let upstream = format!("origin/{}", branch);
            counts = git.ahead_behind(path, branch, &upstream).await?;
        }
    }

    let dirty = git.is_dirty(path).await?;
    let unpushed = git.unpushed_branches(path).await?;

    Ok(SyncStatus {
        default_branch,
        ahead: counts.ahead,
        behind: counts.behind,
        dirty,
        unpushed,
    })
}
