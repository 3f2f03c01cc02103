use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// A failed git invocation, carrying the subcommand and trimmed stderr.
#[derive(Debug, Error)]
#[error("git {command} failed: {message}")]
pub struct GitError {
    pub command: String,
    pub message: String,
}

impl GitError {
    /// True when stderr looks like a credential problem rather than a
    /// network or repository one.
    pub fn is_auth(&self) -> bool {
        crate::error::is_auth_failure(&self.message)
    }
}

/// Commit counts a branch and its upstream each hold that the other lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AheadBehind {
    pub ahead: u32,
    pub behind: u32,
}

/// A local branch carrying commits origin does not have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchLead {
    pub branch: String,
    pub commits: u32,
}

/// The git operations the sync engine needs, behind a trait so tests can
/// substitute a scripted backend.
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Clone `url` into `dest`. The parent of `dest` must exist.
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), GitError>;

    /// Update remote-tracking refs from origin, pruning deleted branches.
    async fn fetch_prune(&self, repo: &Path) -> Result<(), GitError>;

    /// Configured fetch URL of the given remote.
    async fn remote_url(&self, repo: &Path, remote: &str) -> Result<String, GitError>;

    /// Currently checked-out branch, `None` when HEAD is detached.
    async fn current_branch(&self, repo: &Path) -> Result<Option<String>, GitError>;

    async fn local_branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, GitError>;

    /// Whether `refs/remotes/origin/<branch>` exists after the last fetch.
    async fn remote_branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, GitError>;

    /// Commits `branch` and `upstream` each have that the other lacks.
    async fn ahead_behind(
        &self,
        repo: &Path,
        branch: &str,
        upstream: &str,
    ) -> Result<AheadBehind, GitError>;

    /// True when the work tree has staged, unstaged or untracked changes.
    async fn is_dirty(&self, repo: &Path) -> Result<bool, GitError>;

    /// Every local branch with commits origin lacks. Branches without an
    /// upstream (or whose upstream is gone) count in full.
    async fn unpushed_branches(&self, repo: &Path) -> Result<Vec<BranchLead>, GitError>;

    /// Fast-forward `branch` to its origin counterpart. Uses `pull --ff-only`
    /// when the branch is checked out, `fetch origin b:b` otherwise.
    async fn fast_forward(&self, repo: &Path, branch: &str) -> Result<(), GitError>;
}

/// [`GitBackend`] backed by the system `git` binary.
///
/// Every invocation runs with `GIT_TERMINAL_PROMPT=0` so a missing
/// credential fails fast instead of hanging on a prompt, and with
/// `kill_on_drop` so a timed-out operation does not linger.
#[derive(Debug, Default, Clone)]
pub struct SystemGit;

impl SystemGit {
    async fn run(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
        let mut cmd = Command::new("git");
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %args.join(" "), dir = ?dir, "running git");

        let output = cmd.output().await.map_err(|e| GitError {
            command: args.join(" "),
            message: format!("failed to spawn git: {}", e),
        })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(GitError {
                command: args.join(" "),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// Whether a revision resolves in the repository. Quiet verify exits 1
    /// with no stderr for unknown revisions.
    async fn rev_exists(&self, repo: &Path, rev: &str) -> Result<bool, GitError> {
        match self
            .run(Some(repo), &["rev-parse", "--verify", "--quiet", rev])
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.message.is_empty() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn count_commits(&self, repo: &Path, range: &str) -> Result<u32, GitError> {
        let out = self.run(Some(repo), &["rev-list", "--count", range]).await?;
        parse_count(&out)
    }
}

#[async_trait]
impl GitBackend for SystemGit {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), GitError> {
        let dest_arg = dest.to_string_lossy();
        self.run(None, &["clone", url, dest_arg.as_ref()]).await?;
        Ok(())
    }

    async fn fetch_prune(&self, repo: &Path) -> Result<(), GitError> {
        self.run(Some(repo), &["fetch", "--prune", "-q", "origin"])
            .await?;
        Ok(())
    }

    async fn remote_url(&self, repo: &Path, remote: &str) -> Result<String, GitError> {
        let out = self.run(Some(repo), &["remote", "get-url", remote]).await?;
        Ok(out.trim().to_string())
    }

    async fn current_branch(&self, repo: &Path) -> Result<Option<String>, GitError> {
        // Works on an unborn branch too; exits 1 with no stderr when
        // HEAD is detached.
        match self
            .run(Some(repo), &["symbolic-ref", "--short", "-q", "HEAD"])
            .await
        {
            Ok(out) => Ok(Some(out.trim().to_string())),
            Err(e) if e.message.is_empty() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn local_branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, GitError> {
        let refname = format!("refs/heads/{}", branch);
        match self
            .run(Some(repo), &["show-ref", "--verify", "--quiet", &refname])
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.message.is_empty() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn remote_branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, GitError> {
        let refname = format!("refs/remotes/origin/{}", branch);
        match self
            .run(Some(repo), &["show-ref", "--verify", "--quiet", &refname])
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.message.is_empty() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn ahead_behind(
        &self,
        repo: &Path,
        branch: &str,
        upstream: &str,
    ) -> Result<AheadBehind, GitError> {
        let range = format!("{}...{}", branch, upstream);
        let out = self
            .run(
                Some(repo),
                &["rev-list", "--left-right", "--count", &range],
            )
            .await?;
        parse_ahead_behind(&out)
    }

    async fn is_dirty(&self, repo: &Path) -> Result<bool, GitError> {
        let out = self.run(Some(repo), &["status", "--porcelain"]).await?;
        Ok(!out.trim().is_empty())
    }

    async fn unpushed_branches(&self, repo: &Path) -> Result<Vec<BranchLead>, GitError> {
        let out = self
            .run(
                Some(repo),
                &[
                    "for-each-ref",
                    "refs/heads",
                    "--format=%(refname:short) %(upstream:short)",
                ],
            )
            .await?;

        let mut leads = Vec::new();
        for (branch, upstream) in parse_ref_lines(&out) {
            // An upstream that no longer resolves (pruned on the remote)
            // counts the same as no upstream at all.
            let mut upstream = upstream;
            if let Some(u) = &upstream {
                if !self.rev_exists(repo, u).await? {
                    upstream = None;
                }
            }

            let commits = match upstream {
                Some(u) => {
                    self.count_commits(repo, &format!("{}..{}", u, branch))
                        .await?
                }
                None => self.count_commits(repo, &branch).await?,
            };

            if commits > 0 {
                leads.push(BranchLead { branch, commits });
            }
        }

        Ok(leads)
    }

    async fn fast_forward(&self, repo: &Path, branch: &str) -> Result<(), GitError> {
        let current = self.current_branch(repo).await?;
        if current.as_deref() == Some(branch) {
            self.run(Some(repo), &["pull", "--ff-only", "origin", branch])
                .await?;
        } else {
            // Not checked out: update the ref directly, refusing anything
            // that is not a fast-forward.
            let refspec = format!("{}:{}", branch, branch);
            self.run(Some(repo), &["fetch", "origin", &refspec]).await?;
        }
        Ok(())
    }
}

/// Parse `rev-list --left-right --count` output of the form `"2\t3"`.
fn parse_ahead_behind(output: &str) -> Result<AheadBehind, GitError> {
    let mut parts = output.split_whitespace();
    let parse = |s: Option<&str>| s.and_then(|v| v.parse::<u32>().ok());

    match (parse(parts.next()), parse(parts.next())) {
        (Some(ahead), Some(behind)) => Ok(AheadBehind { ahead, behind }),
        _ => Err(GitError {
            command: "rev-list --left-right --count".to_string(),
            message: format!("unexpected output: {:?}", output),
        }),
    }
}

fn parse_count(output: &str) -> Result<u32, GitError> {
    output.trim().parse::<u32>().map_err(|_| GitError {
        command: "rev-list --count".to_string(),
        message: format!("unexpected output: {:?}", output),
    })
}

/// Parse `for-each-ref` lines of `<branch> [<upstream>]` into pairs.
fn parse_ref_lines(output: &str) -> Vec<(String, Option<String>)> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let branch = parts.next()?.to_string();
            let upstream = parts.next().map(|s| s.to_string());
            Some((branch, upstream))
        })
        .collect()
}
