//! Sync engine: fans repositories out over a bounded worker pool and folds
//! the per-repository outcomes back into an ordered report.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::bitbucket::{Listing, RemoteRepo};
use crate::config::Config;
use crate::error::SyncError;
use crate::git::GitBackend;
use crate::mirror::{self, MirrorState};
use crate::report::{RepoEntry, Report, ReportBuilder, SkipReason, SyncAction};
use crate::status::{self, SyncStatus};

/// Behavior switches for one engine run.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub dest_root: PathBuf,
    pub jobs: usize,
    pub timeout: Duration,
    pub ff_default: bool,
    pub dry_run: bool,
    pub retry: bool,
}

impl EngineOptions {
    pub fn from_config(config: &Config, dry_run: bool) -> Self {
        Self {
            dest_root: config.dest_root_path(),
            jobs: config.sync.jobs.max(1),
            timeout: Duration::from_secs(config.sync.timeout_secs),
            ff_default: config.sync.ff_default,
            dry_run,
            retry: config.sync.retry,
        }
    }
}

/// Orchestrates clone/fetch/analysis across a repository listing.
///
/// One repository's failure never aborts the others; every repository in
/// the listing ends up as exactly one report entry, in enumeration order.
pub struct SyncEngine {
    git: Arc<dyn GitBackend>,
    options: EngineOptions,
    shutdown: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(git: Arc<dyn GitBackend>, options: EngineOptions) -> Self {
        Self {
            git,
            options,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked before each repository starts. Setting it (from the
    /// Ctrl-C handler) lets in-flight operations finish while everything
    /// not yet started is reported as interrupted.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Process every repository in the listing and build the run report.
    pub async fn run(&self, workspace: &str, listing: Listing) -> Result<Report, SyncError> {
        let started = Instant::now();
        let repos = dedupe_slugs(listing.repos);

        let mut builder = ReportBuilder::new(workspace, repos.len());
        builder.set_missing_projects(listing.missing_projects);

        if !self.options.dry_run {
            tokio::fs::create_dir_all(&self.options.dest_root)
                .await
                .map_err(|e| {
                    SyncError::Config(format!(
                        "cannot create destination root {:?}: {}",
                        self.options.dest_root, e
                    ))
                })?;
        }

        let jobs = self.options.jobs.max(1);
        info!(
            repos = repos.len(),
            jobs,
            dry_run = self.options.dry_run,
            "starting sync run"
        );

        let semaphore = Arc::new(Semaphore::new(jobs));
        let mut futures = FuturesUnordered::new();

        for (index, repo) in repos.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);

            futures.push(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");

                if self.shutdown.load(Ordering::SeqCst) {
                    debug!(slug = %repo.slug, "shutdown flagged, not starting");
                    return (index, RepoEntry::interrupted(&repo));
                }

                let entry = self.process_repo(&repo).await;
                (index, entry)
            });
        }

        while let Some((index, entry)) = futures.next().await {
            builder.record(index, entry);
        }

        let report = builder.finish();
        info!(
            "sync run finished in {:.2}s: {}",
            started.elapsed().as_secs_f64(),
            report.summary
        );

        Ok(report)
    }

    /// Run one repository through the pipeline, folding any error into its
    /// report entry.
    async fn process_repo(&self, repo: &RemoteRepo) -> RepoEntry {
        match self.sync_one(repo).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(slug = %repo.slug, error = %e, "repository failed");
                RepoEntry::failed(repo, &e)
            }
        }
    }

    async fn sync_one(&self, repo: &RemoteRepo) -> Result<RepoEntry, SyncError> {
        let path = mirror::clone_path(&self.options.dest_root, &repo.slug);
        let state = mirror::resolve(self.git.as_ref(), &self.options.dest_root, repo).await?;

        match state {
            MirrorState::Absent => self.sync_absent(repo, &path).await,
            MirrorState::Cloned => self.sync_present(repo, &path).await,
        }
    }

    async fn sync_absent(&self, repo: &RemoteRepo, path: &Path) -> Result<RepoEntry, SyncError> {
        if self.options.dry_run {
            debug!(slug = %repo.slug, "dry-run: would clone");
            return Ok(RepoEntry::completed(repo, SyncAction::Cloned, None, true));
        }

        self.clone_with_retry(repo, path).await?;
        info!(slug = %repo.slug, path = %path.display(), "cloned");

        let status = self.analyze(repo, path).await?;
        Ok(RepoEntry::completed(
            repo,
            SyncAction::Cloned,
            Some(status),
            false,
        ))
    }

    async fn sync_present(&self, repo: &RemoteRepo, path: &Path) -> Result<RepoEntry, SyncError> {
        if !self.options.dry_run {
            self.fetch_with_retry(repo, path).await?;
        }

        let status = self.analyze(repo, path).await?;

        let branch = match status.default_branch.clone() {
            Some(branch) => branch,
            None => {
                return Ok(RepoEntry::completed(
                    repo,
                    SyncAction::NoDefaultBranch,
                    Some(status),
                    self.options.dry_run,
                ))
            }
        };

        match ff_decision(self.options.ff_default, &status) {
            Decision::FastForward => {
                if self.options.dry_run {
                    return Ok(RepoEntry::completed(
                        repo,
                        SyncAction::FastForwarded,
                        Some(status),
                        true,
                    ));
                }

                self.fast_forward(repo, path, &branch).await?;

                // Re-measure so the entry shows the post-sync state.
                let status = self.analyze(repo, path).await?;
                Ok(RepoEntry::completed(
                    repo,
                    SyncAction::FastForwarded,
                    Some(status),
                    false,
                ))
            }
            Decision::Settled(action) => Ok(RepoEntry::completed(
                repo,
                action,
                Some(status),
                self.options.dry_run,
            )),
        }
    }

    async fn clone_with_retry(&self, repo: &RemoteRepo, path: &Path) -> Result<(), SyncError> {
        match self.clone_once(repo, path).await {
            Err(e) if self.options.retry && e.is_retryable() => {
                warn!(slug = %repo.slug, error = %e, "clone failed, retrying once");
                self.clone_once(repo, path).await
            }
            other => other,
        }
    }

    async fn clone_once(&self, repo: &RemoteRepo, path: &Path) -> Result<(), SyncError> {
        let attempt = timeout(
            self.options.timeout,
            self.git.clone_repo(&repo.clone_url, path),
        )
        .await;

        let err = match attempt {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => SyncError::Clone {
                slug: repo.slug.clone(),
                message: e.message,
            },
            Err(_) => SyncError::Transient(format!(
                "clone of {} timed out after {}s",
                repo.slug,
                self.options.timeout.as_secs()
            )),
        };

        // Never leave a half-written clone occupying the slot.
        remove_partial_clone(path).await;
        Err(err)
    }

    async fn fetch_with_retry(&self, repo: &RemoteRepo, path: &Path) -> Result<(), SyncError> {
        match self.fetch_once(repo, path).await {
            Err(e) if self.options.retry && e.is_retryable() => {
                warn!(slug = %repo.slug, error = %e, "fetch failed, retrying once");
                self.fetch_once(repo, path).await
            }
            other => other,
        }
    }

    async fn fetch_once(&self, repo: &RemoteRepo, path: &Path) -> Result<(), SyncError> {
        match timeout(self.options.timeout, self.git.fetch_prune(path)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SyncError::Fetch {
                slug: repo.slug.clone(),
                message: e.message,
            }),
            Err(_) => Err(SyncError::Transient(format!(
                "fetch of {} timed out after {}s",
                repo.slug,
                self.options.timeout.as_secs()
            ))),
        }
    }

    async fn fast_forward(
        &self,
        repo: &RemoteRepo,
        path: &Path,
        branch: &str,
    ) -> Result<(), SyncError> {
        match timeout(self.options.timeout, self.git.fast_forward(path, branch)).await {
            Ok(Ok(())) => {
                info!(slug = %repo.slug, branch, "fast-forwarded");
                Ok(())
            }
            Ok(Err(e)) => Err(SyncError::Fetch {
                slug: repo.slug.clone(),
                message: format!("fast-forward of {} failed: {}", branch, e.message),
            }),
            Err(_) => Err(SyncError::Transient(format!(
                "fast-forward of {} timed out after {}s",
                repo.slug,
                self.options.timeout.as_secs()
            ))),
        }
    }

    async fn analyze(&self, repo: &RemoteRepo, path: &Path) -> Result<SyncStatus, SyncError> {
        status::analyze(self.git.as_ref(), path, repo.default_branch.as_deref())
            .await
            .map_err(|e| SyncError::Fetch {
                slug: repo.slug.clone(),
                message: format!("status analysis failed: {}", e),
            })
    }
}

/// Outcome of the fast-forward gate for one analyzed repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    /// Preconditions hold; move the default branch.
    FastForward,
    /// Nothing to change; record this action as-is.
    Settled(SyncAction),
}

/// Decide whether the default branch may move.
///
/// Fast-forwarding requires a clean work tree, zero local commits and a
/// strictly-behind branch. Every other combination is recorded, never
/// resolved.
fn ff_decision(ff_enabled: bool, status: &SyncStatus) -> Decision {
    if !ff_enabled {
        let settled = status.ahead == 0 && status.behind == 0 && !status.dirty;
        return Decision::Settled(if settled {
            SyncAction::UpToDate
        } else {
            SyncAction::Fetched
        });
    }

    if status.dirty {
        return Decision::Settled(SyncAction::Skipped(SkipReason::Dirty));
    }

    match (status.ahead > 0, status.behind > 0) {
        (true, true) => Decision::Settled(SyncAction::Skipped(SkipReason::Diverged)),
        (true, false) => Decision::Settled(SyncAction::Skipped(SkipReason::Ahead)),
        (false, true) => Decision::FastForward,
        (false, false) => Decision::Settled(SyncAction::UpToDate),
    }
}

/// Drop listing entries that would share a clone directory, keeping the
/// first occurrence, so no two workers touch the same path.
fn dedupe_slugs(repos: Vec<RemoteRepo>) -> Vec<RemoteRepo> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(repos.len());
    for repo in repos {
        if seen.insert(repo.slug.clone()) {
            out.push(repo);
        } else {
            warn!(slug = %repo.slug, "duplicate slug in listing, keeping first");
        }
    }
    out
}

async fn remove_partial_clone(path: &Path) {
    if path.exists() {
        if let Err(e) = tokio::fs::remove_dir_all(path).await {
            warn!(path = %path.display(), error = %e, "failed to remove partial clone");
        }
    }
}
