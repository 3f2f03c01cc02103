use std::path::{Path, PathBuf};

use crate::bitbucket::RemoteRepo;
use crate::error::SyncError;
use crate::git::GitBackend;

/// What occupies a repository's slot under the destination root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    /// Nothing on disk; a fresh clone is needed.
    Absent,
    /// An existing clone whose origin matches the remote repository.
    Cloned,
}

/// Local path a repository mirrors to: `<dest_root>/<slug>`.
pub fn clone_path(dest_root: &Path, slug: &str) -> PathBuf {
    dest_root.join(slug)
}

/// Inspect the local slot for `repo` and decide whether it can be used.
///
/// Anything unexpected at the path is a conflict, never something to
/// overwrite: a plain file, a directory that is not a git clone, or a
/// clone tracking a different origin all refuse the slot.
pub async fn resolve(
    git: &dyn GitBackend,
    dest_root: &Path,
    repo: &RemoteRepo,
) -> Result<MirrorState, SyncError> {
    let path = clone_path(dest_root, &repo.slug);

    if !path.exists() {
        return Ok(MirrorState::Absent);
    }

    if !path.is_dir() {
        return Err(SyncError::PathConflict {
            path,
            expected: repo.clone_url.clone(),
            found: "a non-directory file".to_string(),
        });
    }

    if !path.join(".git").is_dir() {
        return Err(SyncError::PathConflict {
            path,
            expected: repo.clone_url.clone(),
            found: "a directory that is not a git clone".to_string(),
        });
    }

    let origin = match git.remote_url(&path, "origin").await {
        Ok(url) => url,
        Err(e) => {
            return Err(SyncError::PathConflict {
                path,
                expected: repo.clone_url.clone(),
                found: format!("a clone without a usable origin remote ({})", e.message),
            })
        }
    };

    let matches = urls_match(&origin, &repo.clone_url)
        || repo
            .clone_url_alt
            .as_deref()
            .map(|alt| urls_match(&origin, alt))
            .unwrap_or(false);

    if matches {
        Ok(MirrorState::Cloned)
    } else {
        Err(SyncError::PathConflict {
            path,
            expected: repo.clone_url.clone(),
            found: origin,
        })
    }
}

/// Compare two git URLs ignoring scheme, user info, port and `.git` suffix.
pub fn urls_match(a: &str, b: &str) -> bool {
    normalize_git_url(a) == normalize_git_url(b)
}

/// Reduce a clone URL to `host/path` (or a bare filesystem path) so the
/// SSH, HTTPS and scp-like spellings of one repository compare equal.
fn normalize_git_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    let url = url.strip_suffix(".git").unwrap_or(url);

    let stripped = ["ssh://", "git://", "https://", "http://", "file://"]
        .iter()
        .find_map(|scheme| url.strip_prefix(scheme));

    let canonical = match stripped {
        Some(rest) => {
            let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
            format!("{}/{}", normalize_authority(authority), path)
        }
        None => {
            // scp-like syntax: [user@]host:path. A colon after the first
            // slash is part of a filesystem path, not an authority.
            match url.split_once(':') {
                Some((authority, path)) if !authority.contains('/') => {
                    format!("{}/{}", normalize_authority(authority), path)
                }
                _ => url.to_string(),
            }
        }
    };

    canonical.replace("//", "/")
}

fn normalize_authority(authority: &str) -> String {
    let host = authority
        .rsplit_once('@')
        .map(|(_, host)| host)
        .unwrap_or(authority);
    let host = host.split(':').next().unwrap_or(host);
    host.to_lowercase()
}
