//! Error taxonomy for the sync engine.
//!
//! Only `Auth` and `Config` abort a run. Everything else is scoped to one
//! project or one repository and ends up in the drift report's `error`
//! field while the remaining repositories keep processing.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the engine and its collaborators.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Credential or permission failure. Fatal for the entire run.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Top-level configuration problem (missing workspace, empty project
    /// set, bad project key syntax, missing destination root). Fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// A project key or workspace matched nothing on the remote.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or remote hiccup worth exactly one more attempt.
    #[error("transient error: {0}")]
    Transient(String),

    /// Initial clone of a repository failed.
    #[error("clone of {slug} failed: {message}")]
    Clone { slug: String, message: String },

    /// Fetch with prune on an existing clone failed.
    #[error("fetch of {slug} failed: {message}")]
    Fetch { slug: String, message: String },

    /// The local path exists but is not the clone we expect. Never
    /// overwritten; reported and left alone.
    #[error("path conflict at {}: expected origin {expected}, found {found}", .path.display())]
    PathConflict {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

impl SyncError {
    /// Whether the engine's single bounded retry applies.
    ///
    /// Clone and fetch failures are retried unless the underlying message
    /// points at authentication, which another attempt will not fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transient(_) => true,
            SyncError::Clone { message, .. } | SyncError::Fetch { message, .. } => {
                !is_auth_failure(message)
            }
            _ => false,
        }
    }

    /// Stable kind tag used in the report's `error` field.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Auth(_) => "auth",
            SyncError::Config(_) => "config",
            SyncError::NotFound(_) => "not-found",
            SyncError::Transient(_) => "transient",
            SyncError::Clone { .. } => "clone",
            SyncError::Fetch { .. } => "fetch",
            SyncError::PathConflict { .. } => "path-conflict",
        }
    }
}

/// Recognize authentication failures in git output.
///
/// Covers the messages git emits for rejected SSH keys, rejected HTTP
/// credentials, and prompts suppressed by `GIT_TERMINAL_PROMPT=0`.
pub fn is_auth_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("permission denied")
        || lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("could not read password")
        || lower.contains("terminal prompts disabled")
        || lower.contains("access denied")
}
