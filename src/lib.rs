//! repodrift - Bitbucket Workspace Mirroring with Drift Reports
//!
//! repodrift enumerates every repository in the selected Bitbucket Cloud
//! projects, clones what is missing, fetch-prunes what exists, and reports
//! how far each local clone has drifted from origin. It never merges,
//! rebases or force-pushes; the only ref it ever moves is a default branch
//! that is strictly behind origin, and only when asked.
//!
//! ## Core Features
//!
//! - **Project Enumeration**: paginated repository discovery via the
//!   Bitbucket Cloud 2.0 API, filtered by project key
//! - **Non-destructive Sync**: clone or fetch-with-prune, plus an optional
//!   fast-forward of clean, strictly-behind default branches
//! - **Drift Reports**: ahead/behind counts, dirty-tree flags and unpushed
//!   branches per repository, rendered as text or JSON
//! - **Failure Isolation**: one broken repository never aborts the rest of
//!   the run
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`bitbucket`]: Bitbucket Cloud API client and pagination
//! - [`engine`]: Clone/fetch/fast-forward orchestration

pub mod auth;
pub mod bitbucket;
pub mod config;
pub mod engine;
pub mod error;
pub mod git;
pub mod health;
pub mod mirror;
pub mod report;
pub mod status;

pub use auth::Credentials;
pub use bitbucket::{BitbucketClient, Listing, RemoteRepo};
pub use config::Config;
pub use engine::{EngineOptions, SyncEngine};
pub use error::SyncError;
pub use health::HealthCheck;
pub use report::{Report, ReportFormat};
pub use status::SyncStatus;
