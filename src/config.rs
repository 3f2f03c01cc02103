use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::report::ReportFormat;

/// Main configuration structure for repodrift.
///
/// Everything here can also be supplied (and overridden) on the command
/// line; credentials are deliberately absent and come from the environment.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Bitbucket workspace slug (e.g. "sportpursuit")
    #[serde(default)]
    pub workspace: String,

    /// Project keys whose repositories are mirrored
    #[serde(default)]
    pub projects: Vec<String>,

    /// Destination root directory for local clones
    #[serde(default = "default_dest_root")]
    pub dest_root: String,

    /// Bitbucket API base URL (override for Server/DC or tests)
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Repository slugs or glob patterns to skip
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Synchronization behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Report rendering settings
    #[serde(default)]
    pub report: ReportConfig,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Worker pool width; 1 processes repositories strictly in sequence
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Per-repository timeout for clone/fetch/fast-forward, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Fast-forward default branches that are strictly behind origin
    #[serde(default)]
    pub ff_default: bool,

    /// Retry transient clone/fetch failures once
    #[serde(default = "default_true")]
    pub retry: bool,
}

/// Report configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReportConfig {
    /// Output format: "text" or "json"
    #[serde(default)]
    pub format: ReportFormat,
}

// Default value functions
fn default_dest_root() -> String {
    "${HOME}/bitbucket".to_string()
}
fn default_api_url() -> String {
    crate::bitbucket::DEFAULT_API_URL.to_string()
}
fn default_jobs() -> usize {
    4
}
fn default_timeout() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            timeout_secs: default_timeout(),
            ff_default: false,
            retry: default_true(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: ReportFormat::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: String::new(),
            projects: Vec::new(),
            dest_root: default_dest_root(),
            api_url: default_api_url(),
            exclude: Vec::new(),
            sync: SyncConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to the
    /// built-in defaults when no file exists yet.
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();
            config.expand_paths()?;
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("repodrift").join("config.yml"))
    }

    /// Expand `~` and environment variables in configured paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.dest_root = shellexpand::full(&self.dest_root)
            .context("Failed to expand dest_root path")?
            .into_owned();

        Ok(())
    }

    /// Destination root as a path
    pub fn dest_root_path(&self) -> PathBuf {
        PathBuf::from(&self.dest_root)
    }

    /// Project keys normalized the way the Bitbucket API reports them:
    /// trimmed, uppercased, duplicates removed, order preserved.
    pub fn normalized_projects(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for key in &self.projects {
            let key = key.trim().to_uppercase();
            if !key.is_empty() && !seen.contains(&key) {
                seen.push(key);
            }
        }
        seen
    }

    /// Validate run-level preconditions. These abort the whole run; nothing
    /// per-repository is checked here.
    pub fn validate(&self, require_dest: bool) -> Result<(), SyncError> {
        if self.workspace.trim().is_empty() {
            return Err(SyncError::Config(
                "no workspace set; use --workspace, BB_WORKSPACE, or the config file".into(),
            ));
        }

        let projects = self.normalized_projects();
        if projects.is_empty() {
            return Err(SyncError::Config(
                "no project keys given; use --projects KEY[,KEY...]".into(),
            ));
        }
        for key in &projects {
            if !is_valid_project_key(key) {
                return Err(SyncError::Config(format!(
                    "invalid project key '{}': keys start with a letter and contain only letters, digits and underscores",
                    key
                )));
            }
        }

        if require_dest && self.dest_root.trim().is_empty() {
            return Err(SyncError::Config(
                "no destination root set; use --dest or dest_root in the config file".into(),
            ));
        }

        Ok(())
    }

    /// Check whether a repository should be skipped by the exclusion list.
    /// Patterns support `*` wildcards, anything else is an exact match.
    pub fn is_excluded(&self, slug: &str) -> bool {
        self.exclude.iter().any(|pattern| {
            if pattern.contains('*') {
                let pattern_regex = pattern.replace('.', r"\.").replace('*', ".*");

                regex::Regex::new(&format!("^{}$", pattern_regex))
                    .map(|re| re.is_match(slug))
                    .unwrap_or(false)
            } else {
                slug == pattern
            }
        })
    }
}

/// Bitbucket project keys: a letter followed by letters, digits or
/// underscores. Checked after uppercasing.
pub fn is_valid_project_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
