use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

use crate::bitbucket::RemoteRepo;
use crate::error::SyncError;
use crate::status::SyncStatus;

/// Output format for the rendered report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!("unknown format '{}', expected text or json", other)),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Text => write!(f, "text"),
            ReportFormat::Json => write!(f, "json"),
        }
    }
}

/// Why a fast-forward was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Uncommitted changes in the work tree
    Dirty,
    /// Local default branch holds commits origin lacks
    Ahead,
    /// Both sides hold commits the other lacks
    Diverged,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Dirty => "dirty",
            SkipReason::Ahead => "ahead",
            SkipReason::Diverged => "diverged",
        }
    }
}

/// What the run did (or, under `--dry-run`, would do) for one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Cloned,
    Fetched,
    FastForwarded,
    UpToDate,
    Skipped(SkipReason),
    /// No API default branch and no main/master on origin
    NoDefaultBranch,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Cloned => "cloned",
            SyncAction::Fetched => "fetched",
            SyncAction::FastForwarded => "fast-forwarded",
            SyncAction::UpToDate => "up-to-date",
            SyncAction::Skipped(_) => "skipped",
            SyncAction::NoDefaultBranch => "no-default-branch",
        }
    }

    pub fn skip_reason(&self) -> Option<&'static str> {
        match self {
            SyncAction::Skipped(reason) => Some(reason.as_str()),
            _ => None,
        }
    }

    /// Actions that touch the filesystem, prefixed with `would-` in
    /// dry-run text output.
    fn is_mutation(&self) -> bool {
        matches!(
            self,
            SyncAction::Cloned | SyncAction::Fetched | SyncAction::FastForwarded
        )
    }
}

impl Serialize for SyncAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Per-repository failure as it appears in the report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReportError {
    pub kind: &'static str,
    pub message: String,
}

impl From<&SyncError> for ReportError {
    fn from(err: &SyncError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// One repository's row in the report.
#[derive(Debug, Clone, Serialize)]
pub struct RepoEntry {
    pub project: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<SyncAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<&'static str>,
    pub planned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SyncStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportError>,
}

impl RepoEntry {
    pub fn completed(
        repo: &RemoteRepo,
        action: SyncAction,
        status: Option<SyncStatus>,
        planned: bool,
    ) -> Self {
        Self {
            project: repo.project.clone(),
            slug: repo.slug.clone(),
            skip_reason: action.skip_reason(),
            action: Some(action),
            planned,
            status,
            error: None,
        }
    }

    pub fn failed(repo: &RemoteRepo, error: &SyncError) -> Self {
        Self {
            project: repo.project.clone(),
            slug: repo.slug.clone(),
            action: None,
            skip_reason: None,
            planned: false,
            status: None,
            error: Some(ReportError::from(error)),
        }
    }

    /// Entry for a repository the run never reached before shutdown.
    pub fn interrupted(repo: &RemoteRepo) -> Self {
        Self {
            project: repo.project.clone(),
            slug: repo.slug.clone(),
            action: None,
            skip_reason: None,
            planned: false,
            status: None,
            error: Some(ReportError {
                kind: "interrupted",
                message: "run interrupted before this repository started".to_string(),
            }),
        }
    }

    /// Render the part of the text line after the slug.
    fn describe(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(error) = &self.error {
            parts.push(format!("[failed: {}] {}", error.kind, error.message));
        } else if let Some(action) = self.action {
            let label = match (self.planned && action.is_mutation(), action) {
                (true, SyncAction::Cloned) => "would-clone".to_string(),
                (true, SyncAction::Fetched) => "would-fetch".to_string(),
                (true, SyncAction::FastForwarded) => "would-fast-forward".to_string(),
                (_, SyncAction::Skipped(reason)) => format!("skipped: {}", reason.as_str()),
                (_, action) => action.as_str().to_string(),
            };
            parts.push(format!("[{}]", label));
        }

        if let Some(status) = &self.status {
            if status.ahead > 0 || status.behind > 0 {
                parts.push(format!("+{}/-{}", status.ahead, status.behind));
            }
            if status.dirty {
                parts.push("dirty".to_string());
            }
            if !status.unpushed.is_empty() {
                let branches: Vec<String> = status
                    .unpushed
                    .iter()
                    .map(|lead| format!("{}(+{})", lead.branch, lead.commits))
                    .collect();
                parts.push(format!("unpushed: {}", branches.join(", ")));
            }
        }

        parts.join(" ")
    }
}

/// Aggregate counters over the report entries.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub cloned: usize,
    pub fetched: usize,
    pub fast_forwarded: usize,
    pub up_to_date: usize,
    pub skipped: usize,
    pub dirty: usize,
    pub failed: usize,
}

impl Summary {
    fn tally(entries: &[RepoEntry]) -> Self {
        let mut summary = Summary {
            total: entries.len(),
            ..Default::default()
        };

        for entry in entries {
            if entry.error.is_some() {
                summary.failed += 1;
            }
            match entry.action {
                Some(SyncAction::Cloned) => summary.cloned += 1,
                Some(SyncAction::Fetched) => summary.fetched += 1,
                Some(SyncAction::FastForwarded) => summary.fast_forwarded += 1,
                Some(SyncAction::UpToDate) => summary.up_to_date += 1,
                Some(SyncAction::Skipped(_)) => summary.skipped += 1,
                Some(SyncAction::NoDefaultBranch) | None => {}
            }
            if entry.status.as_ref().map(|s| s.dirty).unwrap_or(false) {
                summary.dirty += 1;
            }
        }

        summary
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} repos | {} cloned | {} fetched | {} fast-forwarded | {} up-to-date | {} skipped | {} dirty | {} failed",
            self.total,
            self.cloned,
            self.fetched,
            self.fast_forwarded,
            self.up_to_date,
            self.skipped,
            self.dirty,
            self.failed
        )
    }
}

/// The complete run report, entries in enumeration order.
#[derive(Debug, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub workspace: String,
    pub entries: Vec<RepoEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_projects: Vec<String>,
    pub summary: Summary,
}

impl Report {
    /// True when anything went wrong: a per-repository failure or a project
    /// key that matched no repository.
    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|e| e.error.is_some()) || !self.missing_projects.is_empty()
    }

    pub fn render(&self, format: ReportFormat) -> anyhow::Result<String> {
        match format {
            ReportFormat::Text => Ok(self.to_string()),
            ReportFormat::Json => Ok(serde_json::to_string_pretty(self)?),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();

        let _ = writeln!(out, "sync report for workspace {}", self.workspace);
        for entry in &self.entries {
            let _ = writeln!(out, "- {} {}", entry.slug, entry.describe());
        }
        if !self.missing_projects.is_empty() {
            let _ = writeln!(
                out,
                "missing projects: {}",
                self.missing_projects.join(", ")
            );
        }
        let _ = write!(out, "summary: {}", self.summary);

        f.write_str(&out)
    }
}

/// Collects entries produced by concurrent workers back into enumeration
/// order. Every repository index gets exactly one slot.
pub struct ReportBuilder {
    workspace: String,
    slots: Vec<Option<RepoEntry>>,
    missing_projects: Vec<String>,
}

impl ReportBuilder {
    pub fn new(workspace: &str, repo_count: usize) -> Self {
        let mut slots = Vec::with_capacity(repo_count);
        slots.resize_with(repo_count, || None);

        Self {
            workspace: workspace.to_string(),
            slots,
            missing_projects: Vec::new(),
        }
    }

    pub fn set_missing_projects(&mut self, keys: Vec<String>) {
        self.missing_projects = keys;
    }

    pub fn record(&mut self, index: usize, entry: RepoEntry) {
        debug_assert!(self.slots[index].is_none(), "index recorded twice");
        self.slots[index] = Some(entry);
    }

    pub fn finish(self) -> Report {
        let entries: Vec<RepoEntry> = self.slots.into_iter().flatten().collect();
        let summary = Summary::tally(&entries);

        Report {
            generated_at: Utc::now(),
            workspace: self.workspace,
            entries,
            missing_projects: self.missing_projects,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::BranchLead;

    fn remote(slug: &str) -> RemoteRepo {
        RemoteRepo {
            project: "DEVOPS".to_string(),
            slug: slug.to_string(),
            name: slug.to_string(),
            clone_url: format!("git@bitbucket.org:acme/{}.git", slug),
            clone_url_alt: None,
            default_branch: Some("main".to_string()),
        }
    }

    fn drifted_status() -> SyncStatus {
        SyncStatus {
            default_branch: Some("main".to_string()),
            ahead: 2,
            behind: 3,
            dirty: true,
            unpushed: vec![BranchLead {
                branch: "feature/login".to_string(),
                commits: 2,
            }],
        }
    }

    #[test]
    fn action_strings_are_stable() {
        assert_eq!(SyncAction::Cloned.as_str(), "cloned");
        assert_eq!(SyncAction::FastForwarded.as_str(), "fast-forwarded");
        assert_eq!(SyncAction::Skipped(SkipReason::Diverged).as_str(), "skipped");
        assert_eq!(
            SyncAction::Skipped(SkipReason::Diverged).skip_reason(),
            Some("diverged")
        );
        assert_eq!(SyncAction::UpToDate.skip_reason(), None);
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("TEXT".parse::<ReportFormat>().unwrap(), ReportFormat::Text);
        assert_eq!("json".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert!("yaml".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn builder_keeps_enumeration_order() {
        let mut builder = ReportBuilder::new("acme", 3);

        // Workers finish out of order.
        builder.record(
            2,
            RepoEntry::completed(&remote("c"), SyncAction::UpToDate, None, false),
        );
        builder.record(
            0,
            RepoEntry::completed(&remote("a"), SyncAction::Cloned, None, false),
        );
        builder.record(
            1,
            RepoEntry::completed(&remote("b"), SyncAction::Fetched, None, false),
        );

        let report = builder.finish();
        let slugs: Vec<&str> = report.entries.iter().map(|e| e.slug.as_str()).collect();
        assert_eq!(slugs, vec!["a", "b", "c"]);
    }

    #[test]
    fn summary_counts_actions_dirty_and_failures() {
        let mut builder = ReportBuilder::new("acme", 4);
        builder.record(
            0,
            RepoEntry::completed(&remote("a"), SyncAction::Cloned, None, false),
        );
        builder.record(
            1,
            RepoEntry::completed(
                &remote("b"),
                SyncAction::Skipped(SkipReason::Dirty),
                Some(drifted_status()),
                false,
            ),
        );
        builder.record(
            2,
            RepoEntry::failed(
                &remote("c"),
                &SyncError::Fetch {
                    slug: "c".to_string(),
                    message: "connection reset".to_string(),
                },
            ),
        );
        builder.record(3, RepoEntry::interrupted(&remote("d")));

        let report = builder.finish();
        assert_eq!(report.summary.total, 4);
        assert_eq!(report.summary.cloned, 1);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.summary.dirty, 1);
        assert_eq!(report.summary.failed, 2);
        assert!(report.has_failures());
    }

    #[test]
    fn missing_projects_count_as_failures() {
        let mut builder = ReportBuilder::new("acme", 1);
        builder.record(
            0,
            RepoEntry::completed(&remote("a"), SyncAction::UpToDate, None, false),
        );
        builder.set_missing_projects(vec!["GONE".to_string()]);

        let report = builder.finish();
        assert!(report.has_failures());
    }

    #[test]
    fn text_rendering_shows_drift_bits() {
        let mut builder = ReportBuilder::new("acme", 2);
        builder.record(
            0,
            RepoEntry::completed(
                &remote("gateway"),
                SyncAction::Fetched,
                Some(drifted_status()),
                false,
            ),
        );
        builder.record(
            1,
            RepoEntry::completed(&remote("billing"), SyncAction::Cloned, None, false),
        );

        let text = builder.finish().to_string();
        assert!(text.contains("sync report for workspace acme"));
        assert!(text.contains("- gateway [fetched] +2/-3 dirty unpushed: feature/login(+2)"));
        assert!(text.contains("- billing [cloned]"));
        assert!(text.contains("summary: 2 repos | 1 cloned"));
    }

    #[test]
    fn text_rendering_prefixes_planned_mutations() {
        let mut builder = ReportBuilder::new("acme", 2);
        builder.record(
            0,
            RepoEntry::completed(&remote("billing"), SyncAction::Cloned, None, true),
        );
        builder.record(
            1,
            RepoEntry::completed(&remote("gateway"), SyncAction::FastForwarded, None, true),
        );

        let text = builder.finish().to_string();
        assert!(text.contains("- billing [would-clone]"));
        assert!(text.contains("- gateway [would-fast-forward]"));
    }

    #[test]
    fn text_rendering_shows_skip_reason_and_error() {
        let mut builder = ReportBuilder::new("acme", 2);
        builder.record(
            0,
            RepoEntry::completed(
                &remote("gateway"),
                SyncAction::Skipped(SkipReason::Diverged),
                None,
                false,
            ),
        );
        builder.record(
            1,
            RepoEntry::failed(
                &remote("billing"),
                &SyncError::Clone {
                    slug: "billing".to_string(),
                    message: "Permission denied (publickey)".to_string(),
                },
            ),
        );
        builder.set_missing_projects(vec!["GONE".to_string(), "OLD".to_string()]);

        let text = builder.finish().to_string();
        assert!(text.contains("- gateway [skipped: diverged]"));
        assert!(text.contains("- billing [failed: clone]"));
        assert!(text.contains("missing projects: GONE, OLD"));
    }

    #[test]
    fn json_rendering_has_stable_fields() {
        let mut builder = ReportBuilder::new("acme", 1);
        builder.record(
            0,
            RepoEntry::completed(
                &remote("gateway"),
                SyncAction::Skipped(SkipReason::Dirty),
                Some(drifted_status()),
                false,
            ),
        );
        builder.set_missing_projects(vec!["GONE".to_string()]);

        let report = builder.finish();
        let json = report.render(ReportFormat::Json).expect("render json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");

        assert_eq!(value["workspace"], "acme");
        assert_eq!(value["entries"][0]["slug"], "gateway");
        assert_eq!(value["entries"][0]["action"], "skipped");
        assert_eq!(value["entries"][0]["skip_reason"], "dirty");
        assert_eq!(value["entries"][0]["status"]["behind"], 3);
        assert_eq!(value["entries"][0]["status"]["unpushed"][0]["commits"], 2);
        assert_eq!(value["missing_projects"][0], "GONE");
        assert_eq!(value["summary"]["dirty"], 1);
        assert!(value["generated_at"].is_string());
    }

    #[test]
    fn failed_entries_omit_action_in_json() {
        let mut builder = ReportBuilder::new("acme", 1);
        builder.record(
            0,
            RepoEntry::failed(
                &remote("billing"),
                &SyncError::Transient("timed out".to_string()),
            ),
        );

        let report = builder.finish();
        let json = report.render(ReportFormat::Json).expect("render json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");

        assert!(value["entries"][0].get("action").is_none());
        assert_eq!(value["entries"][0]["error"]["kind"], "transient");
    }
}
