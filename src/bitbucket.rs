use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::Credentials;
use crate::error::SyncError;

/// Bitbucket Cloud v2 API root.
pub const DEFAULT_API_URL: &str = "https://api.bitbucket.org/2.0";

/// Repositories per page; 100 is the API maximum.
const PAGE_LEN: u32 = 100;

/// HTTP timeout for a single API request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A repository as the workspace listing reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepo {
    /// Uppercase project key the repository belongs to
    pub project: String,
    /// URL-safe repository slug, unique within the workspace
    pub slug: String,
    /// Human-readable repository name
    pub name: String,
    /// Preferred clone URL (SSH when available)
    pub clone_url: String,
    /// Alternate clone URL (HTTPS when SSH was preferred)
    pub clone_url_alt: Option<String>,
    /// Default branch name, when the API reports one
    pub default_branch: Option<String>,
}

/// Result of enumerating a workspace: repositories in the order the API
/// returned them, plus requested project keys that matched nothing.
#[derive(Debug, Default)]
pub struct Listing {
    pub repos: Vec<RemoteRepo>,
    pub missing_projects: Vec<String>,
}

/// Client for the Bitbucket Cloud repositories API
pub struct BitbucketClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl BitbucketClient {
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("repodrift/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Enumerate repositories in the given projects.
    ///
    /// The workspace is walked once, page by page, and filtered client side
    /// so a single pass serves any number of project keys. Keys are compared
    /// uppercase, matching how the API reports them.
    pub async fn list_repositories(
        &self,
        workspace: &str,
        projects: &[String],
    ) -> Result<Listing, SyncError> {
        let wanted: Vec<String> = projects.iter().map(|p| p.to_uppercase()).collect();
        let mut seen: HashSet<String> = HashSet::new();
        let mut repos = Vec::new();

        let mut next_url = Some(format!(
            "{}/repositories/{}?pagelen={}",
            self.base_url, workspace, PAGE_LEN
        ));
        let mut page_count = 0usize;

        while let Some(url) = next_url {
            let page = self.fetch_page(&url).await?;
            page_count += 1;
            debug!(
                page = page_count,
                repos = page.values.len(),
                "fetched repository page"
            );

            for repo in page.values {
                let Some(project) = repo.project.as_ref().map(|p| p.key.to_uppercase()) else {
                    // Workspace-level repository outside any project
                    continue;
                };

                if !wanted.contains(&project) {
                    continue;
                }
                seen.insert(project.clone());

                if let Some(remote) = convert_repo(&project, repo) {
                    repos.push(remote);
                }
            }

            next_url = page.next;
        }

        let missing_projects = wanted
            .iter()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();

        Ok(Listing {
            repos,
            missing_projects,
        })
    }

    /// Fetch one page, retrying a transient failure a single time.
    async fn fetch_page(&self, url: &str) -> Result<RepoPage, SyncError> {
        match self.fetch_page_once(url).await {
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "page fetch failed, retrying once");
                self.fetch_page_once(url).await
            }
            other => other,
        }
    }

    async fn fetch_page_once(&self, url: &str) -> Result<RepoPage, SyncError> {
        let request = self.credentials.apply(self.http.get(url));

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Transient(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::Auth(format!(
                "Bitbucket rejected the credentials ({}); check that the token carries the repository read scope",
                status
            ))),
            StatusCode::NOT_FOUND => Err(SyncError::NotFound(format!(
                "workspace not found: {}",
                url
            ))),
            StatusCode::TOO_MANY_REQUESTS => Err(SyncError::Transient(
                "Bitbucket rate limit hit (429)".to_string(),
            )),
            s if s.is_server_error() => Err(SyncError::Transient(format!(
                "Bitbucket returned {} for {}",
                s, url
            ))),
            s if !s.is_success() => Err(SyncError::Config(format!(
                "unexpected response {} from {}",
                s, url
            ))),
            _ => response
                .json::<RepoPage>()
                .await
                .map_err(|e| SyncError::Transient(format!("invalid response body: {}", e))),
        }
    }
}

// Wire format of GET /2.0/repositories/{workspace}. Only the fields we
// read; everything else in the envelope is ignored.

#[derive(Debug, Deserialize)]
struct RepoPage {
    #[serde(default)]
    values: Vec<ApiRepo>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiRepo {
    slug: String,
    name: String,
    #[serde(default)]
    project: Option<ApiProject>,
    #[serde(default)]
    mainbranch: Option<ApiBranch>,
    #[serde(default)]
    links: ApiLinks,
}

#[derive(Debug, Deserialize)]
struct ApiProject {
    key: String,
}

#[derive(Debug, Deserialize)]
struct ApiBranch {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiLinks {
    #[serde(default)]
    clone: Vec<ApiCloneLink>,
}

#[derive(Debug, Deserialize)]
struct ApiCloneLink {
    name: String,
    href: String,
}

/// Turn a wire repository into a [`RemoteRepo`], preferring the SSH clone
/// link. Repositories without any clone link are dropped with a warning.
fn convert_repo(project: &str, repo: ApiRepo) -> Option<RemoteRepo> {
    let mut ssh = None;
    let mut https = None;
    for link in &repo.links.clone {
        match link.name.as_str() {
            "ssh" => ssh = Some(link.href.clone()),
            "https" => https = Some(link.href.clone()),
            _ => {}
        }
    }

    let (clone_url, clone_url_alt) = match (ssh, https) {
        (Some(ssh), https) => (ssh, https),
        (None, Some(https)) => (https, None),
        (None, None) => {
            warn!(slug = %repo.slug, "repository has no clone links, skipping");
            return None;
        }
    };

    Some(RemoteRepo {
        project: project.to_string(),
        slug: repo.slug,
        name: repo.name,
        clone_url,
        clone_url_alt,
        default_branch: repo.mainbranch.map(|b| b.name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_repo(json: &str) -> ApiRepo {
        serde_json::from_str(json).expect("repo JSON should parse")
    }

    #[test]
    fn page_envelope_parses() {
        let body = r#"{
            "pagelen": 100,
            "values": [
                {
                    "slug": "billing",
                    "name": "Billing",
                    "project": {"key": "DEVOPS", "name": "DevOps"},
                    "mainbranch": {"name": "main", "type": "branch"},
                    "links": {
                        "clone": [
                            {"name": "https", "href": "https://bitbucket.org/acme/billing.git"},
                            {"name": "ssh", "href": "git@bitbucket.org:acme/billing.git"}
                        ]
                    }
                }
            ],
            "next": "https://api.bitbucket.org/2.0/repositories/acme?page=2"
        }"#;

        let page: RepoPage = serde_json::from_str(body).expect("page should parse");
        assert_eq!(page.values.len(), 1);
        assert_eq!(page.values[0].slug, "billing");
        assert!(page.next.is_some());
    }

    #[test]
    fn last_page_has_no_next() {
        let body = r#"{"values": [], "next": null}"#;
        let page: RepoPage = serde_json::from_str(body).expect("page should parse");
        assert!(page.next.is_none());
    }

    #[test]
    fn convert_prefers_ssh_link() {
        let repo = sample_repo(
            r#"{
                "slug": "billing",
                "name": "Billing",
                "links": {"clone": [
                    {"name": "https", "href": "https://bitbucket.org/acme/billing.git"},
                    {"name": "ssh", "href": "git@bitbucket.org:acme/billing.git"}
                ]}
            }"#,
        );

        let remote = convert_repo("DEVOPS", repo).expect("repo should convert");
        assert_eq!(remote.clone_url, "git@bitbucket.org:acme/billing.git");
        assert_eq!(
            remote.clone_url_alt.as_deref(),
            Some("https://bitbucket.org/acme/billing.git")
        );
    }

    #[test]
    fn convert_falls_back_to_https() {
        let repo = sample_repo(
            r#"{
                "slug": "billing",
                "name": "Billing",
                "links": {"clone": [
                    {"name": "https", "href": "https://bitbucket.org/acme/billing.git"}
                ]}
            }"#,
        );

        let remote = convert_repo("DEVOPS", repo).expect("repo should convert");
        assert_eq!(remote.clone_url, "https://bitbucket.org/acme/billing.git");
        assert!(remote.clone_url_alt.is_none());
    }

    #[test]
    fn convert_drops_repo_without_clone_links() {
        let repo = sample_repo(r#"{"slug": "billing", "name": "Billing"}"#);
        assert!(convert_repo("DEVOPS", repo).is_none());
    }

    #[test]
    fn convert_carries_default_branch() {
        let repo = sample_repo(
            r#"{
                "slug": "billing",
                "name": "Billing",
                "mainbranch": {"name": "develop"},
                "links": {"clone": [
                    {"name": "ssh", "href": "git@bitbucket.org:acme/billing.git"}
                ]}
            }"#,
        );

        let remote = convert_repo("DEVOPS", repo).expect("repo should convert");
        assert_eq!(remote.default_branch.as_deref(), Some("develop"));
    }
}
