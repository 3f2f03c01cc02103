//! Credential resolution for the Bitbucket Cloud API.
//!
//! Credentials are resolved once at the process boundary and passed down
//! as an immutable value; nothing deeper in the call graph reads the
//! environment.

use std::env;
use std::fmt;

use tracing::debug;

use crate::error::SyncError;

/// Environment variables consulted, in priority order.
pub const ACCESS_TOKEN_VAR: &str = "BITBUCKET_ACCESS_TOKEN";
pub const API_USERNAME_VAR: &str = "BITBUCKET_USERNAME";
pub const API_TOKEN_VAR: &str = "BITBUCKET_API_TOKEN";
pub const APP_USERNAME_VAR: &str = "BB_USERNAME";
pub const APP_PASSWORD_VAR: &str = "BB_APP_PASSWORD";

/// Resolved Bitbucket credentials.
#[derive(Clone)]
pub enum Credentials {
    /// Workspace/project/repository access token, sent as a bearer header.
    /// Needs the `repository:read` and `project:read` scopes.
    AccessToken(String),
    /// Atlassian account email plus API token, sent as basic auth.
    ApiToken { username: String, token: String },
    /// Legacy app password, sent as basic auth.
    AppPassword { username: String, password: String },
}

impl Credentials {
    /// Resolve credentials from the environment.
    ///
    /// Priority: access token, then username + API token, then the legacy
    /// app password pair. Empty variables count as unset.
    pub fn from_env() -> Result<Self, SyncError> {
        if let Some(token) = non_empty_var(ACCESS_TOKEN_VAR) {
            debug!("using {} for authentication", ACCESS_TOKEN_VAR);
            return Ok(Credentials::AccessToken(token));
        }

        if let (Some(username), Some(token)) =
            (non_empty_var(API_USERNAME_VAR), non_empty_var(API_TOKEN_VAR))
        {
            debug!("using {}/{} for authentication", API_USERNAME_VAR, API_TOKEN_VAR);
            return Ok(Credentials::ApiToken { username, token });
        }

        if let (Some(username), Some(password)) =
            (non_empty_var(APP_USERNAME_VAR), non_empty_var(APP_PASSWORD_VAR))
        {
            debug!("using legacy {}/{} for authentication", APP_USERNAME_VAR, APP_PASSWORD_VAR);
            return Ok(Credentials::AppPassword { username, password });
        }

        Err(SyncError::Auth(missing_credentials_help()))
    }

    /// Short label for logs and diagnostics; never the secret itself.
    pub fn method(&self) -> &'static str {
        match self {
            Credentials::AccessToken(_) => "access-token",
            Credentials::ApiToken { .. } => "api-token",
            Credentials::AppPassword { .. } => "app-password",
        }
    }

    /// Decorate an outgoing API request with these credentials.
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Credentials::AccessToken(token) => request.bearer_auth(token),
            Credentials::ApiToken { username, token } => {
                request.basic_auth(username, Some(token))
            }
            Credentials::AppPassword { username, password } => {
                request.basic_auth(username, Some(password))
            }
        }
    }
}

// Secrets must not leak through debug logging of surrounding structs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials({})", self.method())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Actionable guidance naming exactly the variables the resolver checks.
pub fn missing_credentials_help() -> String {
    format!(
        "no Bitbucket credentials found. Set {} (workspace access token), \
         or {} and {} (Atlassian API token), \
         or {} and {} (legacy app password)",
        ACCESS_TOKEN_VAR, API_USERNAME_VAR, API_TOKEN_VAR, APP_USERNAME_VAR, APP_PASSWORD_VAR,
    )
}
