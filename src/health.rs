//! Preflight checks for the `doctor` command: verify the environment can
//! actually run a sync before any network or filesystem work starts.

use crate::auth::{missing_credentials_help, Credentials};
use crate::config::Config;
use std::path::Path;

/// Result of the preflight checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// Bitbucket credential resolution status
    pub credentials: CheckResult,
    /// Destination root status
    pub dest_root: CheckResult,
    /// SSH key status (warning only; clones prefer SSH URLs)
    pub ssh: CheckResult,
}

/// Result of an individual check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

#[allow(dead_code)]
impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: true,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all preflight checks
    pub fn run(config: &Config) -> Self {
        Self {
            git: Self::check_git(),
            credentials: Self::check_credentials(),
            dest_root: Self::check_dest_root(config),
            ssh: Self::check_ssh(),
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.git.passed && self.credentials.passed && self.dest_root.passed
        // SSH is optional, not included in required checks
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        [&self.git, &self.credentials, &self.dest_root, &self.ssh]
            .into_iter()
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        [&self.git, &self.credentials, &self.dest_root, &self.ssh]
            .into_iter()
            .filter(|r| r.is_warning)
            .collect()
    }

    /// Check git installation
    fn check_git() -> CheckResult {
        match std::process::Command::new("git").arg("--version").output() {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                CheckResult::ok_with_details("Git installed", version.trim().to_string())
            }
            Ok(_) => CheckResult::error("Git command failed"),
            Err(_) => CheckResult::error_with_details(
                "Git not found in PATH",
                "Install git: https://git-scm.com/downloads",
            ),
        }
    }

    /// Check Bitbucket credentials resolve from the environment
    fn check_credentials() -> CheckResult {
        match Credentials::from_env() {
            Ok(creds) => CheckResult::ok_with_details(
                "Bitbucket credentials found",
                format!("method: {}", creds.method()),
            ),
            Err(_) => CheckResult::error_with_details(
                "No Bitbucket credentials in the environment",
                missing_credentials_help(),
            ),
        }
    }

    /// Check the destination root. A missing directory is only a warning
    /// since sync creates it on first run.
    fn check_dest_root(config: &Config) -> CheckResult {
        if config.dest_root.trim().is_empty() {
            return CheckResult::error("No destination root configured");
        }

        let path = Path::new(&config.dest_root);
        if path.is_dir() {
            CheckResult::ok_with_details("Destination root exists", config.dest_root.clone())
        } else if path.exists() {
            CheckResult::error_with_details(
                "Destination root is not a directory",
                config.dest_root.clone(),
            )
        } else {
            CheckResult::warning_with_details(
                "Destination root does not exist yet",
                format!("It will be created on the first sync: {}", config.dest_root),
            )
        }
    }

    /// Check SSH configuration (warning only)
    fn check_ssh() -> CheckResult {
        let ssh_dir = dirs::home_dir().unwrap_or_default().join(".ssh");
        if !ssh_dir.exists() {
            return CheckResult::warning_with_details(
                "~/.ssh directory not found",
                "SSH cloning may not work. Run: ssh-keygen -t ed25519",
            );
        }

        let ssh_keys = ["id_rsa", "id_ed25519", "id_ecdsa"];
        let found_keys: Vec<_> = ssh_keys
            .iter()
            .filter(|key| ssh_dir.join(key).exists())
            .copied()
            .collect();

        if found_keys.is_empty() {
            CheckResult::warning_with_details(
                "No SSH keys found",
                "SSH cloning may not work. Run: ssh-keygen -t ed25519 -C \"your_email@example.com\"",
            )
        } else {
            CheckResult::ok_with_details("SSH keys found", found_keys.join(", "))
        }
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 4] {
        [
            ("Git Installation", &self.git),
            ("Bitbucket Credentials", &self.credentials),
            ("Destination Root", &self.dest_root),
            ("SSH Configuration", &self.ssh),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_credential_env() {
        for var in [
            crate::auth::ACCESS_TOKEN_VAR,
            crate::auth::API_USERNAME_VAR,
            crate::auth::API_TOKEN_VAR,
            crate::auth::APP_USERNAME_VAR,
            crate::auth::APP_PASSWORD_VAR,
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_check_result_constructors() {
        let result = CheckResult::ok("Test passed");
        assert!(result.passed);
        assert!(!result.is_warning);
        assert!(result.details.is_none());

        let result = CheckResult::warning_with_details("Test warning", "Warning details");
        assert!(result.passed); // Warnings still "pass"
        assert!(result.is_warning);
        assert_eq!(result.details, Some("Warning details".to_string()));

        let result = CheckResult::error("Test failed");
        assert!(!result.passed);
        assert!(!result.is_warning);
    }

    #[test]
    fn test_git_check() {
        let result = HealthCheck::check_git();
        // Git should be installed in dev environment
        assert!(result.passed);
        assert!(result.details.is_some()); // Should have version info
    }

    #[test]
    #[serial]
    fn test_check_credentials_missing() {
        clear_credential_env();
        let result = HealthCheck::check_credentials();
        assert!(!result.passed);
        assert!(result
            .details
            .as_deref()
            .unwrap_or_default()
            .contains("BITBUCKET_ACCESS_TOKEN"));
    }

    #[test]
    #[serial]
    fn test_check_credentials_present() {
        clear_credential_env();
        std::env::set_var(crate::auth::ACCESS_TOKEN_VAR, "token");

        let result = HealthCheck::check_credentials();
        assert!(result.passed);

        clear_credential_env();
    }

    #[test]
    fn test_check_dest_root_existing() {
        let mut config = Config::default();
        config.dest_root = "/tmp".to_string();
        let result = HealthCheck::check_dest_root(&config);
        assert!(result.passed);
        assert!(!result.is_warning);
    }

    #[test]
    fn test_check_dest_root_missing_is_warning() {
        let mut config = Config::default();
        config.dest_root = "/nonexistent/path/that/does/not/exist".to_string();
        let result = HealthCheck::check_dest_root(&config);
        assert!(result.passed);
        assert!(result.is_warning);
        assert!(result.details.is_some());
    }

    #[test]
    fn test_check_dest_root_file_is_error() {
        let temp = tempfile::NamedTempFile::new().expect("temp file");
        let mut config = Config::default();
        config.dest_root = temp.path().to_string_lossy().into_owned();

        let result = HealthCheck::check_dest_root(&config);
        assert!(!result.passed);
    }

    #[test]
    fn test_check_dest_root_empty_is_error() {
        let mut config = Config::default();
        config.dest_root = String::new();
        let result = HealthCheck::check_dest_root(&config);
        assert!(!result.passed);
    }

    #[test]
    fn test_check_ssh() {
        let result = HealthCheck::check_ssh();
        // Result depends on system, but should not error
        assert!(result.passed || result.is_warning);
    }

    #[test]
    fn test_all_passed_ignores_warnings() {
        let health = HealthCheck {
            git: CheckResult::ok("Git OK"),
            credentials: CheckResult::ok("Creds OK"),
            dest_root: CheckResult::warning("Dir missing"),
            ssh: CheckResult::warning("No SSH keys"),
        };
        assert!(health.all_passed());
    }

    #[test]
    fn test_all_passed_with_failing_credentials() {
        let health = HealthCheck {
            git: CheckResult::ok("Git OK"),
            credentials: CheckResult::error("No creds"),
            dest_root: CheckResult::ok("Dir OK"),
            ssh: CheckResult::ok("SSH OK"),
        };
        assert!(!health.all_passed());
    }

    #[test]
    fn test_errors_excludes_warnings() {
        let health = HealthCheck {
            git: CheckResult::error("Git error"),
            credentials: CheckResult::ok("Creds OK"),
            dest_root: CheckResult::error("Dir error"),
            ssh: CheckResult::warning("SSH warning"),
        };
        let errors = health.errors();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|r| !r.passed));
    }

    #[test]
    fn test_warnings_returns_only_warnings() {
        let health = HealthCheck {
            git: CheckResult::ok("Git OK"),
            credentials: CheckResult::error("Creds error"),
            dest_root: CheckResult::ok("Dir OK"),
            ssh: CheckResult::warning("SSH warning"),
        };
        let warnings = health.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].is_warning);
    }

    #[test]
    fn test_all_checks_returns_all_four() {
        let health = HealthCheck {
            git: CheckResult::ok("Git OK"),
            credentials: CheckResult::ok("Creds OK"),
            dest_root: CheckResult::ok("Dir OK"),
            ssh: CheckResult::ok("SSH OK"),
        };
        let checks = health.all_checks();
        assert_eq!(checks.len(), 4);
        assert_eq!(checks[0].0, "Git Installation");
        assert_eq!(checks[1].0, "Bitbucket Credentials");
        assert_eq!(checks[2].0, "Destination Root");
        assert_eq!(checks[3].0, "SSH Configuration");
    }
}
