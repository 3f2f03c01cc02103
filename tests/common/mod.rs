//! Common fixtures for the sync engine integration tests.
//!
//! Everything here drives the real `git` binary: origins are local bare
//! repositories, mirrors are ordinary clones, and commits carry an inline
//! identity so no global git configuration is needed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use repodrift::bitbucket::{Listing, RemoteRepo};
use tempfile::TempDir;

/// Run git with the given arguments, panicking (with stderr) on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("failed to spawn git");

    assert!(
        output.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );

    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Write `file` and commit it with a throwaway identity.
pub fn commit(repo: &Path, file: &str, message: &str) {
    fs::write(repo.join(file), message).expect("write file");
    git(repo, &["add", "."]);
    git(
        repo,
        &[
            "-c",
            "user.email=drift@example.com",
            "-c",
            "user.name=drift",
            "commit",
            "-q",
            "-m",
            message,
        ],
    );
}

pub fn rev_parse(repo: &Path, rev: &str) -> String {
    git(repo, &["rev-parse", rev]).trim().to_string()
}

pub fn listing(repos: Vec<RemoteRepo>) -> Listing {
    Listing {
        repos,
        missing_projects: Vec::new(),
    }
}

/// A temp directory holding bare "origin" repositories next to a mirror
/// root, standing in for the remote workspace and the engine's destination.
pub struct GitFixture {
    temp: TempDir,
}

impl GitFixture {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("temp dir");
        fs::create_dir_all(temp.path().join("origins")).expect("origins dir");
        Self { temp }
    }

    /// Root the engine mirrors into. Not pre-created; the engine does that.
    pub fn dest(&self) -> PathBuf {
        self.temp.path().join("mirrors")
    }

    pub fn mirror_path(&self, slug: &str) -> PathBuf {
        self.dest().join(slug)
    }

    pub fn origin_path(&self, slug: &str) -> PathBuf {
        self.temp
            .path()
            .join("origins")
            .join(format!("{}.git", slug))
    }

    /// Bare origin holding one commit on `main`.
    pub fn create_origin(&self, slug: &str) -> PathBuf {
        let seed = self.temp.path().join(format!("{}-seed", slug));
        fs::create_dir_all(&seed).expect("seed dir");
        git(&seed, &["init", "-q", "-b", "main"]);
        commit(&seed, "README.md", "initial commit");

        let origin = self.origin_path(slug);
        git(
            self.temp.path(),
            &[
                "clone",
                "-q",
                "--bare",
                seed.to_str().unwrap(),
                origin.to_str().unwrap(),
            ],
        );
        origin
    }

    /// Bare origin with no commits at all (a freshly created repository).
    pub fn create_empty_origin(&self, slug: &str) -> PathBuf {
        let origin = self.origin_path(slug);
        fs::create_dir_all(&origin).expect("origin dir");
        git(&origin, &["init", "-q", "--bare", "-b", "main"]);
        origin
    }

    /// Push one commit to the origin's `main` through a scratch clone.
    pub fn advance_origin(&self, slug: &str, file: &str) {
        let writer = self.temp.path().join(format!("{}-writer", slug));
        if writer.exists() {
            git(&writer, &["pull", "-q", "--ff-only", "origin", "main"]);
        } else {
            git(
                self.temp.path(),
                &[
                    "clone",
                    "-q",
                    self.origin_path(slug).to_str().unwrap(),
                    writer.to_str().unwrap(),
                ],
            );
        }
        commit(&writer, file, &format!("add {}", file));
        git(&writer, &["push", "-q", "origin", "main"]);
    }

    /// Listing entry pointing at the local bare origin.
    pub fn remote_repo(&self, slug: &str) -> RemoteRepo {
        RemoteRepo {
            project: "DEVOPS".to_string(),
            slug: slug.to_string(),
            name: slug.to_string(),
            clone_url: self.origin_path(slug).to_string_lossy().into_owned(),
            clone_url_alt: None,
            default_branch: Some("main".to_string()),
        }
    }

    /// Listing entry whose clone URL points at nothing.
    pub fn broken_repo(&self, slug: &str) -> RemoteRepo {
        let missing = self.temp.path().join("origins").join("missing.git");
        RemoteRepo {
            project: "DEVOPS".to_string(),
            slug: slug.to_string(),
            name: slug.to_string(),
            clone_url: missing.to_string_lossy().into_owned(),
            clone_url_alt: None,
            default_branch: Some("main".to_string()),
        }
    }
}
