#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// Scratch repository with a bare `origin` remote, for exercising the git
/// subprocess layer end to end.
pub struct GitFixture {
    _dir: TempDir,
    pub repo: PathBuf,
}

impl GitFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let origin = dir.path().join("origin.git");
        let repo = dir.path().join("work");

        run(dir.path(), &["init", "--bare", "origin.git"]);
        run(dir.path(), &["clone", "origin.git", "work"]);

        run(&repo, &["config", "user.name", "Fixture"]);
        run(&repo, &["config", "user.email", "fixture@example.invalid"]);
        run(&repo, &["config", "commit.gpgsign", "false"]);

        std::fs::write(repo.join("README.md"), "# fixture\n").unwrap();
        run(&repo, &["add", "."]);
        run(&repo, &["commit", "-m", "initial commit"]);
        run(&repo, &["branch", "-M", "main"]);
        run(&repo, &["push", "-u", "origin", "main"]);

        let _ = origin;
        Self { _dir: dir, repo }
    }

    pub fn git(&self, args: &[&str]) {
        run(&self.repo, args);
    }

    pub fn write(&self, path: &str, content: &str) {
        let full = self.repo.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }

    pub fn commit_all(&self, message: &str) {
        self.git(&["add", "."]);
        self.git(&["commit", "-m", message]);
    }

    pub fn create_branch(&self, name: &str, from: &str) {
        self.git(&["checkout", "-b", name, from]);
    }

    pub fn checkout(&self, name: &str) {
        self.git(&["checkout", name]);
    }
}

fn run(cwd: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}
