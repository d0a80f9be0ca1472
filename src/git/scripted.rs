//! Scriptable in-memory git double
//!
//! Remotes, branches, commits and working-tree status live in memory. Clone
//! still creates the target directory (with an empty `.git`) so path checks in
//! the engine behave as they would against real repositories.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::error::{GitError, GitErrorKind};
use super::{CloneOptions, Git};

/// A remote repository that can be cloned
#[derive(Debug, Clone)]
pub struct ScriptedRemote {
    pub default_branch: String,
    /// branch name -> tip commit
    pub branches: HashMap<String, String>,
    /// Commits reachable in a clone, beyond branch tips
    pub commits: HashSet<String>,
}

impl ScriptedRemote {
    /// Remote with a single branch pointing at `commit`
    pub fn new(default_branch: &str, commit: &str) -> Self {
        let mut branches = HashMap::new();
        branches.insert(default_branch.to_string(), commit.to_string());
        let mut commits = HashSet::new();
        commits.insert(commit.to_string());
        Self {
            default_branch: default_branch.to_string(),
            branches,
            commits,
        }
    }

    pub fn with_branch(mut self, branch: &str, commit: &str) -> Self {
        self.branches.insert(branch.to_string(), commit.to_string());
        self.commits.insert(commit.to_string());
        self
    }
}

#[derive(Debug, Clone)]
struct LocalRepo {
    url: String,
    /// None = detached HEAD
    branch: Option<String>,
    head: String,
    branches: HashMap<String, String>,
    commits: HashSet<String>,
    status: String,
}

#[derive(Default)]
struct Inner {
    remotes: HashMap<String, ScriptedRemote>,
    repos: HashMap<PathBuf, LocalRepo>,
    clone_failures: HashMap<String, String>,
    broken: HashSet<PathBuf>,
    clones: Vec<(String, PathBuf)>,
}

#[derive(Default)]
pub struct ScriptedGit {
    inner: Mutex<Inner>,
}

impl ScriptedGit {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not wedge the double for the others.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a remote that `clone_repo` can fetch from
    pub fn add_remote(&self, url: &str, remote: ScriptedRemote) {
        self.lock().remotes.insert(url.to_string(), remote);
    }

    /// Make every clone of `url` fail with `output` (classified like real git output)
    pub fn fail_clone(&self, url: &str, output: &str) {
        self.lock()
            .clone_failures
            .insert(url.to_string(), output.to_string());
    }

    /// Make every query against `dir` fail
    pub fn break_repo(&self, dir: &Path) {
        self.lock().broken.insert(dir.to_path_buf());
    }

    /// Set the porcelain status text of a clone (empty = clean)
    pub fn set_status(&self, dir: &Path, status: &str) {
        if let Some(repo) = self.lock().repos.get_mut(dir) {
            repo.status = status.to_string();
        }
    }

    /// Record a new commit on the current branch (or detached HEAD)
    pub fn commit(&self, dir: &Path, sha: &str) {
        if let Some(repo) = self.lock().repos.get_mut(dir) {
            repo.commits.insert(sha.to_string());
            repo.head = sha.to_string();
            if let Some(branch) = &repo.branch {
                repo.branches.insert(branch.clone(), sha.to_string());
            }
        }
    }

    /// Point `origin` of a clone at a different URL
    pub fn set_remote_url(&self, dir: &Path, url: &str) {
        if let Some(repo) = self.lock().repos.get_mut(dir) {
            repo.url = url.to_string();
        }
    }

    /// Every successful clone so far, in order
    pub fn clones(&self) -> Vec<(String, PathBuf)> {
        self.lock().clones.clone()
    }

    /// Current HEAD commit of a clone
    pub fn head(&self, dir: &Path) -> Option<String> {
        self.lock().repos.get(dir).map(|r| r.head.clone())
    }

    fn with_repo<T>(
        &self,
        dir: &Path,
        command: &str,
        f: impl FnOnce(&mut LocalRepo) -> Result<T, GitError>,
    ) -> Result<T, GitError> {
        let mut inner = self.lock();
        if inner.broken.contains(dir) {
            return Err(GitError::from_output(
                command,
                "fatal: not a git repository (or any of the parent directories): .git",
            ));
        }
        match inner.repos.get_mut(dir) {
            Some(repo) => f(repo),
            None => Err(GitError::new(
                GitErrorKind::RepositoryNotFound,
                command,
                format!("fatal: not a git repository: {}", dir.display()),
            )),
        }
    }
}

impl Git for ScriptedGit {
    fn clone_repo(&self, url: &str, dir: &Path, _opts: &CloneOptions) -> Result<(), GitError> {
        let mut inner = self.lock();
        if let Some(output) = inner.clone_failures.get(url) {
            return Err(GitError::from_output("git clone", output.clone()));
        }
        let remote = inner.remotes.get(url).cloned().ok_or_else(|| {
            GitError::from_output(
                "git clone",
                format!("remote: Repository not found.\nfatal: repository '{}' not found", url),
            )
        })?;
        if dir.exists() {
            return Err(GitError::from_output(
                "git clone",
                format!(
                    "fatal: destination path '{}' already exists and is not an empty directory.",
                    dir.display()
                ),
            ));
        }
        fs::create_dir_all(dir.join(".git"))
            .map_err(|e| GitError::new(GitErrorKind::Unclassified, "git clone", e.to_string()))?;

        let head = remote
            .branches
            .get(&remote.default_branch)
            .cloned()
            .unwrap_or_default();
        let mut commits = remote.commits.clone();
        commits.extend(remote.branches.values().cloned());
        inner.repos.insert(
            dir.to_path_buf(),
            LocalRepo {
                url: url.to_string(),
                branch: Some(remote.default_branch.clone()),
                head,
                branches: remote.branches.clone(),
                commits,
                status: String::new(),
            },
        );
        inner.clones.push((url.to_string(), dir.to_path_buf()));
        Ok(())
    }

    fn checkout(&self, dir: &Path, reference: &str) -> Result<(), GitError> {
        self.with_repo(dir, "git checkout", |repo| {
            if let Some(tip) = repo.branches.get(reference).cloned() {
                repo.branch = Some(reference.to_string());
                repo.head = tip;
                Ok(())
            } else if repo.commits.contains(reference) {
                repo.branch = None;
                repo.head = reference.to_string();
                Ok(())
            } else {
                Err(GitError::from_output(
                    "git checkout",
                    format!(
                        "error: pathspec '{}' did not match any file(s) known to git",
                        reference
                    ),
                ))
            }
        })
    }

    fn remote_url(&self, dir: &Path) -> Result<String, GitError> {
        self.with_repo(dir, "git remote", |repo| Ok(repo.url.clone()))
    }

    fn current_branch(&self, dir: &Path) -> Result<String, GitError> {
        self.with_repo(dir, "git rev-parse", |repo| {
            Ok(repo.branch.clone().unwrap_or_else(|| "HEAD".to_string()))
        })
    }

    fn rev_parse(&self, dir: &Path, reference: &str) -> Result<String, GitError> {
        self.with_repo(dir, "git rev-parse", |repo| {
            if reference == "HEAD" {
                Ok(repo.head.clone())
            } else if let Some(tip) = repo.branches.get(reference) {
                Ok(tip.clone())
            } else if repo.commits.contains(reference) {
                Ok(reference.to_string())
            } else {
                Err(GitError::new(
                    GitErrorKind::RefNotFound,
                    "git rev-parse",
                    format!("unknown revision {}", reference),
                ))
            }
        })
    }

    fn status_porcelain(&self, dir: &Path) -> Result<String, GitError> {
        self.with_repo(dir, "git status", |repo| Ok(repo.status.clone()))
    }
}
