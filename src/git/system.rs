//! Git collaborator backed by the system `git` binary

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::error::{GitError, GitErrorKind};
use super::{CloneOptions, Git};

pub struct SystemGit {
    binary: PathBuf,
}

impl SystemGit {
    /// Locate `git` on PATH
    pub fn discover() -> Result<Self, GitError> {
        let binary = which::which("git").map_err(|e| {
            GitError::new(
                GitErrorKind::Unclassified,
                "git",
                format!("git executable not found on PATH: {}", e),
            )
        })?;
        Ok(Self { binary })
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run git and return trimmed stdout
    fn run(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
        self.run_raw(dir, args).map(|out| out.trim().to_string())
    }

    /// Run git and return stdout untouched, or a classified error built from
    /// combined stdout + stderr.
    fn run_raw(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
        let label = format!("git {}", args.first().copied().unwrap_or_default());
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).env("GIT_TERMINAL_PROMPT", "0");
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        debug!(command = %label, dir = ?dir, "Running git");

        let output = cmd
            .output()
            .map_err(|e| GitError::new(GitErrorKind::Unclassified, &label, e.to_string()))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            Err(GitError::from_output(label, combined))
        }
    }
}

impl Git for SystemGit {
    fn clone_repo(&self, url: &str, dir: &Path, opts: &CloneOptions) -> Result<(), GitError> {
        let depth = opts.depth.map(|d| d.to_string());
        let dir_str = dir.to_string_lossy();

        let mut args = vec!["clone"];
        if let Some(depth) = depth.as_deref() {
            args.push("--depth");
            args.push(depth);
        }
        if opts.mirror {
            args.push("--mirror");
        }
        args.push(url);
        args.push(&dir_str);

        self.run(None, &args).map(|_| ())
    }

    fn checkout(&self, dir: &Path, reference: &str) -> Result<(), GitError> {
        self.run(Some(dir), &["checkout", "--quiet", reference])
            .map(|_| ())
    }

    fn remote_url(&self, dir: &Path) -> Result<String, GitError> {
        self.run(Some(dir), &["remote", "get-url", "origin"])
    }

    fn current_branch(&self, dir: &Path) -> Result<String, GitError> {
        self.run(Some(dir), &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    fn rev_parse(&self, dir: &Path, reference: &str) -> Result<String, GitError> {
        let spec = format!("{}^{{commit}}", reference);
        self.run(Some(dir), &["rev-parse", "--verify", "--quiet", &spec])
            .and_then(|sha| {
                if sha.is_empty() {
                    Err(GitError::new(
                        GitErrorKind::RefNotFound,
                        "git rev-parse",
                        format!("unknown revision {}", reference),
                    ))
                } else {
                    Ok(sha)
                }
            })
            .map_err(|mut e| {
                // --quiet suppresses git's own message
                if e.output.trim().is_empty() {
                    e.kind = GitErrorKind::RefNotFound;
                    e.output = format!("unknown revision {}", reference);
                }
                e
            })
    }

    fn status_porcelain(&self, dir: &Path) -> Result<String, GitError> {
        // The leading column is the index state; a space there is significant
        self.run_raw(Some(dir), &["status", "--porcelain"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn git_in(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap()
            .status;
        assert!(status.success(), "git {:?} failed", args);
    }

    #[test]
    fn test_status_keeps_unstaged_column() {
        let Ok(git) = SystemGit::discover() else {
            return;
        };
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        git_in(dir, &["init", "--quiet"]);
        fs::write(dir.join("a.txt"), "one\n").unwrap();
        git_in(dir, &["add", "a.txt"]);
        git_in(dir, &["commit", "--quiet", "-m", "init"]);
        fs::write(dir.join("a.txt"), "two\n").unwrap();

        assert_eq!(git.status_porcelain(dir).unwrap(), " M a.txt\n");

        git_in(dir, &["add", "a.txt"]);
        assert_eq!(git.status_porcelain(dir).unwrap(), "M  a.txt\n");

        let head = git.rev_parse(dir, "HEAD").unwrap();
        assert_eq!(head.len(), 40);
    }

    #[test]
    fn test_missing_binary_is_unclassified() {
        let git = SystemGit::with_binary("/nonexistent/git-binary");
        let err = git.current_branch(Path::new("/")).unwrap_err();
        assert_eq!(err.kind, GitErrorKind::Unclassified);
        assert_eq!(err.command, "git rev-parse");
    }
}
