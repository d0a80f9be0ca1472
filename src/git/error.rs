//! Classified git errors
//!
//! Git reports failures as free text on stderr. The text is matched against an
//! ordered rule list (case-insensitive substring, first match wins), so more
//! specific phrases must stay ahead of broader ones.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitErrorKind {
    RepositoryNotFound,
    AuthenticationFailed,
    NetworkError,
    RefNotFound,
    Unclassified,
}

impl GitErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitErrorKind::RepositoryNotFound => "repository not found",
            GitErrorKind::AuthenticationFailed => "authentication failed",
            GitErrorKind::NetworkError => "network error",
            GitErrorKind::RefNotFound => "ref not found",
            GitErrorKind::Unclassified => "git command failed",
        }
    }
}

const RULES: &[(&str, GitErrorKind)] = &[
    ("repository not found", GitErrorKind::RepositoryNotFound),
    ("does not appear to be a git repository", GitErrorKind::RepositoryNotFound),
    ("not a git repository", GitErrorKind::RepositoryNotFound),
    ("does not exist", GitErrorKind::RepositoryNotFound),
    ("permission denied", GitErrorKind::AuthenticationFailed),
    ("authentication failed", GitErrorKind::AuthenticationFailed),
    ("could not read username", GitErrorKind::AuthenticationFailed),
    ("host key verification failed", GitErrorKind::AuthenticationFailed),
    ("could not resolve host", GitErrorKind::NetworkError),
    ("connection refused", GitErrorKind::NetworkError),
    ("connection timed out", GitErrorKind::NetworkError),
    ("network is unreachable", GitErrorKind::NetworkError),
    ("unable to access", GitErrorKind::NetworkError),
    ("not found in upstream", GitErrorKind::RefNotFound),
    ("did not match any file(s) known to git", GitErrorKind::RefNotFound),
    ("unknown revision", GitErrorKind::RefNotFound),
    ("invalid reference", GitErrorKind::RefNotFound),
    ("needed a single revision", GitErrorKind::RefNotFound),
    ("bad revision", GitErrorKind::RefNotFound),
];

/// Classify combined git output. First matching rule wins.
pub fn classify(output: &str) -> GitErrorKind {
    let lower = output.to_lowercase();
    RULES
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, kind)| *kind)
        .unwrap_or(GitErrorKind::Unclassified)
}

/// Git failure with its classification and the raw command output
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{command}: {}{}", .kind.as_str(), output_suffix(.output))]
pub struct GitError {
    pub kind: GitErrorKind,
    /// The git invocation, e.g. `git clone`
    pub command: String,
    pub output: String,
}

fn output_suffix(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(" ({})", trimmed)
    }
}

impl GitError {
    pub fn new(kind: GitErrorKind, command: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind,
            command: command.into(),
            output: output.into(),
        }
    }

    /// Build an error from command output, classifying it
    pub fn from_output(command: impl Into<String>, output: impl Into<String>) -> Self {
        let output = output.into();
        Self::new(classify(&output), command, output)
    }

    /// User-facing remediation hint
    pub fn hint(&self) -> Option<&'static str> {
        match self.kind {
            GitErrorKind::RepositoryNotFound => {
                Some("check the repository URL and that you have access to it")
            }
            GitErrorKind::AuthenticationFailed => {
                Some("check your SSH keys or credentials (try `ssh -T git@<host>`)")
            }
            GitErrorKind::NetworkError => Some("check your network connection and try again"),
            GitErrorKind::RefNotFound | GitErrorKind::Unclassified => None,
        }
    }
}
