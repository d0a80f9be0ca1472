// Git module - the git collaborator consumed by the workspace engine
//
// This module is split into logical submodules:
// - error: Classified git errors and the ordered substring rule list
// - system: Implementation backed by the system `git` binary
// - scripted: In-memory test double with scriptable remotes and failures

pub mod error;
pub mod scripted;
pub mod system;

use std::path::Path;

pub use error::{classify, GitError, GitErrorKind};
pub use scripted::{ScriptedGit, ScriptedRemote};
pub use system::SystemGit;

/// Options for cloning a repository
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloneOptions {
    /// Shallow clone depth (None = full history)
    pub depth: Option<u32>,
    pub mirror: bool,
}

/// Capability set the engine needs from git.
///
/// Every call is blocking; the engine runs them on the blocking pool.
pub trait Git: Send + Sync {
    /// Clone `url` into `dir` (which must not exist yet)
    fn clone_repo(&self, url: &str, dir: &Path, opts: &CloneOptions) -> Result<(), GitError>;

    /// Check out a branch, tag or commit
    fn checkout(&self, dir: &Path, reference: &str) -> Result<(), GitError>;

    /// URL of the `origin` remote
    fn remote_url(&self, dir: &Path) -> Result<String, GitError>;

    /// Current branch name, or `HEAD` when detached
    fn current_branch(&self, dir: &Path) -> Result<String, GitError>;

    /// Resolve a reference to a full commit hash
    fn rev_parse(&self, dir: &Path, reference: &str) -> Result<String, GitError>;

    /// `git status --porcelain` output (empty = clean)
    fn status_porcelain(&self, dir: &Path) -> Result<String, GitError>;
}

/// Compare two remote URLs ignoring a trailing `/` or `.git`
pub fn same_remote(a: &str, b: &str) -> bool {
    fn normalize(url: &str) -> &str {
        let url = url.trim().trim_end_matches('/');
        url.strip_suffix(".git").unwrap_or(url)
    }
    normalize(a) == normalize(b)
}
