//! Preflight and apply of captures
//!
//! An apply moves through `Requested -> Preflighting -> Blocked` (no mutation)
//! or `Requested -> Preflighting -> Applying -> Completed | PartiallyFailed`.
//! Checkouts are forward-only: repositories already moved are not rolled back
//! when a later one fails. Callers that want an undo path ask for a checkpoint,
//! an automatic capture of the pre-apply state.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::git::{same_remote, Git, GitErrorKind};
use crate::workspace::capture::{Capture, CaptureKind, CaptureRequest, GitRef};
use crate::workspace::engine::Workshed;
use crate::workspace::error::{Result, WorkshedError};
use crate::workspace::state::Workspace;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PreflightReason {
    DirtyWorkingTree,
    MissingRepository,
    RefUnreachable,
    UrlMismatch,
}

impl PreflightReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreflightReason::DirtyWorkingTree => "dirty_working_tree",
            PreflightReason::MissingRepository => "missing_repository",
            PreflightReason::RefUnreachable => "ref_unreachable",
            PreflightReason::UrlMismatch => "url_mismatch",
        }
    }
}

impl fmt::Display for PreflightReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyPreflightError {
    pub repository: String,
    pub reason: PreflightReason,
    pub details: String,
}

/// Outcome of a preflight. Failures are data, never an `Err`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyPreflightResult {
    pub valid: bool,
    pub errors: Vec<ApplyPreflightError>,
}

impl ApplyPreflightResult {
    pub fn from_errors(errors: Vec<ApplyPreflightError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// One `repository: reason (details)` clause per error
    pub fn summary(&self) -> String {
        if self.valid {
            return "ok".to_string();
        }
        self.errors
            .iter()
            .map(|e| format!("{}: {} ({})", e.repository, e.reason, e.details))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Record an automatic capture of the current state before checking out
    pub checkpoint: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Completed,
    PartiallyFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoApplyResult {
    pub repository: String,
    pub commit: String,
    /// What was checked out: the recorded branch, or the bare commit
    pub checked_out: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyReport {
    pub handle: String,
    pub capture_id: String,
    pub outcome: ApplyOutcome,
    pub repositories: Vec<RepoApplyResult>,
    /// Capture of the pre-apply state; apply it to undo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
}

impl ApplyReport {
    pub fn failed(&self) -> impl Iterator<Item = &RepoApplyResult> {
        self.repositories.iter().filter(|r| r.error.is_some())
    }
}

fn preflight_error(
    git_ref: &GitRef,
    reason: PreflightReason,
    details: impl Into<String>,
) -> ApplyPreflightError {
    ApplyPreflightError {
        repository: git_ref.repository.clone(),
        reason,
        details: details.into(),
    }
}

/// Checks for one captured repository against its current state
fn check_git_ref(
    git: &dyn Git,
    workspace: &Workspace,
    git_ref: &GitRef,
) -> Vec<ApplyPreflightError> {
    let mut errors = Vec::new();

    let Some(registered) = workspace.repository(&git_ref.repository) else {
        errors.push(preflight_error(
            git_ref,
            PreflightReason::MissingRepository,
            "repository is no longer part of the workspace",
        ));
        return errors;
    };
    let dir = workspace.repo_path(&registered.name);
    if !dir.is_dir() {
        errors.push(preflight_error(
            git_ref,
            PreflightReason::MissingRepository,
            format!("directory missing: {}", dir.display()),
        ));
        return errors;
    }

    if !git_ref.url.is_empty() && !same_remote(&registered.url, &git_ref.url) {
        errors.push(preflight_error(
            git_ref,
            PreflightReason::UrlMismatch,
            format!("captured {}, now registered as {}", git_ref.url, registered.url),
        ));
    }
    match git.remote_url(&dir) {
        Ok(remote) => {
            let expected = if git_ref.url.is_empty() {
                &registered.url
            } else {
                &git_ref.url
            };
            if !same_remote(&remote, expected) && errors.is_empty() {
                errors.push(preflight_error(
                    git_ref,
                    PreflightReason::UrlMismatch,
                    format!("origin is {}, expected {}", remote, expected),
                ));
            }
        }
        Err(e) if e.kind == GitErrorKind::RepositoryNotFound => {
            errors.push(preflight_error(
                git_ref,
                PreflightReason::MissingRepository,
                format!("not a git repository: {}", e),
            ));
            return errors;
        }
        // No origin remote; nothing to compare against
        Err(e) => debug!(repository = %git_ref.repository, error = %e, "Remote URL unavailable"),
    }

    match git.status_porcelain(&dir) {
        Ok(status) => {
            let changed = status.lines().filter(|l| !l.trim().is_empty()).count();
            if changed > 0 && !git_ref.dirty {
                errors.push(preflight_error(
                    git_ref,
                    PreflightReason::DirtyWorkingTree,
                    format!("{} uncommitted change(s); commit or stash them first", changed),
                ));
            }
        }
        Err(e) => errors.push(preflight_error(
            git_ref,
            PreflightReason::MissingRepository,
            format!("cannot read status: {}", e),
        )),
    }

    if git_ref.commit.is_empty() {
        errors.push(preflight_error(
            git_ref,
            PreflightReason::RefUnreachable,
            "capture recorded no commit for this repository",
        ));
    } else if let Err(e) = git.rev_parse(&dir, &git_ref.commit) {
        errors.push(preflight_error(
            git_ref,
            PreflightReason::RefUnreachable,
            format!("commit {} is not available locally ({}); try fetching", git_ref.commit, e),
        ));
    }

    errors
}

pub(crate) fn preflight(
    git: &dyn Git,
    workspace: &Workspace,
    capture: &Capture,
) -> ApplyPreflightResult {
    let errors = capture
        .git_state
        .iter()
        .flat_map(|git_ref| check_git_ref(git, workspace, git_ref))
        .collect();
    ApplyPreflightResult::from_errors(errors)
}

/// Check out the recorded branch when its tip is the recorded commit, else
/// the commit itself (detached).
fn checkout_git_ref(git: &dyn Git, workspace: &Workspace, git_ref: &GitRef) -> RepoApplyResult {
    let dir = workspace.repo_path(&git_ref.repository);
    let on_branch = !git_ref.branch.is_empty()
        && git_ref.branch != "HEAD"
        && git
            .rev_parse(&dir, &git_ref.branch)
            .map(|tip| tip == git_ref.commit)
            .unwrap_or(false);
    let target = if on_branch {
        git_ref.branch.clone()
    } else {
        git_ref.commit.clone()
    };

    let error = git.checkout(&dir, &target).err().map(|e| e.to_string());
    RepoApplyResult {
        repository: git_ref.repository.clone(),
        commit: git_ref.commit.clone(),
        checked_out: target,
        error,
    }
}

impl Workshed {
    /// Read-only check of whether a capture can be applied right now
    pub async fn preflight_apply(
        &self,
        handle: &str,
        capture_id: &str,
    ) -> Result<ApplyPreflightResult> {
        let workspace = self.load(handle)?;
        let capture = self.get_capture(handle, capture_id)?;
        self.with_git(move |git| preflight(git, &workspace, &capture))
            .await
    }

    /// Check out every repository to the commit recorded in a capture.
    ///
    /// Refuses with [`WorkshedError::PreflightFailed`] unless preflight passes.
    /// Per-repository checkout failures do not stop the others; they show up
    /// in the report with `PartiallyFailed`.
    pub async fn apply_capture(
        &self,
        handle: &str,
        capture_id: &str,
        opts: ApplyOptions,
    ) -> Result<ApplyReport> {
        let _guard = self.lock_handle(handle).await;
        let workspace = self.load(handle)?;
        let capture = self.get_capture(handle, capture_id)?;

        debug!(handle, capture = capture_id, "Preflighting apply");
        let (ws, cap) = (workspace.clone(), capture.clone());
        let result = self.with_git(move |git| preflight(git, &ws, &cap)).await?;
        if !result.valid {
            warn!(
                handle,
                capture = capture_id,
                errors = result.errors.len(),
                "Apply blocked by preflight"
            );
            return Err(WorkshedError::PreflightFailed {
                handle: handle.to_string(),
                capture: capture_id.to_string(),
                result,
            });
        }

        let checkpoint = if opts.checkpoint {
            let request = CaptureRequest {
                name: format!("pre-apply {}", capture.name),
                description: format!("State before applying capture {}", capture.id),
                kind: CaptureKind::Auto,
                ..Default::default()
            };
            Some(self.capture_locked(handle, request).await?.id)
        } else {
            None
        };

        debug!(handle, capture = capture_id, "Applying capture");
        let repositories = self
            .with_git(move |git| {
                capture
                    .git_state
                    .iter()
                    .map(|git_ref| checkout_git_ref(git, &workspace, git_ref))
                    .collect::<Vec<_>>()
            })
            .await?;

        let outcome = if repositories.iter().any(|r| r.error.is_some()) {
            ApplyOutcome::PartiallyFailed
        } else {
            ApplyOutcome::Completed
        };
        let report = ApplyReport {
            handle: handle.to_string(),
            capture_id: capture_id.to_string(),
            outcome,
            repositories,
            checkpoint,
        };

        for failed in report.failed() {
            warn!(
                handle,
                repository = %failed.repository,
                error = failed.error.as_deref().unwrap_or_default(),
                "Checkout failed"
            );
        }
        info!(handle, capture = capture_id, outcome = ?report.outcome, "Capture applied");
        Ok(report)
    }
}
