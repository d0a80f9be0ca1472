//! Engine error type

use std::path::PathBuf;
use thiserror::Error;

use crate::git::GitError;
use crate::workspace::apply::ApplyPreflightResult;
use crate::workspace::state::StateError;

#[derive(Error, Debug)]
pub enum WorkshedError {
    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(String),
    #[error("Capture not found in workspace {handle}: {capture}")]
    CaptureNotFound { handle: String, capture: String },
    #[error("Repository not found in workspace {handle}: {repository}")]
    RepositoryNotFound { handle: String, repository: String },
    #[error("Execution not found in workspace {handle}: {execution}")]
    ExecutionNotFound { handle: String, execution: String },
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Workspace already exists: {0}")]
    WorkspaceExists(String),
    #[error("Repository already exists in workspace {handle}: {repository}")]
    RepositoryExists { handle: String, repository: String },
    #[error("Path exists and is not a git repository: {0}")]
    PathOccupied(PathBuf),
    #[error("Failed to generate a unique handle after {0} attempts")]
    HandleExhausted(u32),
    #[error("Cannot apply capture {capture} to workspace {handle}: {}", .result.summary())]
    PreflightFailed {
        handle: String,
        capture: String,
        result: ApplyPreflightResult,
    },
    #[error("Failed to clone {repository} into workspace {handle}: {source}")]
    CloneFailed {
        handle: String,
        repository: String,
        /// Repositories cloned before the failure (since cleaned up)
        succeeded: Vec<String>,
        #[source]
        source: GitError,
    },
    #[error("Unsupported context version {found} (supported up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("Template copy failed for workspace {handle}: {message}")]
    Template { handle: String, message: String },
    #[error("State error: {0}")]
    State(#[from] StateError),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkshedError {
    /// Stable error code for consumers
    pub fn code(&self) -> &'static str {
        match self {
            WorkshedError::WorkspaceNotFound(_) => "workspace_not_found",
            WorkshedError::CaptureNotFound { .. } => "capture_not_found",
            WorkshedError::RepositoryNotFound { .. } => "repository_not_found",
            WorkshedError::ExecutionNotFound { .. } => "execution_not_found",
            WorkshedError::Validation(_) => "validation",
            WorkshedError::WorkspaceExists(_) | WorkshedError::RepositoryExists { .. } => {
                "conflict"
            }
            WorkshedError::PathOccupied(_) => "path_occupied",
            WorkshedError::HandleExhausted(_) => "handle_exhausted",
            WorkshedError::PreflightFailed { .. } => "preflight_failed",
            WorkshedError::CloneFailed { .. } => "clone_failed",
            WorkshedError::UnsupportedVersion { .. } => "unsupported_version",
            WorkshedError::Template { .. } => "template_error",
            WorkshedError::State(_) => "state_error",
            WorkshedError::Io(_) => "io_error",
            WorkshedError::Internal(_) => "internal_error",
        }
    }

    /// Remediation hint from the underlying git failure, if any
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            WorkshedError::CloneFailed { source, .. } => source.hint(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            WorkshedError::WorkspaceNotFound(_)
                | WorkshedError::CaptureNotFound { .. }
                | WorkshedError::RepositoryNotFound { .. }
                | WorkshedError::ExecutionNotFound { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            WorkshedError::WorkspaceExists(_) | WorkshedError::RepositoryExists { .. }
        )
    }
}

pub type Result<T, E = WorkshedError> = std::result::Result<T, E>;
