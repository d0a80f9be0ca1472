//! Workspace State Engine - multi-repository workspaces
//!
//! This module provides:
//! - Workspace registry (create, list, remove, repositories, handles)
//! - Captures of every repository's branch/commit/dirty state
//! - Preflight and apply of captures
//! - Command execution across repositories with persisted records
//! - Portable context export/import

pub mod apply;
pub mod capture;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod exec;
pub mod handle;
pub mod registry;
pub mod repo_spec;
pub mod state;
pub mod template;

pub use apply::{
    ApplyOptions, ApplyOutcome, ApplyPreflightError, ApplyPreflightResult, ApplyReport,
    PreflightReason, RepoApplyResult,
};
pub use capture::{Capture, CaptureKind, CaptureMetadata, CaptureRequest, GitRef};
pub use config::WorkshedConfig;
pub use context::{
    ContextCapture, ContextMetadata, ContextRepo, ExportOptions, ImportOptions, WorkspaceContext,
    CONTEXT_VERSION,
};
pub use engine::Workshed;
pub use error::WorkshedError;
pub use exec::{
    ExecFailure, ExecOptions, ExecOutcome, ExecResult, ExecutionRecord, ExecutionRepoResult,
};
pub use registry::{CreateOptions, ListFilter};
pub use repo_spec::RepoSpec;
pub use state::{Repository, Workspace};
