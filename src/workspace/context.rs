//! Portable workspace context (export / import)
//!
//! The context document is the only format exchanged with other machines.
//! Changes to it must be additive; bump [`CONTEXT_VERSION`] otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::workspace::capture::{Capture, CaptureKind};
use crate::workspace::engine::Workshed;
use crate::workspace::error::{Result, WorkshedError};
use crate::workspace::exec::ExecutionRecord;
use crate::workspace::handle::{generate_handle, is_valid_handle};
use crate::workspace::state::{Repository, Workspace};

pub const CONTEXT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceContext {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub handle: String,
    pub purpose: String,
    #[serde(default)]
    pub repositories: Vec<ContextRepo>,
    #[serde(default)]
    pub captures: Vec<ContextCapture>,
    pub metadata: ContextMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextRepo {
    pub name: String,
    /// Path relative to the workspace directory
    pub path: String,
    pub url: String,
    /// Absolute checkout path on the exporting machine
    pub root_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextCapture {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub kind: CaptureKind,
    pub repo_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextMetadata {
    pub workshed_version: String,
    pub executions_count: usize,
    pub captures_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_captured_at: Option<DateTime<Utc>>,
}

impl WorkspaceContext {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| WorkshedError::Internal(format!("failed to encode context: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| WorkshedError::Validation(format!("invalid context document: {}", e)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    /// Leave out the capture list (counts are kept)
    pub compact: bool,
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub context: WorkspaceContext,
    /// Reuse the document's handle instead of generating one
    pub preserve_handle: bool,
    /// Replace an existing workspace with the same handle
    pub force: bool,
    /// Base for resolving relative local URLs
    pub invocation_dir: PathBuf,
}

/// Build a context document from workspace, captures and executions.
/// Deterministic apart from `generated_at`.
pub fn build_context(
    workspace: &Workspace,
    captures: &[Capture],
    executions: &[ExecutionRecord],
    generated_at: DateTime<Utc>,
) -> WorkspaceContext {
    let repositories = workspace
        .repositories
        .iter()
        .map(|repo| ContextRepo {
            name: repo.name.clone(),
            path: repo.name.clone(),
            url: repo.url.clone(),
            root_path: workspace.repo_path(&repo.name).to_string_lossy().to_string(),
        })
        .collect();

    let mut ordered: Vec<&Capture> = captures.iter().collect();
    ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    let captures_out = ordered
        .iter()
        .map(|c| ContextCapture {
            id: c.id.clone(),
            timestamp: c.timestamp,
            name: c.name.clone(),
            kind: c.kind,
            repo_count: c.git_state.len(),
        })
        .collect();

    WorkspaceContext {
        version: CONTEXT_VERSION,
        generated_at,
        handle: workspace.handle.clone(),
        purpose: workspace.purpose.clone(),
        repositories,
        captures: captures_out,
        metadata: ContextMetadata {
            workshed_version: env!("CARGO_PKG_VERSION").to_string(),
            executions_count: executions.len(),
            captures_count: captures.len(),
            last_executed_at: executions.iter().map(|e| e.timestamp).max(),
            last_captured_at: captures.iter().map(|c| c.timestamp).max(),
        },
    }
}

/// Where to clone an imported repository from: its URL, or for repositories
/// without one, the original checkout if it exists on this machine.
fn import_source(repo: &ContextRepo, invocation_dir: &Path) -> Result<String> {
    if !repo.url.trim().is_empty() {
        let url = repo.url.trim();
        let path = Path::new(url);
        if path.is_relative() && (url.starts_with("./") || url.starts_with("../")) {
            return Ok(invocation_dir.join(path).to_string_lossy().to_string());
        }
        return Ok(url.to_string());
    }
    if !repo.root_path.is_empty() && Path::new(&repo.root_path).is_dir() {
        return Ok(repo.root_path.clone());
    }
    Err(WorkshedError::Validation(format!(
        "repository {} has no URL and its root path is not available",
        repo.name
    )))
}

impl Workshed {
    /// Derive the context document for a workspace. Read-only.
    pub fn derive_context(&self, handle: &str) -> Result<WorkspaceContext> {
        let workspace = self.load(handle)?;
        let captures = self.store.list_captures::<Capture>(handle)?;
        let executions = self.store.list_executions::<ExecutionRecord>(handle)?;
        Ok(build_context(&workspace, &captures, &executions, Utc::now()))
    }

    pub fn export_context(&self, handle: &str, opts: ExportOptions) -> Result<WorkspaceContext> {
        let mut context = self.derive_context(handle)?;
        if opts.compact {
            context.captures.clear();
        }
        Ok(context)
    }

    /// Materialize a workspace from a context document.
    ///
    /// Captures and execution history in the document are informational; the
    /// new workspace starts with none. Clone failures follow the `create`
    /// policy: the half-built workspace is removed.
    pub async fn import_context(&self, opts: ImportOptions) -> Result<Workspace> {
        let context = opts.context;
        if context.version == 0 || context.version > CONTEXT_VERSION {
            return Err(WorkshedError::UnsupportedVersion {
                found: context.version,
                supported: CONTEXT_VERSION,
            });
        }
        let purpose = context.purpose.trim().to_string();
        if purpose.is_empty() {
            return Err(WorkshedError::Validation("context has an empty purpose".to_string()));
        }

        let mut repos = Vec::with_capacity(context.repositories.len());
        for repo in &context.repositories {
            if repo.name.is_empty() || repo.name.contains('/') || repo.name.starts_with('.') {
                return Err(WorkshedError::Validation(format!(
                    "invalid repository name in context: {:?}",
                    repo.name
                )));
            }
            if repos.iter().any(|r: &Repository| r.name == repo.name) {
                return Err(WorkshedError::Validation(format!(
                    "repository listed twice in context: {}",
                    repo.name
                )));
            }
            repos.push(Repository {
                name: repo.name.clone(),
                url: import_source(repo, &opts.invocation_dir)?,
                reference: String::new(),
            });
        }

        let handle = if opts.preserve_handle {
            if !is_valid_handle(&context.handle) {
                return Err(WorkshedError::Validation(format!(
                    "invalid handle in context: {:?}",
                    context.handle
                )));
            }
            context.handle.clone()
        } else {
            generate_handle(
                self.config.handles.words,
                self.config.handles.max_attempts,
                |h| self.store.exists(h),
            )?
        };

        let guard = self.lock_handle(&handle).await;
        if self.store.exists(&handle) {
            if !opts.force {
                return Err(WorkshedError::WorkspaceExists(handle));
            }
            info!(handle = %handle, "Replacing existing workspace on import");
            self.store.remove_workspace(&handle)?;
        }

        let workspace = match self.materialize(&handle, &purpose, repos).await {
            Ok(workspace) => workspace,
            Err(e) => {
                self.release_handle(&handle, guard);
                return Err(e);
            }
        };
        info!(
            handle = %handle,
            source = %context.handle,
            repositories = workspace.repositories.len(),
            "Context imported"
        );
        Ok(workspace)
    }
}
