//! Captures - immutable snapshots of every repository's git state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::git::Git;
use crate::workspace::engine::Workshed;
use crate::workspace::error::{Result, WorkshedError};
use crate::workspace::state::{Repository, Workspace};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    #[default]
    Manual,
    /// Recorded by the engine, e.g. the checkpoint taken before an apply
    Auto,
}

impl CaptureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureKind::Manual => "manual",
            CaptureKind::Auto => "auto",
        }
    }
}

/// State of one repository at capture time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitRef {
    pub repository: String,
    /// URL registered for the repository when captured
    #[serde(default)]
    pub url: String,
    pub branch: String,
    /// Full hash; empty when the repository could not be read
    pub commit: String,
    pub dirty: bool,
    /// Raw `git status --porcelain` output when dirty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Why this entry is degraded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GitRef {
    pub fn is_degraded(&self) -> bool {
        self.error.is_some() || self.commit.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CaptureMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capture {
    pub id: String,
    pub handle: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub kind: CaptureKind,
    pub git_state: Vec<GitRef>,
    #[serde(default)]
    pub metadata: CaptureMetadata,
}

impl Capture {
    pub fn git_ref(&self, repository: &str) -> Option<&GitRef> {
        self.git_state.iter().find(|r| r.repository == repository)
    }
}

/// Input for [`Workshed::capture_state`]
#[derive(Debug, Clone, Default)]
pub struct CaptureRequest {
    /// Empty = generated from the timestamp
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub custom: BTreeMap<String, String>,
    pub kind: CaptureKind,
}

fn degraded(repo: &Repository, error: String) -> GitRef {
    GitRef {
        repository: repo.name.clone(),
        url: repo.url.clone(),
        branch: String::new(),
        commit: String::new(),
        dirty: false,
        status: None,
        error: Some(error),
    }
}

/// Read branch, HEAD and status of one checkout. Failures degrade the entry
/// instead of failing the capture.
fn read_git_ref(git: &dyn Git, repo: &Repository, dir: &Path) -> GitRef {
    if !dir.is_dir() {
        return degraded(repo, format!("repository directory missing: {}", dir.display()));
    }

    let branch = match git.current_branch(dir) {
        Ok(branch) => branch,
        Err(e) => return degraded(repo, e.to_string()),
    };
    let commit = match git.rev_parse(dir, "HEAD") {
        Ok(commit) => commit,
        Err(e) => return degraded(repo, e.to_string()),
    };
    let status = match git.status_porcelain(dir) {
        Ok(status) => status,
        Err(e) => return degraded(repo, e.to_string()),
    };
    let dirty = !status.trim().is_empty();

    GitRef {
        repository: repo.name.clone(),
        url: repo.url.clone(),
        branch,
        commit,
        dirty,
        status: dirty.then_some(status),
        error: None,
    }
}

/// One pass over every repository of the workspace, in workspace order
pub(crate) fn snapshot(git: &dyn Git, workspace: &Workspace) -> Vec<GitRef> {
    workspace
        .repositories
        .iter()
        .map(|repo| read_git_ref(git, repo, &workspace.repo_path(&repo.name)))
        .collect()
}

impl Workshed {
    /// Snapshot branch, commit and dirty state of every repository.
    ///
    /// Only a missing workspace fails the call; unreadable repositories are
    /// recorded as degraded entries (empty commit, `error` set).
    pub async fn capture_state(&self, handle: &str, request: CaptureRequest) -> Result<Capture> {
        let _guard = self.lock_handle(handle).await;
        self.capture_locked(handle, request).await
    }

    /// Capture while the caller already holds the handle lock
    pub(crate) async fn capture_locked(
        &self,
        handle: &str,
        request: CaptureRequest,
    ) -> Result<Capture> {
        let workspace = self.load(handle)?;
        let git_state = self
            .with_git(move |git| snapshot(git, &workspace))
            .await?;

        let timestamp = Utc::now();
        let name = match request.name.trim() {
            "" => format!("capture-{}", timestamp.format("%Y%m%d-%H%M%S")),
            name => name.to_string(),
        };
        let capture = Capture {
            id: Uuid::now_v7().to_string(),
            handle: handle.to_string(),
            name,
            timestamp,
            kind: request.kind,
            git_state,
            metadata: CaptureMetadata {
                description: request.description,
                tags: request.tags,
                custom: request.custom,
            },
        };

        for entry in capture.git_state.iter().filter(|r| r.is_degraded()) {
            warn!(
                handle,
                repository = %entry.repository,
                error = entry.error.as_deref().unwrap_or_default(),
                "Repository captured in degraded state"
            );
        }

        self.store.save_capture(handle, &capture.id, &capture)?;
        info!(
            handle,
            capture = %capture.id,
            kind = capture.kind.as_str(),
            repositories = capture.git_state.len(),
            "Capture recorded"
        );
        Ok(capture)
    }

    /// Captures of a workspace, oldest first
    pub fn list_captures(&self, handle: &str) -> Result<Vec<Capture>> {
        self.load(handle)?;
        Ok(self.store.list_captures(handle)?)
    }

    pub fn get_capture(&self, handle: &str, id: &str) -> Result<Capture> {
        self.load(handle)?;
        self.store
            .load_capture(handle, id)?
            .ok_or_else(|| WorkshedError::CaptureNotFound {
                handle: handle.to_string(),
                capture: id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{CloneOptions, ScriptedGit, ScriptedRemote};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn workspace(root: &Path) -> Workspace {
        Workspace {
            handle: "ws1".to_string(),
            purpose: "test".to_string(),
            path: root.to_path_buf(),
            created_at: Utc::now(),
            repositories: vec![
                Repository {
                    name: "backend".to_string(),
                    url: "https://example.com/backend".to_string(),
                    reference: String::new(),
                },
                Repository {
                    name: "frontend".to_string(),
                    url: "https://example.com/frontend".to_string(),
                    reference: String::new(),
                },
            ],
        }
    }

    #[test]
    fn test_snapshot_records_dirty_and_degraded() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(temp.path());
        let git = ScriptedGit::new();
        git.add_remote("https://example.com/backend", ScriptedRemote::new("main", "b1"));
        let backend: PathBuf = ws.repo_path("backend");
        git.clone_repo("https://example.com/backend", &backend, &CloneOptions::default())
            .unwrap();
        git.set_status(&backend, " M src/lib.rs\n");

        let refs = snapshot(&git, &ws);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].repository, "backend");
        assert_eq!(refs[0].commit, "b1");
        assert_eq!(refs[0].branch, "main");
        assert!(refs[0].dirty);
        assert_eq!(refs[0].status.as_deref(), Some(" M src/lib.rs\n"));

        // frontend was never cloned
        assert!(refs[1].is_degraded());
        assert!(refs[1].commit.is_empty());
        assert!(!refs[1].dirty);
    }

    #[test]
    fn test_capture_json_shape() {
        let capture = Capture {
            id: "id".to_string(),
            handle: "ws1".to_string(),
            name: "n".to_string(),
            timestamp: Utc::now(),
            kind: CaptureKind::Auto,
            git_state: vec![],
            metadata: CaptureMetadata::default(),
        };
        let json = serde_json::to_value(&capture).unwrap();
        assert_eq!(json["kind"], "auto");
        assert!(json["git_state"].as_array().unwrap().is_empty());
    }
}
