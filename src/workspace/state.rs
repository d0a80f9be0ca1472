//! Workspace metadata and on-disk persistence
//!
//! Layout under the workspaces directory:
//!
//! ```text
//! <handle>/                      workspace directory, one clone per repository
//! <handle>/.workshed/workspace.json
//! <handle>/.workshed/captures/<id>.json
//! <handle>/.workshed/executions/<id>.json
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const META_DIR: &str = ".workshed";
const WORKSPACE_FILE: &str = "workspace.json";
const CAPTURES_DIR: &str = "captures";
const EXECUTIONS_DIR: &str = "executions";

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to read state: {0}")]
    ReadError(String),
    #[error("Failed to write state: {0}")]
    WriteError(String),
    #[error("Failed to parse state: {0}")]
    ParseError(String),
}

/// Workspace metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    pub handle: String,
    pub purpose: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

/// A git repository that belongs to a workspace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Repository {
    pub name: String,
    pub url: String,
    /// Branch, tag or commit; empty = default branch
    #[serde(rename = "ref", default)]
    pub reference: String,
}

impl Workspace {
    pub fn repository(&self, name: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.name == name)
    }

    /// Checkout directory of a repository
    pub fn repo_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

/// File-backed store for workspaces, captures and execution records
#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    workspaces_dir: PathBuf,
}

impl WorkspaceStore {
    pub fn new(workspaces_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspaces_dir: workspaces_dir.into(),
        }
    }

    pub fn workspaces_dir(&self) -> &Path {
        &self.workspaces_dir
    }

    pub fn workspace_dir(&self, handle: &str) -> PathBuf {
        self.workspaces_dir.join(handle)
    }

    fn meta_dir(&self, handle: &str) -> PathBuf {
        self.workspace_dir(handle).join(META_DIR)
    }

    /// True if a workspace directory is present, registered or not
    pub fn exists(&self, handle: &str) -> bool {
        self.workspace_dir(handle).exists()
    }

    pub fn load_workspace(&self, handle: &str) -> Result<Option<Workspace>, StateError> {
        read_json_opt(&self.meta_dir(handle).join(WORKSPACE_FILE))
    }

    pub fn save_workspace(&self, workspace: &Workspace) -> Result<(), StateError> {
        write_json(
            &self.meta_dir(&workspace.handle).join(WORKSPACE_FILE),
            workspace,
        )
    }

    /// All registered workspaces, ordered by creation time then handle
    pub fn list_workspaces(&self) -> Result<Vec<Workspace>, StateError> {
        let entries = match fs::read_dir(&self.workspaces_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StateError::ReadError(e.to_string())),
        };

        let mut workspaces = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StateError::ReadError(e.to_string()))?;
            let handle = entry.file_name().to_string_lossy().to_string();
            if let Some(ws) = self.load_workspace(&handle)? {
                workspaces.push(ws);
            }
        }
        workspaces.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.handle.cmp(&b.handle))
        });
        Ok(workspaces)
    }

    /// Delete the workspace directory, clones and history included
    pub fn remove_workspace(&self, handle: &str) -> Result<(), StateError> {
        let dir = self.workspace_dir(handle);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::WriteError(format!("{}: {}", dir.display(), e))),
        }
    }

    pub fn save_capture<T: Serialize>(
        &self,
        handle: &str,
        id: &str,
        capture: &T,
    ) -> Result<(), StateError> {
        write_json(&self.record_path(handle, CAPTURES_DIR, id), capture)
    }

    pub fn load_capture<T: DeserializeOwned>(
        &self,
        handle: &str,
        id: &str,
    ) -> Result<Option<T>, StateError> {
        if !is_record_id(id) {
            return Ok(None);
        }
        read_json_opt(&self.record_path(handle, CAPTURES_DIR, id))
    }

    pub fn list_captures<T: DeserializeOwned>(&self, handle: &str) -> Result<Vec<T>, StateError> {
        self.list_records(handle, CAPTURES_DIR)
    }

    pub fn save_execution<T: Serialize>(
        &self,
        handle: &str,
        id: &str,
        record: &T,
    ) -> Result<(), StateError> {
        write_json(&self.record_path(handle, EXECUTIONS_DIR, id), record)
    }

    pub fn load_execution<T: DeserializeOwned>(
        &self,
        handle: &str,
        id: &str,
    ) -> Result<Option<T>, StateError> {
        if !is_record_id(id) {
            return Ok(None);
        }
        read_json_opt(&self.record_path(handle, EXECUTIONS_DIR, id))
    }

    pub fn list_executions<T: DeserializeOwned>(&self, handle: &str) -> Result<Vec<T>, StateError> {
        self.list_records(handle, EXECUTIONS_DIR)
    }

    fn record_path(&self, handle: &str, kind: &str, id: &str) -> PathBuf {
        self.meta_dir(handle).join(kind).join(format!("{}.json", id))
    }

    /// Records in file-name order. IDs are UUID v7, so this is creation order.
    fn list_records<T: DeserializeOwned>(
        &self,
        handle: &str,
        kind: &str,
    ) -> Result<Vec<T>, StateError> {
        let dir = self.meta_dir(handle).join(kind);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StateError::ReadError(e.to_string())),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| StateError::ReadError(e.to_string()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(|p| read_json(p)).collect()
    }
}

/// Record IDs are used as file names; reject anything path-like.
fn is_record_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StateError> {
    let content = fs::read_to_string(path)
        .map_err(|e| StateError::ReadError(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| StateError::ParseError(format!("{}: {}", path.display(), e)))
}

fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StateError> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

/// Write via a temp file and rename so readers never see a partial file
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StateError::WriteError(e.to_string()))?;
    }

    let content =
        serde_json::to_string_pretty(value).map_err(|e| StateError::WriteError(e.to_string()))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(|e| StateError::WriteError(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| StateError::WriteError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn workspace(store: &WorkspaceStore, handle: &str, created_at: DateTime<Utc>) -> Workspace {
        Workspace {
            handle: handle.to_string(),
            purpose: "test".to_string(),
            path: store.workspace_dir(handle),
            created_at,
            repositories: vec![Repository {
                name: "api".to_string(),
                url: "https://example.com/org/api".to_string(),
                reference: String::new(),
            }],
        }
    }

    #[test]
    fn test_save_and_load_workspace() {
        let temp = TempDir::new().unwrap();
        let store = WorkspaceStore::new(temp.path());
        let ws = workspace(&store, "calm-red-fox", Utc::now());

        store.save_workspace(&ws).unwrap();
        let loaded = store.load_workspace("calm-red-fox").unwrap().unwrap();
        assert_eq!(loaded, ws);
        assert!(store.load_workspace("missing").unwrap().is_none());
        assert!(!temp
            .path()
            .join("calm-red-fox/.workshed/workspace.json.tmp")
            .exists());
    }

    #[test]
    fn test_list_orders_by_creation() {
        let temp = TempDir::new().unwrap();
        let store = WorkspaceStore::new(temp.path());
        let now = Utc::now();
        store.save_workspace(&workspace(&store, "b-later", now)).unwrap();
        store
            .save_workspace(&workspace(&store, "z-earlier", now - Duration::seconds(10)))
            .unwrap();
        // Unregistered directories are ignored
        fs::create_dir_all(temp.path().join("stray")).unwrap();

        let handles: Vec<String> = store
            .list_workspaces()
            .unwrap()
            .into_iter()
            .map(|w| w.handle)
            .collect();
        assert_eq!(handles, vec!["z-earlier", "b-later"]);
    }

    #[test]
    fn test_records_round_trip_in_id_order() {
        let temp = TempDir::new().unwrap();
        let store = WorkspaceStore::new(temp.path());
        store.save_capture("ws", "0002", &"second".to_string()).unwrap();
        store.save_capture("ws", "0001", &"first".to_string()).unwrap();

        let all: Vec<String> = store.list_captures("ws").unwrap();
        assert_eq!(all, vec!["first", "second"]);
        let one: Option<String> = store.load_capture("ws", "0002").unwrap();
        assert_eq!(one.as_deref(), Some("second"));
        let escaped: Option<String> = store.load_capture("ws", "../0001").unwrap();
        assert!(escaped.is_none());
    }

    #[test]
    fn test_remove_workspace_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = WorkspaceStore::new(temp.path());
        store
            .save_workspace(&workspace(&store, "gone", Utc::now()))
            .unwrap();
        store.remove_workspace("gone").unwrap();
        assert!(!store.exists("gone"));
        store.remove_workspace("gone").unwrap();
    }
}
