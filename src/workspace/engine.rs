//! Engine facade shared by the registry, capture, apply, exec and context code

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::git::{CloneOptions, Git};
use crate::workspace::config::WorkshedConfig;
use crate::workspace::error::{Result, WorkshedError};
use crate::workspace::state::{Workspace, WorkspaceStore};

/// Workspace state engine.
///
/// Every operation is scoped by workspace handle. Mutating operations take a
/// per-handle lock, so a concurrent `exec` and `apply_capture` on the same
/// workspace never race on a working tree.
pub struct Workshed {
    pub(crate) config: WorkshedConfig,
    pub(crate) store: WorkspaceStore,
    pub(crate) git: Arc<dyn Git>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Workshed {
    pub fn new(config: WorkshedConfig, git: Arc<dyn Git>) -> Self {
        let store = WorkspaceStore::new(config.workspaces_dir());
        Self {
            config,
            store,
            git,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &WorkshedConfig {
        &self.config
    }

    /// Serialize mutating operations per handle
    pub(crate) async fn lock_handle(&self, handle: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(handle.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Release a handle lock and drop its map entry when nobody else holds
    /// or waits on it. Used once the workspace is gone.
    pub(crate) fn release_handle(&self, handle: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Clones are only taken under this map lock, so a count of one is final
        if locks.get(handle).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(handle);
        }
    }

    pub(crate) fn load(&self, handle: &str) -> Result<Workspace> {
        self.store
            .load_workspace(handle)?
            .ok_or_else(|| WorkshedError::WorkspaceNotFound(handle.to_string()))
    }

    pub(crate) fn clone_options(&self) -> CloneOptions {
        CloneOptions {
            depth: self.config.clone.depth,
            mirror: false,
        }
    }

    /// Run git work on the blocking pool
    pub(crate) async fn with_git<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Git) -> T + Send + 'static,
        T: Send + 'static,
    {
        let git = Arc::clone(&self.git);
        tokio::task::spawn_blocking(move || f(git.as_ref()))
            .await
            .map_err(|e| WorkshedError::Internal(format!("git task failed: {}", e)))
    }
}
