//! Workspace registry - lifecycle of workspaces and their repositories

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::git::{same_remote, CloneOptions, Git, GitError};
use crate::workspace::engine::Workshed;
use crate::workspace::error::{Result, WorkshedError};
use crate::workspace::handle::generate_handle;
use crate::workspace::repo_spec::{derive_name, resolve_local, RepoSpec};
use crate::workspace::state::{Repository, Workspace};
use crate::workspace::template::copy_template;

/// Input for [`Workshed::create`]
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub purpose: String,
    /// Repository specs, see [`RepoSpec`]
    pub repositories: Vec<String>,
    /// Base for `./` and `../` specs
    pub invocation_dir: PathBuf,
    pub template: Option<PathBuf>,
    pub template_vars: HashMap<String, String>,
}

/// Filter for [`Workshed::list`]; all set fields must match
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Case-insensitive substring of the purpose
    pub purpose: Option<String>,
    /// Exact repository name
    pub repository: Option<String>,
}

impl ListFilter {
    fn matches(&self, workspace: &Workspace) -> bool {
        if let Some(purpose) = &self.purpose {
            if !workspace
                .purpose
                .to_lowercase()
                .contains(&purpose.to_lowercase())
            {
                return false;
            }
        }
        if let Some(repo) = &self.repository {
            if workspace.repository(repo).is_none() {
                return false;
            }
        }
        true
    }
}

struct CloneFailure {
    repository: String,
    succeeded: Vec<String>,
    error: GitError,
}

/// Turn a spec string into a repository record (name not yet de-duplicated)
fn resolve_spec(spec: &str, invocation_dir: &Path) -> Result<Repository> {
    if spec.trim().is_empty() {
        return Err(WorkshedError::Validation(
            "repository spec cannot be empty".to_string(),
        ));
    }
    let parsed = RepoSpec::parse(spec);
    let url = if parsed.is_local() {
        resolve_local(&parsed.url, invocation_dir)
            .to_string_lossy()
            .to_string()
    } else {
        parsed.url
    };
    Ok(Repository {
        name: derive_name(&url),
        url,
        reference: parsed.reference,
    })
}

/// Give repositories whose derived names collide `-2`, `-3`, ... suffixes
fn dedupe_names(repos: &mut [Repository]) {
    let mut used: HashSet<String> = HashSet::new();
    for repo in repos.iter_mut() {
        if used.contains(&repo.name) {
            let base = repo.name.clone();
            let mut n = 2;
            while used.contains(&format!("{}-{}", base, n)) {
                n += 1;
            }
            repo.name = format!("{}-{}", base, n);
        }
        used.insert(repo.name.clone());
    }
}

fn clone_one(
    git: &dyn Git,
    repo: &Repository,
    dir: &Path,
    opts: &CloneOptions,
) -> Result<(), GitError> {
    git.clone_repo(&repo.url, dir, opts)?;
    if !repo.reference.is_empty() {
        git.checkout(dir, &repo.reference)?;
    }
    Ok(())
}

/// Clone every repository under `root`, stopping at the first failure
fn clone_all(
    git: &dyn Git,
    root: &Path,
    repos: &[Repository],
    opts: &CloneOptions,
) -> std::result::Result<(), CloneFailure> {
    let mut succeeded = Vec::new();
    for repo in repos {
        match clone_one(git, repo, &root.join(&repo.name), opts) {
            Ok(()) => {
                info!(repository = %repo.name, url = %repo.url, "Repository cloned");
                succeeded.push(repo.name.clone());
            }
            Err(error) => {
                return Err(CloneFailure {
                    repository: repo.name.clone(),
                    succeeded,
                    error,
                })
            }
        }
    }
    Ok(())
}

impl Workshed {
    /// Create a workspace and clone its repositories.
    ///
    /// A clone failure removes the workspace directory (siblings that were
    /// already cloned included) and reports which repositories had succeeded.
    /// A template copy failure leaves the workspace in place.
    pub async fn create(&self, opts: CreateOptions) -> Result<Workspace> {
        let purpose = opts.purpose.trim().to_string();
        if purpose.is_empty() {
            return Err(WorkshedError::Validation("purpose cannot be empty".to_string()));
        }

        let mut repos = opts
            .repositories
            .iter()
            .map(|spec| resolve_spec(spec, &opts.invocation_dir))
            .collect::<Result<Vec<_>>>()?;
        for (i, repo) in repos.iter().enumerate() {
            if repos[..i].iter().any(|r| same_remote(&r.url, &repo.url)) {
                return Err(WorkshedError::Validation(format!(
                    "repository listed twice: {}",
                    repo.url
                )));
            }
        }
        dedupe_names(&mut repos);

        let handle = generate_handle(
            self.config.handles.words,
            self.config.handles.max_attempts,
            |h| self.store.exists(h),
        )?;
        let guard = self.lock_handle(&handle).await;

        let workspace = match self.materialize(&handle, &purpose, repos).await {
            Ok(workspace) => workspace,
            Err(e) => {
                self.release_handle(&handle, guard);
                return Err(e);
            }
        };

        if let Some(template) = &opts.template {
            let template = template.clone();
            let dest = workspace.path.clone();
            let vars = opts.template_vars.clone();
            let copied = tokio::task::spawn_blocking(move || copy_template(&template, &dest, &vars))
                .await
                .map_err(|e| WorkshedError::Internal(format!("template task failed: {}", e)))?;
            match copied {
                Ok(files) => info!(handle = %handle, files, "Template applied"),
                Err(message) => {
                    warn!(handle = %handle, error = %message, "Template copy failed");
                    return Err(WorkshedError::Template { handle, message });
                }
            }
        }

        Ok(workspace)
    }

    /// Create the directory, clone, and persist. Caller holds the handle lock.
    pub(crate) async fn materialize(
        &self,
        handle: &str,
        purpose: &str,
        repos: Vec<Repository>,
    ) -> Result<Workspace> {
        if self.store.exists(handle) {
            return Err(WorkshedError::WorkspaceExists(handle.to_string()));
        }
        let path = self.store.workspace_dir(handle);
        fs::create_dir_all(&path).map_err(|e| WorkshedError::Io(e.to_string()))?;

        let root = path.clone();
        let to_clone = repos.clone();
        let clone_opts = self.clone_options();
        let cloned = self
            .with_git(move |git| clone_all(git, &root, &to_clone, &clone_opts))
            .await?;

        if let Err(failure) = cloned {
            warn!(
                handle,
                repository = %failure.repository,
                error = %failure.error,
                "Clone failed, removing workspace"
            );
            if let Err(e) = self.store.remove_workspace(handle) {
                warn!(handle, error = %e, "Failed to clean up workspace directory");
            }
            return Err(WorkshedError::CloneFailed {
                handle: handle.to_string(),
                repository: failure.repository,
                succeeded: failure.succeeded,
                source: failure.error,
            });
        }

        let workspace = Workspace {
            handle: handle.to_string(),
            purpose: purpose.to_string(),
            path,
            created_at: Utc::now(),
            repositories: repos,
        };
        self.store.save_workspace(&workspace)?;

        info!(
            handle,
            repositories = workspace.repositories.len(),
            "Workspace created"
        );
        Ok(workspace)
    }

    pub fn get(&self, handle: &str) -> Result<Workspace> {
        self.load(handle)
    }

    /// Workspaces matching `filter`, oldest first
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<Workspace>> {
        Ok(self
            .store
            .list_workspaces()?
            .into_iter()
            .filter(|w| filter.matches(w))
            .collect())
    }

    /// Workspace directory
    pub fn path(&self, handle: &str) -> Result<PathBuf> {
        Ok(self.load(handle)?.path)
    }

    /// Delete a workspace, its clones and its history. Irreversible.
    pub async fn remove(&self, handle: &str) -> Result<()> {
        let guard = self.lock_handle(handle).await;
        if let Err(e) = self.load(handle) {
            self.release_handle(handle, guard);
            return Err(e);
        }
        self.store.remove_workspace(handle)?;
        self.release_handle(handle, guard);
        info!(handle, "Workspace removed");
        Ok(())
    }

    pub async fn update_purpose(&self, handle: &str, purpose: &str) -> Result<Workspace> {
        let purpose = purpose.trim();
        if purpose.is_empty() {
            return Err(WorkshedError::Validation("purpose cannot be empty".to_string()));
        }
        let _guard = self.lock_handle(handle).await;
        let mut workspace = self.load(handle)?;
        workspace.purpose = purpose.to_string();
        self.store.save_workspace(&workspace)?;
        info!(handle, "Purpose updated");
        Ok(workspace)
    }

    /// Clone a repository into an existing workspace.
    ///
    /// Fails with a conflict when the name or URL is already registered, and
    /// with [`WorkshedError::PathOccupied`] when something that is not a git
    /// checkout sits at the target path.
    pub async fn add_repository(
        &self,
        handle: &str,
        spec: &str,
        invocation_dir: &Path,
    ) -> Result<Repository> {
        let repo = resolve_spec(spec, invocation_dir)?;
        let _guard = self.lock_handle(handle).await;
        let mut workspace = self.load(handle)?;

        if workspace
            .repositories
            .iter()
            .any(|r| r.name == repo.name || same_remote(&r.url, &repo.url))
        {
            return Err(WorkshedError::RepositoryExists {
                handle: handle.to_string(),
                repository: repo.name,
            });
        }

        let dir = workspace.repo_path(&repo.name);
        if dir.exists() {
            if dir.join(".git").exists() {
                return Err(WorkshedError::RepositoryExists {
                    handle: handle.to_string(),
                    repository: repo.name,
                });
            }
            return Err(WorkshedError::PathOccupied(dir));
        }

        let to_clone = repo.clone();
        let target = dir.clone();
        let clone_opts = self.clone_options();
        let cloned = self
            .with_git(move |git| clone_one(git, &to_clone, &target, &clone_opts))
            .await?;
        if let Err(source) = cloned {
            warn!(handle, repository = %repo.name, error = %source, "Clone failed");
            if dir.exists() {
                if let Err(e) = fs::remove_dir_all(&dir) {
                    warn!(
                        handle,
                        path = %dir.display(),
                        error = %e,
                        "Failed to remove partial clone"
                    );
                }
            }
            return Err(WorkshedError::CloneFailed {
                handle: handle.to_string(),
                repository: repo.name,
                succeeded: Vec::new(),
                source,
            });
        }

        workspace.repositories.push(repo.clone());
        self.store.save_workspace(&workspace)?;
        info!(handle, repository = %repo.name, "Repository added");
        Ok(repo)
    }

    /// Drop a repository and delete its checkout
    pub async fn remove_repository(&self, handle: &str, name: &str) -> Result<()> {
        let _guard = self.lock_handle(handle).await;
        let mut workspace = self.load(handle)?;
        let index = workspace
            .repositories
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| WorkshedError::RepositoryNotFound {
                handle: handle.to_string(),
                repository: name.to_string(),
            })?;

        let dir = workspace.repo_path(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(WorkshedError::Io(format!("{}: {}", dir.display(), e))),
        }

        workspace.repositories.remove(index);
        self.store.save_workspace(&workspace)?;
        info!(handle, repository = name, "Repository removed");
        Ok(())
    }
}
