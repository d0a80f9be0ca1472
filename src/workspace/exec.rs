//! Command execution across the repositories of a workspace

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::workspace::engine::Workshed;
use crate::workspace::error::{Result, WorkshedError};

/// Input for [`Workshed::exec`]
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Program and arguments, run without a shell
    pub command: Vec<String>,
    /// Single repository to run in; None = every repository
    pub target: Option<String>,
    pub parallel: bool,
    /// Deadline for the whole batch
    pub timeout: Option<Duration>,
}

/// Why an invocation produced no exit code
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ExecFailure {
    #[error("timed out")]
    TimedOut,
    #[error("cancelled")]
    Cancelled,
    #[error("failed to start: {0}")]
    SpawnFailed(String),
    #[error("terminated by signal")]
    Terminated,
    #[error("repository directory missing")]
    MissingDirectory,
}

/// Result of running the command in one repository
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecResult {
    pub repository: String,
    /// None when the process did not exit normally, see `error`
    pub exit_code: Option<i32>,
    /// stdout and stderr interleaved by line, in arrival order
    pub output: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecFailure>,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionRepoResult {
    pub repository: String,
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecFailure>,
    #[serde(default)]
    pub duration_ms: u64,
    /// Output, truncated
    #[serde(default)]
    pub output: String,
}

/// Persisted summary of one exec batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub handle: String,
    pub command: Vec<String>,
    /// Highest exit code observed; at least 1 if any invocation had none
    pub exit_code: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub results: Vec<ExecutionRepoResult>,
}

impl ExecutionRecord {
    pub fn failed_repositories(&self) -> impl Iterator<Item = &ExecutionRepoResult> {
        self.results
            .iter()
            .filter(|r| r.exit_code != Some(0) || r.error.is_some())
    }
}

/// What [`Workshed::exec`] returns: full results plus the persisted record
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub results: Vec<ExecResult>,
    pub record: ExecutionRecord,
}

/// Aggregate exit code: the maximum observed, and never 0 when some
/// invocation produced no exit code at all.
pub fn aggregate_exit_code(results: &[ExecResult]) -> i32 {
    let max = results.iter().filter_map(|r| r.exit_code).max().unwrap_or(0);
    if results.iter().any(|r| r.exit_code.is_none()) {
        max.max(1)
    } else {
        max
    }
}

fn truncate_output(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... [truncated]", &s[..cut])
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

type StopSignal = watch::Receiver<Option<ExecFailure>>;

/// Resolves once the batch is told to stop. Never resolves if the sender is gone.
async fn stopped(stop: &mut StopSignal) -> ExecFailure {
    let reason = match stop.wait_for(|s| s.is_some()).await {
        Ok(reason) => reason.clone(),
        Err(_) => None,
    };
    match reason {
        Some(reason) => reason,
        None => std::future::pending().await,
    }
}

fn failed(repository: &str, started: Instant, error: ExecFailure) -> ExecResult {
    ExecResult {
        repository: repository.to_string(),
        exit_code: None,
        output: String::new(),
        duration_ms: elapsed_ms(started),
        error: Some(error),
    }
}

/// Collect stdout and stderr line by line in arrival order, the way a
/// terminal would show them. Partial lines stay buffered across polls.
async fn read_combined(stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) -> String {
    let mut out = stdout.map(BufReader::new);
    let mut err = stderr.map(BufReader::new);
    let (mut out_line, mut err_line) = (Vec::new(), Vec::new());
    let mut combined = Vec::new();

    while out.is_some() || err.is_some() {
        tokio::select! {
            biased;
            read = async { out.as_mut()?.read_until(b'\n', &mut out_line).await.ok() },
                if out.is_some() => match read {
                    Some(n) if n > 0 => combined.append(&mut out_line),
                    _ => out = None,
                },
            read = async { err.as_mut()?.read_until(b'\n', &mut err_line).await.ok() },
                if err.is_some() => match read {
                    Some(n) if n > 0 => combined.append(&mut err_line),
                    _ => err = None,
                },
        }
    }
    String::from_utf8_lossy(&combined).to_string()
}

async fn invoke(
    repository: String,
    dir: PathBuf,
    command: Vec<String>,
    mut stop: StopSignal,
) -> ExecResult {
    let started = Instant::now();

    let pending = stop.borrow().clone();
    if let Some(reason) = pending {
        return failed(&repository, started, reason);
    }
    if !dir.is_dir() {
        return failed(&repository, started, ExecFailure::MissingDirectory);
    }

    let child = Command::new(&command[0])
        .args(&command[1..])
        .current_dir(&dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let mut child = match child {
        Ok(child) => child,
        Err(e) => return failed(&repository, started, ExecFailure::SpawnFailed(e.to_string())),
    };

    let run = async move {
        let output = read_combined(child.stdout.take(), child.stderr.take()).await;
        child.wait().await.map(|status| (status, output))
    };

    // Losing the select drops the child, and kill_on_drop terminates it.
    tokio::select! {
        finished = run => match finished {
            Ok((status, output)) => {
                let exit_code = status.code();
                ExecResult {
                    repository,
                    exit_code,
                    output,
                    duration_ms: elapsed_ms(started),
                    error: exit_code.is_none().then_some(ExecFailure::Terminated),
                }
            }
            Err(e) => failed(&repository, started, ExecFailure::SpawnFailed(e.to_string())),
        },
        reason = stopped(&mut stop) => failed(&repository, started, reason),
    }
}

impl Workshed {
    /// Run a command in one or all repositories and record the batch.
    pub async fn exec(&self, handle: &str, opts: ExecOptions) -> Result<ExecOutcome> {
        self.exec_until(handle, opts, std::future::pending::<()>())
            .await
    }

    /// Like [`Workshed::exec`], stopping early when `cancel` resolves.
    ///
    /// On deadline expiry or cancellation running processes are killed and
    /// every unfinished repository is recorded with `TimedOut`/`Cancelled`.
    /// A failing repository never stops its siblings, and the record is
    /// written either way.
    pub async fn exec_until<F>(
        &self,
        handle: &str,
        opts: ExecOptions,
        cancel: F,
    ) -> Result<ExecOutcome>
    where
        F: Future<Output = ()>,
    {
        if opts.command.first().map_or(true, |p| p.trim().is_empty()) {
            return Err(WorkshedError::Validation("command cannot be empty".to_string()));
        }

        let _guard = self.lock_handle(handle).await;
        let workspace = self.load(handle)?;

        let targets: Vec<(String, PathBuf)> = match &opts.target {
            Some(name) => {
                let repo = workspace.repository(name).ok_or_else(|| {
                    WorkshedError::RepositoryNotFound {
                        handle: handle.to_string(),
                        repository: name.clone(),
                    }
                })?;
                vec![(repo.name.clone(), workspace.repo_path(&repo.name))]
            }
            None => workspace
                .repositories
                .iter()
                .map(|r| (r.name.clone(), workspace.repo_path(&r.name)))
                .collect(),
        };

        info!(
            handle,
            command = ?opts.command,
            repositories = targets.len(),
            parallel = opts.parallel,
            "Executing command"
        );

        let started_at = Utc::now();
        let started = Instant::now();
        let (stop_tx, stop_rx) = watch::channel(None);

        let command = opts.command.clone();
        let parallel = opts.parallel;
        let batch = async move {
            if parallel {
                join_all(targets.into_iter().map(|(name, dir)| {
                    invoke(name, dir, command.clone(), stop_rx.clone())
                }))
                .await
            } else {
                let mut results = Vec::with_capacity(targets.len());
                for (name, dir) in targets {
                    results.push(invoke(name, dir, command.clone(), stop_rx.clone()).await);
                }
                results
            }
        };
        tokio::pin!(batch);

        let deadline = async {
            match opts.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        let results = tokio::select! {
            results = &mut batch => results,
            _ = deadline => {
                warn!(handle, "Exec deadline expired, stopping remaining repositories");
                let _ = stop_tx.send(Some(ExecFailure::TimedOut));
                batch.await
            }
            _ = cancel => {
                warn!(handle, "Exec cancelled, stopping remaining repositories");
                let _ = stop_tx.send(Some(ExecFailure::Cancelled));
                batch.await
            }
        };

        let max_output = self.config.exec.max_output_bytes;
        let record = ExecutionRecord {
            id: Uuid::now_v7().to_string(),
            timestamp: started_at,
            handle: handle.to_string(),
            command: opts.command.clone(),
            exit_code: aggregate_exit_code(&results),
            started_at,
            completed_at: Utc::now(),
            duration_ms: elapsed_ms(started),
            results: results
                .iter()
                .map(|r| ExecutionRepoResult {
                    repository: r.repository.clone(),
                    exit_code: r.exit_code,
                    error: r.error.clone(),
                    duration_ms: r.duration_ms,
                    output: truncate_output(&r.output, max_output),
                })
                .collect(),
        };
        self.store.save_execution(handle, &record.id, &record)?;

        if record.exit_code == 0 {
            info!(handle, execution = %record.id, "Command completed");
        } else {
            warn!(
                handle,
                execution = %record.id,
                exit_code = record.exit_code,
                failed = record.failed_repositories().count(),
                "Command failed in some repositories"
            );
        }

        Ok(ExecOutcome { results, record })
    }

    /// Execution records, oldest first; `limit` keeps the most recent ones
    pub fn list_executions(
        &self,
        handle: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ExecutionRecord>> {
        self.load(handle)?;
        let mut records: Vec<ExecutionRecord> = self.store.list_executions(handle)?;
        if let Some(limit) = limit {
            let skip = records.len().saturating_sub(limit);
            records.drain(..skip);
        }
        Ok(records)
    }

    pub fn get_execution(&self, handle: &str, id: &str) -> Result<ExecutionRecord> {
        self.load(handle)?;
        self.store
            .load_execution(handle, id)?
            .ok_or_else(|| WorkshedError::ExecutionNotFound {
                handle: handle.to_string(),
                execution: id.to_string(),
            })
    }
}
