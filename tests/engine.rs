//! Engine integration tests
//!
//! Every test runs against a fresh root under a temp directory and the
//! in-memory git double, so no network or git binary is needed. Exec tests
//! spawn real processes and are unix-only.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use workshed::git::{Git, GitErrorKind, ScriptedGit, ScriptedRemote};
use workshed::workspace::{
    ApplyOptions, ApplyOutcome, CaptureKind, CaptureRequest, CreateOptions, ExecOptions,
    ExportOptions, ImportOptions, ListFilter, PreflightReason, Workshed, WorkshedConfig,
    WorkshedError, Workspace,
};

const API: &str = "https://example.com/org/api";
const WEB: &str = "https://example.com/org/web";
const DOCS: &str = "https://example.com/org/docs";

fn scripted() -> Arc<ScriptedGit> {
    let git = ScriptedGit::new();
    git.add_remote(API, ScriptedRemote::new("main", "a1").with_branch("v2", "a2"));
    git.add_remote(WEB, ScriptedRemote::new("main", "w1"));
    git.add_remote(DOCS, ScriptedRemote::new("trunk", "d1"));
    Arc::new(git)
}

fn engine(root: &Path, git: &Arc<ScriptedGit>) -> Workshed {
    Workshed::new(WorkshedConfig::with_root(root), git.clone())
}

async fn create(engine: &Workshed, repos: &[&str]) -> Workspace {
    engine
        .create(CreateOptions {
            purpose: "checkout flow".to_string(),
            repositories: repos.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
        .await
        .unwrap()
}

fn request(name: &str) -> CaptureRequest {
    CaptureRequest {
        name: name.to_string(),
        ..Default::default()
    }
}

fn command(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_create_clones_and_persists() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);

    let ws = create(&engine, &["example.com/org/api@v2", "example.com/org/web"]).await;

    assert!(ws.path.starts_with(temp.path()));
    let names: Vec<&str> = ws.repositories.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["api", "web"]);
    assert_eq!(ws.repositories[0].reference, "v2");
    assert_eq!(git.head(&ws.repo_path("api")).as_deref(), Some("a2"));
    assert_eq!(git.clones().len(), 2);

    let loaded = engine.get(&ws.handle).unwrap();
    assert_eq!(loaded, ws);
    assert_eq!(engine.path(&ws.handle).unwrap(), ws.path);

    let listed = engine.list(&ListFilter::default()).unwrap();
    assert_eq!(listed.len(), 1);
    let by_repo = ListFilter {
        repository: Some("docs".to_string()),
        ..Default::default()
    };
    assert!(engine.list(&by_repo).unwrap().is_empty());
}

#[tokio::test]
async fn test_create_rejects_bad_input() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);

    let empty = engine
        .create(CreateOptions {
            purpose: "   ".to_string(),
            ..Default::default()
        })
        .await;
    assert!(matches!(empty, Err(WorkshedError::Validation(_))));

    let twice = engine
        .create(CreateOptions {
            purpose: "dup".to_string(),
            repositories: vec![API.to_string(), format!("{}.git", API)],
            ..Default::default()
        })
        .await;
    assert!(matches!(twice, Err(WorkshedError::Validation(_))));
    assert!(git.clones().is_empty());
}

#[tokio::test]
async fn test_clone_failure_removes_workspace() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    git.fail_clone(WEB, "fatal: unable to access 'https://example.com/': Could not resolve host");
    let engine = engine(temp.path(), &git);

    let err = engine
        .create(CreateOptions {
            purpose: "broken".to_string(),
            repositories: vec![API.to_string(), WEB.to_string()],
            ..Default::default()
        })
        .await
        .unwrap_err();

    match err {
        WorkshedError::CloneFailed {
            repository,
            succeeded,
            source,
            ..
        } => {
            assert_eq!(repository, "web");
            assert_eq!(succeeded, vec!["api".to_string()]);
            assert_eq!(source.kind, GitErrorKind::NetworkError);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(engine.list(&ListFilter::default()).unwrap().is_empty());
    let leftovers = std::fs::read_dir(temp.path().join("workspaces"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_template_is_copied_with_variables() {
    let temp = TempDir::new().unwrap();
    let template = TempDir::new().unwrap();
    std::fs::write(template.path().join("README.md"), "ticket {{ticket}}").unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);

    let ws = engine
        .create(CreateOptions {
            purpose: "templated".to_string(),
            repositories: vec![API.to_string()],
            template: Some(template.path().to_path_buf()),
            template_vars: [("ticket".to_string(), "PAY-12".to_string())].into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let readme = std::fs::read_to_string(ws.path.join("README.md")).unwrap();
    assert_eq!(readme, "ticket PAY-12");
}

#[tokio::test]
async fn test_add_and_remove_repository() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API]).await;

    let added = engine
        .add_repository(&ws.handle, "example.com/org/web", temp.path())
        .await
        .unwrap();
    assert_eq!(added.name, "web");
    assert!(ws.repo_path("web").join(".git").is_dir());

    let again = engine.add_repository(&ws.handle, WEB, temp.path()).await;
    assert!(matches!(again, Err(WorkshedError::RepositoryExists { .. })));

    std::fs::create_dir_all(ws.path.join("docs")).unwrap();
    let occupied = engine.add_repository(&ws.handle, DOCS, temp.path()).await;
    assert!(matches!(occupied, Err(WorkshedError::PathOccupied(_))));

    engine.remove_repository(&ws.handle, "web").await.unwrap();
    assert!(!ws.repo_path("web").exists());
    assert!(engine.get(&ws.handle).unwrap().repository("web").is_none());

    let missing = engine.remove_repository(&ws.handle, "web").await;
    assert!(matches!(missing, Err(WorkshedError::RepositoryNotFound { .. })));
}

#[tokio::test]
async fn test_dot_named_repository_keeps_history() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let hidden = "https://example.com/org/.workshed";
    git.add_remote(hidden, ScriptedRemote::new("main", "h1"));
    let engine = engine(temp.path(), &git);

    let ws = create(&engine, &[API, hidden]).await;
    let names: Vec<&str> = ws.repositories.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["api", "workshed"]);
    engine.capture_state(&ws.handle, request("kept")).await.unwrap();

    let err = engine.remove_repository(&ws.handle, ".workshed").await;
    assert!(matches!(err, Err(WorkshedError::RepositoryNotFound { .. })));
    engine.remove_repository(&ws.handle, "workshed").await.unwrap();

    assert_eq!(engine.list_captures(&ws.handle).unwrap().len(), 1);
    assert_eq!(engine.get(&ws.handle).unwrap().repositories.len(), 1);
}

#[tokio::test]
async fn test_update_purpose_and_remove() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API]).await;

    let updated = engine.update_purpose(&ws.handle, "release 2.1").await.unwrap();
    assert_eq!(updated.purpose, "release 2.1");
    assert_eq!(engine.get(&ws.handle).unwrap().purpose, "release 2.1");

    engine.remove(&ws.handle).await.unwrap();
    assert!(!ws.path.exists());
    let err = engine.get(&ws.handle).unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_preflight_is_valid_right_after_capture() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API, WEB]).await;

    let capture = engine.capture_state(&ws.handle, request("baseline")).await.unwrap();
    assert_eq!(capture.git_state.len(), 2);
    assert_eq!(capture.kind, CaptureKind::Manual);

    let result = engine.preflight_apply(&ws.handle, &capture.id).await.unwrap();
    assert!(result.valid, "{}", result.summary());
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn test_capture_records_dirty_state() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API, WEB]).await;
    git.set_status(&ws.repo_path("web"), " M index.html\n?? notes.txt\n");

    let capture = engine.capture_state(&ws.handle, request("")).await.unwrap();

    assert!(capture.name.starts_with("capture-"));
    let api = capture.git_ref("api").unwrap();
    assert!(!api.dirty);
    assert_eq!(api.branch, "main");
    assert_eq!(api.commit, "a1");
    let web = capture.git_ref("web").unwrap();
    assert!(web.dirty);
    assert_eq!(web.status.as_deref(), Some(" M index.html\n?? notes.txt\n"));

    // Still dirty in the same way: applying it back is allowed
    let result = engine.preflight_apply(&ws.handle, &capture.id).await.unwrap();
    assert!(result.valid, "{}", result.summary());
}

#[tokio::test]
async fn test_capture_degrades_unreadable_repository() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API, WEB]).await;
    git.break_repo(&ws.repo_path("api"));

    let capture = engine.capture_state(&ws.handle, request("partial")).await.unwrap();

    let api = capture.git_ref("api").unwrap();
    assert!(api.is_degraded());
    assert!(api.commit.is_empty());
    assert!(api.error.is_some());
    assert!(!capture.git_ref("web").unwrap().is_degraded());

    let result = engine.preflight_apply(&ws.handle, &capture.id).await.unwrap();
    assert!(!result.valid);
    assert!(result.errors.iter().all(|e| e.repository == "api"));
}

#[tokio::test]
async fn test_dirty_repository_blocks_apply() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API, WEB]).await;
    let capture = engine.capture_state(&ws.handle, request("clean")).await.unwrap();

    git.commit(&ws.repo_path("api"), "a9");
    git.set_status(&ws.repo_path("api"), " M src/main.rs\n");

    let result = engine.preflight_apply(&ws.handle, &capture.id).await.unwrap();
    assert!(!result.valid);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].repository, "api");
    assert_eq!(result.errors[0].reason, PreflightReason::DirtyWorkingTree);

    let err = engine
        .apply_capture(&ws.handle, &capture.id, ApplyOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkshedError::PreflightFailed { .. }));
    // Blocked before any checkout
    assert_eq!(git.head(&ws.repo_path("api")).as_deref(), Some("a9"));
    assert_eq!(engine.list_captures(&ws.handle).unwrap().len(), 1);
}

#[tokio::test]
async fn test_preflight_reports_missing_and_mismatched_repositories() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API, WEB]).await;
    let capture = engine.capture_state(&ws.handle, request("two")).await.unwrap();

    engine.remove_repository(&ws.handle, "web").await.unwrap();
    git.set_remote_url(&ws.repo_path("api"), "https://example.com/fork/api");

    let result = engine.preflight_apply(&ws.handle, &capture.id).await.unwrap();
    let reasons: Vec<(&str, PreflightReason)> = result
        .errors
        .iter()
        .map(|e| (e.repository.as_str(), e.reason))
        .collect();
    assert!(reasons.contains(&("api", PreflightReason::UrlMismatch)));
    assert!(reasons.contains(&("web", PreflightReason::MissingRepository)));
}

#[tokio::test]
async fn test_apply_restores_captured_commits() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API, WEB]).await;
    let before = engine.capture_state(&ws.handle, request("before")).await.unwrap();

    git.commit(&ws.repo_path("api"), "a5");
    git.commit(&ws.repo_path("web"), "w5");

    let report = engine
        .apply_capture(&ws.handle, &before.id, ApplyOptions { checkpoint: true })
        .await
        .unwrap();
    assert_eq!(report.outcome, ApplyOutcome::Completed);
    assert_eq!(report.failed().count(), 0);
    assert_eq!(git.head(&ws.repo_path("api")).as_deref(), Some("a1"));
    assert_eq!(git.head(&ws.repo_path("web")).as_deref(), Some("w1"));

    // Branch tips moved on, so the commits are checked out detached
    assert_eq!(report.repositories[0].checked_out, "a1");

    let after = engine.capture_state(&ws.handle, request("after")).await.unwrap();
    let commits = |c: &workshed::workspace::Capture| {
        c.git_state.iter().map(|r| r.commit.clone()).collect::<Vec<_>>()
    };
    assert_eq!(commits(&before), commits(&after));

    // The checkpoint holds the pre-apply state and undoes the apply
    let checkpoint_id = report.checkpoint.unwrap();
    let checkpoint = engine.get_capture(&ws.handle, &checkpoint_id).unwrap();
    assert_eq!(checkpoint.kind, CaptureKind::Auto);
    assert_eq!(checkpoint.git_ref("api").unwrap().commit, "a5");
    engine
        .apply_capture(&ws.handle, &checkpoint_id, ApplyOptions::default())
        .await
        .unwrap();
    assert_eq!(git.head(&ws.repo_path("api")).as_deref(), Some("a5"));
}

#[tokio::test]
async fn test_apply_checks_out_branch_when_tip_matches() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API]).await;
    let on_main = engine.capture_state(&ws.handle, request("main")).await.unwrap();

    git.checkout(&ws.repo_path("api"), "v2").unwrap();
    assert_eq!(git.head(&ws.repo_path("api")).as_deref(), Some("a2"));

    let report = engine
        .apply_capture(&ws.handle, &on_main.id, ApplyOptions::default())
        .await
        .unwrap();
    assert_eq!(report.repositories[0].checked_out, "main");
    assert_eq!(git.head(&ws.repo_path("api")).as_deref(), Some("a1"));
    assert!(report.checkpoint.is_none());
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API]).await;

    let err = engine.get_capture(&ws.handle, "0190c0de-0000-7000-8000-000000000000").unwrap_err();
    assert!(matches!(err, WorkshedError::CaptureNotFound { .. }));
    let err = engine.get_execution(&ws.handle, "nope").unwrap_err();
    assert!(err.is_not_found());
    let err = engine.capture_state("no-such-handle", request("x")).await.unwrap_err();
    assert!(matches!(err, WorkshedError::WorkspaceNotFound(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn test_exec_parallel_keeps_workspace_order() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API, WEB, DOCS]).await;

    let outcome = engine
        .exec(
            &ws.handle,
            ExecOptions {
                command: command(&["echo", "hello"]),
                parallel: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 3);
    let order: Vec<&str> = outcome.results.iter().map(|r| r.repository.as_str()).collect();
    assert_eq!(order, vec!["api", "web", "docs"]);
    for result in &outcome.results {
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.output, "hello\n");
    }
    assert_eq!(outcome.record.exit_code, 0);

    let stored = engine.get_execution(&ws.handle, &outcome.record.id).unwrap();
    assert_eq!(stored, outcome.record);
}

#[cfg(unix)]
#[tokio::test]
async fn test_exec_failure_does_not_stop_siblings() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API, WEB, DOCS]).await;
    std::fs::write(ws.repo_path("web").join("marker"), "").unwrap();

    let outcome = engine
        .exec(
            &ws.handle,
            ExecOptions {
                command: command(&["sh", "-c", "test -f marker || exit 3"]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let codes: Vec<Option<i32>> = outcome.results.iter().map(|r| r.exit_code).collect();
    assert_eq!(codes, vec![Some(3), Some(0), Some(3)]);
    assert_eq!(outcome.record.exit_code, 3);
    let failed: Vec<&str> = outcome
        .record
        .failed_repositories()
        .map(|r| r.repository.as_str())
        .collect();
    assert_eq!(failed, vec!["api", "docs"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_exec_single_target_and_validation() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API, WEB]).await;

    let outcome = engine
        .exec(
            &ws.handle,
            ExecOptions {
                command: command(&["pwd"]),
                target: Some("web".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert!(outcome.results[0].output.trim_end().ends_with("web"));

    let unknown = engine
        .exec(
            &ws.handle,
            ExecOptions {
                command: command(&["pwd"]),
                target: Some("docs".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(unknown, Err(WorkshedError::RepositoryNotFound { .. })));

    let empty = engine.exec(&ws.handle, ExecOptions::default()).await;
    assert!(matches!(empty, Err(WorkshedError::Validation(_))));
    assert_eq!(engine.list_executions(&ws.handle, None).unwrap().len(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_exec_timeout_marks_unfinished_repositories() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API, WEB]).await;

    let outcome = engine
        .exec(
            &ws.handle,
            ExecOptions {
                command: command(&["sleep", "5"]),
                parallel: true,
                timeout: Some(Duration::from_millis(200)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 2);
    for result in &outcome.results {
        assert_eq!(result.exit_code, None);
        assert_eq!(result.error, Some(workshed::workspace::ExecFailure::TimedOut));
    }
    assert!(outcome.record.exit_code >= 1);
    assert!(outcome.record.duration_ms < 5000);
}

#[cfg(unix)]
#[tokio::test]
async fn test_exec_sequential_timeout_skips_unstarted_repositories() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API, WEB, DOCS]).await;

    let outcome = engine
        .exec(
            &ws.handle,
            ExecOptions {
                command: command(&["sleep", "5"]),
                parallel: false,
                timeout: Some(Duration::from_millis(200)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let order: Vec<&str> = outcome.results.iter().map(|r| r.repository.as_str()).collect();
    assert_eq!(order, vec!["api", "web", "docs"]);
    for result in &outcome.results {
        assert_eq!(result.exit_code, None);
        assert_eq!(result.error, Some(workshed::workspace::ExecFailure::TimedOut));
    }
    assert_eq!(outcome.record.exit_code, 1);
    assert_eq!(outcome.record.results.len(), 3);
    assert!(outcome.record.duration_ms < 5000);
}

#[cfg(unix)]
#[tokio::test]
async fn test_exec_cancel() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API]).await;

    let cancel = tokio::time::sleep(Duration::from_millis(100));
    let outcome = engine
        .exec_until(
            &ws.handle,
            ExecOptions {
                command: command(&["sleep", "5"]),
                ..Default::default()
            },
            cancel,
        )
        .await
        .unwrap();
    assert_eq!(
        outcome.results[0].error,
        Some(workshed::workspace::ExecFailure::Cancelled)
    );
    assert_eq!(engine.list_executions(&ws.handle, None).unwrap().len(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_context_counts_captures_and_executions() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API, WEB]).await;

    engine.capture_state(&ws.handle, request("one")).await.unwrap();
    engine.capture_state(&ws.handle, request("two")).await.unwrap();
    for _ in 0..5 {
        engine
            .exec(
                &ws.handle,
                ExecOptions {
                    command: command(&["true"]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let context = engine.derive_context(&ws.handle).unwrap();
    assert_eq!(context.handle, ws.handle);
    assert_eq!(context.purpose, "checkout flow");
    assert_eq!(context.repositories.len(), 2);
    assert_eq!(context.metadata.captures_count, 2);
    assert_eq!(context.metadata.executions_count, 5);
    assert!(context.metadata.last_executed_at.is_some());
    let names: Vec<&str> = context.captures.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["one", "two"]);

    let recent = engine.list_executions(&ws.handle, Some(2)).unwrap();
    assert_eq!(recent.len(), 2);

    let compact = engine
        .export_context(&ws.handle, ExportOptions { compact: true })
        .unwrap();
    assert!(compact.captures.is_empty());
    assert_eq!(compact.metadata.captures_count, 2);
}

#[tokio::test]
async fn test_export_import_preserves_handle_on_another_root() {
    let source_root = TempDir::new().unwrap();
    let target_root = TempDir::new().unwrap();
    let git = scripted();
    let source = engine(source_root.path(), &git);
    let ws = create(&source, &[API, WEB]).await;

    let json = source
        .export_context(&ws.handle, ExportOptions::default())
        .unwrap()
        .to_json()
        .unwrap();

    let target = engine(target_root.path(), &git);
    let imported = target
        .import_context(ImportOptions {
            context: workshed::workspace::WorkspaceContext::from_json(&json).unwrap(),
            preserve_handle: true,
            force: false,
            invocation_dir: target_root.path().to_path_buf(),
        })
        .await
        .unwrap();

    assert_eq!(imported.handle, ws.handle);
    assert_eq!(imported.purpose, ws.purpose);
    assert!(imported.path.starts_with(target_root.path()));
    let repos = |w: &Workspace| {
        w.repositories
            .iter()
            .map(|r| (r.name.clone(), r.url.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(repos(&imported), repos(&ws));
    assert!(imported.repo_path("web").join(".git").is_dir());
}

#[cfg(unix)]
#[tokio::test]
async fn test_import_conflict_requires_force() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API]).await;
    engine.capture_state(&ws.handle, request("old")).await.unwrap();
    engine
        .exec(
            &ws.handle,
            ExecOptions {
                command: command(&["true"]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let context = engine.derive_context(&ws.handle).unwrap();

    let options = |force| ImportOptions {
        context: context.clone(),
        preserve_handle: true,
        force,
        invocation_dir: temp.path().to_path_buf(),
    };

    let err = engine.import_context(options(false)).await.unwrap_err();
    assert!(matches!(err, WorkshedError::WorkspaceExists(_)));
    assert!(err.is_conflict());
    assert_eq!(engine.list_captures(&ws.handle).unwrap().len(), 1);

    let replaced = engine.import_context(options(true)).await.unwrap();
    assert_eq!(replaced.handle, ws.handle);
    assert!(engine.list_captures(&ws.handle).unwrap().is_empty());
    assert!(engine.list_executions(&ws.handle, None).unwrap().is_empty());
}

#[tokio::test]
async fn test_import_generates_handle_and_checks_version() {
    let temp = TempDir::new().unwrap();
    let git = scripted();
    let engine = engine(temp.path(), &git);
    let ws = create(&engine, &[API]).await;
    let mut context = engine.derive_context(&ws.handle).unwrap();

    let copy = engine
        .import_context(ImportOptions {
            context: context.clone(),
            preserve_handle: false,
            force: false,
            invocation_dir: temp.path().to_path_buf(),
        })
        .await
        .unwrap();
    assert_ne!(copy.handle, ws.handle);
    assert_eq!(engine.list(&ListFilter::default()).unwrap().len(), 2);

    context.version = 99;
    let err = engine
        .import_context(ImportOptions {
            context,
            preserve_handle: false,
            force: false,
            invocation_dir: temp.path().to_path_buf(),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkshedError::UnsupportedVersion { found: 99, .. }
    ));
}
