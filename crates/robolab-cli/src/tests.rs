use std::path::PathBuf;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use robolab_core::config::{ENV_REMOTE_TOKEN, ENV_REMOTE_URL};
use robolab_core::db::LocalFileStore;
use robolab_core::models::FileMetadata;
use robolab_core::{
    EditCheck, LibSqlWorkbench, PullReport, PushReport, RemoteConfig, SystemClock,
    WorkbenchConfig,
};
use tempfile::{tempdir, TempDir};

use crate::commands::common::{
    format_edit_check, format_file_lines, format_pull_summary, format_push_summary,
    format_sync_timestamp, load_config, normalize_file_path, resolve_db_path, short_digest,
    Context,
};
use crate::commands::files::{run_cat, run_save};
use crate::commands::sync::run_sync;
use crate::error::CliError;

fn context_in(dir: &TempDir, shared: bool) -> Context {
    let remote = shared.then(|| RemoteConfig {
        url: format!("file:{}", dir.path().join("shared.db").display()),
        auth_token: None,
    });
    Context {
        db_path: dir.path().join("local").join("workspace.db"),
        config: WorkbenchConfig::default(),
        remote,
    }
}

#[test]
fn normalize_file_path_trims_and_rejects_empty() {
    assert_eq!(normalize_file_path("  /a.py ").unwrap(), "/a.py");
    assert!(matches!(normalize_file_path(" \t "), Err(CliError::EmptyPath)));
}

#[test]
fn resolve_db_path_prefers_explicit_path() {
    let explicit = PathBuf::from("/tmp/robolab-test.db");
    assert_eq!(resolve_db_path(Some(explicit.clone())), explicit);
}

#[test]
fn load_config_defaults_without_file() {
    assert_eq!(load_config(None).unwrap(), WorkbenchConfig::default());
}

#[test]
fn load_config_reads_json_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("robolab.json");
    std::fs::write(&path, r#"{ "poll_interval_ms": 1000 }"#).unwrap();

    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.poll_interval_ms, 1000);
    assert_eq!(config.lock_ttl_ms, WorkbenchConfig::default().lock_ttl_ms);
}

#[test]
fn short_digest_truncates_long_values() {
    assert_eq!(short_digest("0123456789abcdef"), "0123456789ab");
    assert_eq!(short_digest("abc"), "abc");
}

#[test]
fn format_file_lines_shows_digest_and_path() {
    let files = vec![FileMetadata {
        path: "/a.py".to_string(),
        digest: "0123456789abcdef".to_string(),
        view_state: None,
    }];
    assert_eq!(format_file_lines(&files), vec!["0123456789ab  /a.py"]);
    assert_eq!(format_file_lines(&[]), vec!["No files yet."]);
}

#[test]
fn format_edit_check_includes_reason() {
    let editable = EditCheck {
        can_edit: true,
        reason: None,
    };
    let locked = EditCheck {
        can_edit: false,
        reason: Some("File is locked by another user".to_string()),
    };
    assert_eq!(format_edit_check("/a.py", &editable), "/a.py: editable");
    assert_eq!(
        format_edit_check("/a.py", &locked),
        "/a.py: read-only (File is locked by another user)"
    );
}

#[test]
fn summaries_mention_failures_only_when_present() {
    let pushed = PushReport {
        uploaded: 2,
        ..PushReport::default()
    };
    let pulled = PullReport {
        fetched: 3,
        created: 1,
        overwritten: 1,
        unchanged: 1,
        failed: 1,
    };
    assert_eq!(format_push_summary(&pushed), "Pushed 2 files");
    assert_eq!(
        format_pull_summary(&pulled),
        "Pulled 3 files: 1 new, 1 updated, 1 unchanged (1 failed)"
    );
}

#[test]
fn format_sync_timestamp_uses_rfc3339() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01T00:00:00+00:00");
}

#[tokio::test(flavor = "multi_thread")]
async fn save_then_cat_round_trips_through_local_store() {
    let dir = tempdir().unwrap();
    let context = context_in(&dir, false);

    run_save(&context, "/a.py", "print('hi')\n").await.unwrap();
    run_cat(&context, "/a.py").await.unwrap();

    let local = LocalFileStore::open(&context.db_path).await.unwrap();
    let contents = local.get_contents("/a.py").await.unwrap().unwrap();
    assert_eq!(contents.contents, "print('hi')\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_remote_credentials_leave_local_commands_working() {
    let dir = tempdir().unwrap();
    std::env::set_var(ENV_REMOTE_URL, "libsql://class.turso.io");
    std::env::remove_var(ENV_REMOTE_TOKEN);
    let context = Context::from_cli(Some(dir.path().join("workspace.db")), None);
    std::env::remove_var(ENV_REMOTE_URL);

    let context = context.unwrap();
    assert!(context.remote.is_none());
    run_save(&context, "/a.py", "print('hi')\n").await.unwrap();
    run_cat(&context, "/a.py").await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cat_reports_missing_file() {
    let dir = tempdir().unwrap();
    let context = context_in(&dir, false);

    let result = run_cat(&context, "/missing.py").await;
    assert!(matches!(result, Err(CliError::FileNotFound(path)) if path == "/missing.py"));
}

#[tokio::test(flavor = "multi_thread")]
async fn save_is_refused_while_another_process_edits() {
    let dir = tempdir().unwrap();
    let context = context_in(&dir, true);

    let other = LibSqlWorkbench::connect(
        WorkbenchConfig::default(),
        Arc::new(SystemClock),
        LocalFileStore::open_in_memory().await.unwrap(),
        context.remote.as_ref(),
    )
    .await
    .unwrap();
    assert!(other.sessions().start_session("/a.py").await.granted);

    let result = run_save(&context, "/a.py", "mine").await;
    assert!(matches!(result, Err(CliError::Locked { .. })));

    other.on_unload().await;
    run_save(&context, "/a.py", "mine").await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_requires_shared_store() {
    let dir = tempdir().unwrap();
    let context = context_in(&dir, false);

    let result = run_sync(&context).await;
    assert!(matches!(result, Err(CliError::SyncNotConfigured)));
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_copies_files_between_working_copies() {
    let dir = tempdir().unwrap();
    let first = context_in(&dir, true);
    let second = Context {
        db_path: dir.path().join("other").join("workspace.db"),
        ..context_in(&dir, true)
    };

    run_save(&first, "/robot.py", "drive()").await.unwrap();
    run_sync(&second).await.unwrap();

    let local = LocalFileStore::open(&second.db_path).await.unwrap();
    let contents = local.get_contents("/robot.py").await.unwrap().unwrap();
    assert_eq!(contents.contents, "drive()");
}
