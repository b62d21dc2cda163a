use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use robolab_core::db::LocalFileStore;
use robolab_core::models::FileMetadata;
use robolab_core::{
    EditCheck, LibSqlWorkbench, PullReport, PushReport, RemoteConfig, SystemClock,
    WorkbenchConfig,
};
use serde::Serialize;

use crate::error::CliError;

const ENV_DB_PATH: &str = "ROBOLAB_DB_PATH";
const SHORT_DIGEST_LEN: usize = 12;

/// Resolved global options shared by every command
pub struct Context {
    pub db_path: PathBuf,
    pub config: WorkbenchConfig,
    pub remote: Option<RemoteConfig>,
}

impl Context {
    pub fn from_cli(db_path: Option<PathBuf>, config_path: Option<&Path>) -> Result<Self, CliError> {
        Ok(Self {
            db_path: resolve_db_path(db_path),
            config: load_config(config_path)?,
            remote: RemoteConfig::from_env(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct FileListItem {
    pub path: String,
    pub digest: String,
}

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub path: String,
    pub can_edit: bool,
    pub reason: Option<String>,
    pub holder_id: Option<String>,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(ENV_DB_PATH).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("robolab")
        .join("workspace.db")
}

pub fn load_config(path: Option<&Path>) -> Result<WorkbenchConfig, CliError> {
    match path {
        Some(path) => Ok(WorkbenchConfig::load(path)?),
        None => Ok(WorkbenchConfig::default()),
    }
}

pub fn normalize_file_path(path: &str) -> Result<String, CliError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyPath);
    }
    Ok(trimmed.to_string())
}

/// Read file contents from `from`, or from stdin when omitted.
pub fn read_input(from: Option<&Path>) -> Result<String, CliError> {
    if let Some(path) = from {
        return Ok(std::fs::read_to_string(path)?);
    }

    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        eprintln!("Reading file contents from stdin (Ctrl-D to finish)");
    }
    let mut contents = String::new();
    stdin.read_to_string(&mut contents)?;
    Ok(contents)
}

pub async fn open_local(context: &Context) -> Result<LocalFileStore, CliError> {
    Ok(LocalFileStore::open(&context.db_path).await?)
}

pub async fn open_workbench(context: &Context) -> Result<LibSqlWorkbench, CliError> {
    let local = open_local(context).await?;
    Ok(LibSqlWorkbench::connect(
        context.config.clone(),
        Arc::new(SystemClock),
        local,
        context.remote.as_ref(),
    )
    .await?)
}

pub async fn wait_for_shutdown() -> Result<(), CliError> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

pub fn short_digest(digest: &str) -> &str {
    digest.get(..SHORT_DIGEST_LEN).unwrap_or(digest)
}

pub fn file_to_list_item(file: &FileMetadata) -> FileListItem {
    FileListItem {
        path: file.path.clone(),
        digest: file.digest.clone(),
    }
}

pub fn format_file_lines(files: &[FileMetadata]) -> Vec<String> {
    if files.is_empty() {
        return vec!["No files yet.".to_string()];
    }
    files
        .iter()
        .map(|file| format!("{}  {}", short_digest(&file.digest), file.path))
        .collect()
}

pub fn format_edit_check(path: &str, check: &EditCheck) -> String {
    if check.can_edit {
        return format!("{path}: editable");
    }
    match check.reason.as_deref() {
        Some(reason) => format!("{path}: read-only ({reason})"),
        None => format!("{path}: read-only"),
    }
}

pub fn format_push_summary(report: &PushReport) -> String {
    let mut summary = format!("Pushed {} files", report.uploaded);
    if report.failed > 0 {
        summary.push_str(&format!(" ({} failed)", report.failed));
    }
    summary
}

pub fn format_pull_summary(report: &PullReport) -> String {
    let mut summary = format!(
        "Pulled {} files: {} new, {} updated, {} unchanged",
        report.fetched, report.created, report.overwritten, report.unchanged
    );
    if report.failed > 0 {
        summary.push_str(&format!(" ({} failed)", report.failed));
    }
    summary
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map_or_else(|| timestamp_ms.to_string(), |time| time.to_rfc3339())
}
