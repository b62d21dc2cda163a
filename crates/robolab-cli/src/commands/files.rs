use robolab_core::session::LOCKED_BY_OTHER_REASON;

use crate::commands::common::{
    file_to_list_item, format_file_lines, normalize_file_path, open_local, open_workbench,
    short_digest, Context, FileListItem,
};
use crate::error::CliError;

pub async fn run_save(context: &Context, path: &str, contents: &str) -> Result<(), CliError> {
    let path = normalize_file_path(path)?;
    let workbench = open_workbench(context).await?;

    let check = workbench.sessions().check_can_edit(&path).await;
    if !check.can_edit {
        return Err(CliError::Locked {
            path,
            reason: check
                .reason
                .unwrap_or_else(|| LOCKED_BY_OTHER_REASON.to_string()),
        });
    }

    let local = workbench.local();
    let view_state = local
        .get_metadata(&path)
        .await?
        .and_then(|metadata| metadata.view_state);
    let mut changes = local.subscribe();
    let metadata = local.save_file(&path, contents, view_state).await?;

    if let (Some(sync), Ok(batch)) = (workbench.sync(), changes.try_recv()) {
        let report = sync.push(&batch).await;
        if report.failed > 0 {
            eprintln!("Saved locally but upload failed; run `robolab sync` to retry");
        }
    }

    println!("Saved {} ({})", metadata.path, short_digest(&metadata.digest));
    Ok(())
}

pub async fn run_cat(context: &Context, path: &str) -> Result<(), CliError> {
    let path = normalize_file_path(path)?;
    let local = open_local(context).await?;
    let file = local
        .get_contents(&path)
        .await?
        .ok_or(CliError::FileNotFound(path))?;

    print!("{}", file.contents);
    Ok(())
}

pub async fn run_list(context: &Context, as_json: bool) -> Result<(), CliError> {
    let local = open_local(context).await?;
    let files = local.list().await?;

    if as_json {
        let json_items = files
            .iter()
            .map(file_to_list_item)
            .collect::<Vec<FileListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_file_lines(&files) {
            println!("{line}");
        }
    }

    Ok(())
}
