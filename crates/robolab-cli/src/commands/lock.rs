use std::sync::Arc;

use robolab_core::session::LOCKED_BY_OTHER_REASON;
use robolab_core::ValidationReport;
use tokio::sync::mpsc;

use crate::commands::common::{normalize_file_path, open_workbench, wait_for_shutdown, Context};
use crate::error::CliError;

/// Hold an editing session on `path` until Ctrl-C or until the lock is lost.
pub async fn run_lock(context: &Context, path: &str) -> Result<(), CliError> {
    let path = normalize_file_path(path)?;
    let workbench = open_workbench(context).await?;
    workbench.on_ready().await;

    let grant = workbench.sessions().start_session(&path).await;
    if !grant.granted {
        workbench.on_unload().await;
        return Err(CliError::Locked {
            path,
            reason: grant
                .reason
                .unwrap_or_else(|| LOCKED_BY_OTHER_REASON.to_string()),
        });
    }

    let (lost_tx, mut lost_rx) = mpsc::unbounded_channel();
    workbench
        .sessions()
        .subscribe(Arc::new(move |report: &ValidationReport| {
            for lost in &report.invalid {
                lost_tx.send(lost.clone()).ok();
            }
        }));

    println!(
        "Editing {path} (session {}). Press Ctrl-C to release.",
        grant.session_id.unwrap_or_default()
    );

    let outcome = tokio::select! {
        result = wait_for_shutdown() => result,
        Some(lost) = lost_rx.recv() => Err(CliError::LockLost(lost)),
    };

    workbench.on_unload().await;
    outcome?;
    println!("Released {path}");
    Ok(())
}
