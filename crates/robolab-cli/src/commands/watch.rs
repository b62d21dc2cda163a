use std::sync::Arc;

use robolab_core::ValidationReport;

use crate::commands::common::{open_workbench, wait_for_shutdown, Context};
use crate::error::CliError;

/// Run the full lifecycle (heartbeat, validation, sync) until Ctrl-C.
pub async fn run_watch(context: &Context) -> Result<(), CliError> {
    let workbench = open_workbench(context).await?;
    workbench
        .sessions()
        .subscribe(Arc::new(|report: &ValidationReport| {
            for path in &report.invalid {
                tracing::warn!("{} is now read-only", path);
            }
        }));
    workbench.on_ready().await;
    println!("Watching {} (Ctrl-C to stop)", context.db_path.display());

    let result = wait_for_shutdown().await;
    workbench.on_unload().await;
    result
}
