use crate::commands::common::{
    format_pull_summary, format_push_summary, format_sync_timestamp, open_workbench, Context,
};
use crate::error::CliError;

pub async fn run_sync(context: &Context) -> Result<(), CliError> {
    let Some(remote) = &context.remote else {
        return Err(CliError::SyncNotConfigured);
    };
    let workbench = open_workbench(context).await?;
    let Some(sync) = workbench.sync() else {
        return Err(CliError::SyncUnavailable(remote.url.clone()));
    };

    let pushed = sync.push_all().await;
    let pulled = sync.pull().await;

    println!("{}", format_push_summary(&pushed));
    println!("{}", format_pull_summary(&pulled));
    if pulled.failed == 0 {
        println!("Synced as of {}", format_sync_timestamp(sync.last_sync_time()));
    }
    Ok(())
}
