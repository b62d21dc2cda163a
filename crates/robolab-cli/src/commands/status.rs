use robolab_core::session::edit_lock_name;

use crate::commands::common::{
    format_edit_check, normalize_file_path, open_workbench, Context, StatusItem,
};
use crate::error::CliError;

pub async fn run_status(context: &Context, path: &str, as_json: bool) -> Result<(), CliError> {
    let path = normalize_file_path(path)?;
    let workbench = open_workbench(context).await?;

    let check = workbench.sessions().check_can_edit(&path).await;
    let holder_id = if check.can_edit {
        None
    } else {
        workbench
            .coordinator()
            .is_held_by_other(&edit_lock_name(&path))
            .await
            .holder_id
    };

    if as_json {
        let item = StatusItem {
            path,
            can_edit: check.can_edit,
            reason: check.reason,
            holder_id,
        };
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else {
        println!("{}", format_edit_check(&path, &check));
        if let Some(holder_id) = holder_id {
            println!("Held by {holder_id}");
        }
    }
    Ok(())
}
