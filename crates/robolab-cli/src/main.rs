//! Robolab CLI - Command-line host for classroom robot code
//!
//! Edits files in the local working copy, takes editing locks on the
//! shared store, and syncs with other devices.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::{read_input, Context};
use crate::commands::files::{run_cat, run_list, run_save};
use crate::commands::lock::run_lock;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let context = Context::from_cli(cli.db_path, cli.config.as_deref())?;

    match cli.command {
        Commands::Save { path, from } => {
            let contents = read_input(from.as_deref())?;
            run_save(&context, &path, &contents).await?;
        }
        Commands::Cat { path } => run_cat(&context, &path).await?,
        Commands::List { json } => run_list(&context, json).await?,
        Commands::Lock { path } => run_lock(&context, &path).await?,
        Commands::Status { path, json } => run_status(&context, &path, json).await?,
        Commands::Sync => run_sync(&context).await?,
        Commands::Watch => run_watch(&context).await?,
    }

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "robolab=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
