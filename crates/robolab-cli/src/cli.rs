use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "robolab")]
#[command(about = "Edit and sync classroom robot code from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional JSON file with lock and sync settings
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a file into the local working copy
    Save {
        /// Workspace path of the file
        path: String,
        /// Read contents from this file (stdin when omitted)
        #[arg(long, value_name = "FILE")]
        from: Option<PathBuf>,
    },
    /// Print a file from the local working copy
    Cat {
        /// Workspace path of the file
        path: String,
    },
    /// List files in the local working copy
    #[command(alias = "ls")]
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Hold the editing lock on a file until Ctrl-C
    Lock {
        /// Workspace path of the file
        path: String,
    },
    /// Show whether a file can be edited
    Status {
        /// Workspace path of the file
        path: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push every local file, then pull remote changes
    Sync,
    /// Keep syncing and heartbeating until Ctrl-C
    Watch,
}
