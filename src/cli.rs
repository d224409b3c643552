// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "drydock")]
#[command(about = "Image updates for running containers with health-gated rollback")]
#[command(version)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file to use instead of discovering drydock.yml
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replace a container with one running a new image
    Update {
        /// Name of the container to update
        container: String,

        /// Image to move the container onto
        image: String,

        /// Recorded as what requested the update
        #[arg(long, default_value = "manual")]
        trigger: String,

        /// Simulate the update against a copy of the container and print the runtime calls
        #[arg(long)]
        dry_run: bool,
    },

    /// Finish operations left in progress by an interrupted run
    Recover,

    /// Show recorded updates for a container, newest first
    History {
        container: String,

        /// Print the records as JSON
        #[arg(long)]
        json: bool,
    },

    /// List image backups kept for a container
    Backups { container: String },

    /// Drop old backups for a container
    Prune {
        container: String,

        /// Backups to keep (defaults to backup.retention)
        #[arg(long)]
        keep: Option<usize>,
    },
}
