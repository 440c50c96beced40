//! Built-in `queued` commands.
use clap::Parser;
use clap::Subcommand;

use queuecore_cli::AdminCommand;

pub mod admin;
pub mod server;
pub mod sync;

/// Per-shard task-queue process: transfer/timer/replication processors and admin CLI.
#[derive(Debug, Parser)]
#[command(version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the process configuration to use.
    #[arg(short = 'c', long = "config", default_value_t = String::from("queued.yaml"))]
    pub config: String,

    /// Integer identifier of the shard this process owns.
    #[arg(long = "shard", default_value_t = 0)]
    pub shard: i64,

    /// Select the queued command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Select the queued command to run.
#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Run the shard's transfer/timer/replication processors.
    #[command(alias = "run")]
    Server,

    /// Synchronise (initialise or migrate) the persistence backend schema.
    #[command(alias = "sync-dependencies")]
    Sync,

    /// Inspect and repair this shard's task queues.
    #[command(subcommand)]
    Admin(AdminCommand),
}
