//! Combine individual logical units to initialise and run a `queued` process.
use anyhow::Result;
use clap::Parser;

use queuecore_conf::Conf;

mod backends;
mod cmd;
mod init;
mod worker;

pub use self::cmd::Cli;
pub use self::cmd::Command;

/// Initialise the process and invoke a command implementation.
pub async fn execute(cli: Cli, conf: Conf) -> Result<i32> {
    match cli.command.clone() {
        cmd::Command::Server => {
            cmd::server::run(cli, conf).await?;
            Ok(queuecore_cli::EX_OK)
        }
        cmd::Command::Sync => {
            cmd::sync::run(cli, conf).await?;
            Ok(queuecore_cli::EX_OK)
        }
        cmd::Command::Admin(command) => cmd::admin::run(cli, conf, command).await,
    }
}

/// Initialise the async runtime for the process and invoke [`execute`].
pub fn run() -> Result<i32> {
    let cli = Cli::parse();
    let conf = queuecore_conf::load(&cli.config)?;
    conf.runtime
        .tokio
        .clone()
        .into_runtime()
        .expect("failed tokio runtime initialisation")
        .block_on(execute(cli, conf))
}
