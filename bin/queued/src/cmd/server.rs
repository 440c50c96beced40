//! Run the shard's queue processors.
use anyhow::Result;

use queuecore_conf::Conf;

use super::Cli;
use crate::init::Server;

/// Run the shard's transfer/timer/replication processors until shutdown.
pub async fn run(cli: Cli, conf: Conf) -> Result<()> {
    Server::configure(conf, cli.shard).await?.run().await
}
