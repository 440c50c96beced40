//! Initialise or migrate the persistence backend schema.
use anyhow::Result;

use queuecore_conf::Conf;

use super::Cli;
use crate::init::Sync;

/// Synchronise (initialise or migrate) stateful dependences so the server can run.
pub async fn run(_cli: Cli, conf: Conf) -> Result<()> {
    Sync::configure(conf).await?.run().await
}
