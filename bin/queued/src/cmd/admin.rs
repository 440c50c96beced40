//! Dispatch one admin subcommand against the shard's persistence backend.
use std::sync::Arc;

use anyhow::Result;

use queuecore_cli::AdminCommand;
use queuecore_cli::AdminContext;
use queuecore_conf::Conf;
use queuecore_context::Context;
use queuecore_queue_sqlite::SqliteFactory;
use queuecore_replication::DLQHandler;

use super::Cli;
use crate::backends::peer_admin_client;
use crate::init::telemetry;
use crate::worker::NoopReplicationApplier;

/// Run one admin subcommand, returning the process exit code to use.
pub async fn run(cli: Cli, conf: Conf, command: AdminCommand) -> Result<i32> {
    let telemetry = telemetry(conf.telemetry.clone()).await?;
    let context = Context::root(telemetry.logger.clone())
        .log_values(slog::o!("shard" => cli.shard))
        .build();

    let factory = SqliteFactory;
    let store = Arc::new(
        factory
            .execution_store(&context, &conf.store.options, cli.shard.to_string())
            .await?,
    );
    let dlq = match peer_admin_client(&conf.peer.backend) {
        Some(peer) => Some(Arc::new(DLQHandler::new(
            cli.shard,
            conf.replication.clusters.clone(),
            store.clone(),
            peer,
            Arc::new(NoopReplicationApplier),
        ))),
        None => {
            slog::warn!(
                context.logger,
                "no peer admin RPC backend compiled in; DLQ admin commands are unavailable";
                "backend" => &conf.peer.backend,
            );
            None
        }
    };
    let admin = AdminContext { store, dlq };

    queuecore_cli::execute(command, &context, &admin).await
}
