//! `queued` server process initialisation as a builder.
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;

use queuecore_conf::Conf;
use queuecore_context::Context;
use queuecore_queue::model::DomainFilter;
use queuecore_queue::processing_queue::ProcessingQueue;
use queuecore_queue::rate_limiter::RateLimiter;
use queuecore_queue::shard::ShardContext;
use queuecore_queue::shard::SystemTimeSource;
use queuecore_queue_sqlite::SqliteFactory;
use queuecore_replication::ReplicationProcessor;
use queuecore_replication::ReplicationTaskFetcher;
use queuecore_shard::TimerQueueProcessor;
use queuecore_shard::TransferQueueProcessor;

use super::generic::GenericInit;
use crate::backends::peer_admin_client;
use crate::worker::LoggingTaskWorker;
use crate::worker::NoopReplicationApplier;

/// Process builder to initialise and run a shard's queue processors.
pub struct Server {
    generic: GenericInit,
}

impl Server {
    /// Build a server from the loaded configuration, for the given shard.
    pub async fn configure(conf: Conf, shard: i64) -> Result<Self> {
        let generic = GenericInit::configure(conf, shard).await?;
        Ok(Server { generic })
    }

    /// Finalise process initialisation and run the shard's processors until shutdown.
    pub async fn run(self) -> Result<()> {
        let GenericInit {
            conf,
            shard,
            mut shutdown,
            telemetry,
        } = self.generic;
        let context = Context::root(telemetry.logger.clone())
            .log_values(slog::o!("shard" => shard))
            .build();

        let factory = SqliteFactory;
        let store = Arc::new(
            factory
                .execution_store(&context, &conf.store.options, shard.to_string())
                .await?,
        );
        let shard_ctx: Arc<dyn ShardContext> = Arc::new(
            factory
                .shard_context(&context, &conf.store.options, shard.to_string(), Arc::new(SystemTimeSource))
                .await?,
        );
        let worker = Arc::new(LoggingTaskWorker);
        // Shared across transfer and timer: both gate reads against the same persistence store.
        let limiter = Arc::new(RateLimiter::new(conf.shard.rate_limit_per_sec, conf.shard.rate_limit_burst));

        // Resume each queue from its last persisted ack level; a shard with no prior state
        // gets back `-1`, which is exactly the starting point `ProcessingQueue::full_range` uses.
        let transfer_ack_level = shard_ctx.get_transfer_ack_level(&context).await?;
        let timer_ack_level = shard_ctx.get_timer_ack_level(&context).await?;

        let (exit_tx, exit_rx) = watch::channel(false);
        shutdown = shutdown.watch_tokio(tokio::spawn(wait_for_signal(exit_tx)));

        let transfer = TransferQueueProcessor::new(
            shard_ctx.clone(),
            store.clone(),
            worker.clone(),
            conf.shard.clone(),
            limiter.clone(),
            ProcessingQueue::new(DomainFilter::all(), 0, transfer_ack_level, transfer_ack_level, i64::MAX),
        );
        shutdown = shutdown.watch_tokio(tokio::spawn(
            transfer.run(context.clone(), exit_future(exit_rx.clone())),
        ));

        let timer = TimerQueueProcessor::new(
            shard_ctx.clone(),
            store.clone(),
            worker,
            conf.shard.clone(),
            limiter,
            ProcessingQueue::new(DomainFilter::all(), 0, timer_ack_level, timer_ack_level, i64::MAX),
        );
        shutdown = shutdown.watch_tokio(tokio::spawn(
            timer.run(context.clone(), exit_future(exit_rx.clone())),
        ));

        if let Some(peer) = peer_admin_client(&conf.peer.backend) {
            for cluster in &conf.replication.clusters {
                let fetcher = ReplicationTaskFetcher::new(cluster.clone(), peer.clone());
                let peers: Vec<String> = conf
                    .replication
                    .clusters
                    .iter()
                    .filter(|c| *c != cluster)
                    .cloned()
                    .collect();
                let processor = ReplicationProcessor::new(
                    cluster.clone(),
                    shard,
                    fetcher,
                    shard_ctx.clone(),
                    store.clone(),
                    Arc::new(NoopReplicationApplier),
                    conf.replication.clone(),
                    peers,
                );
                shutdown = shutdown.watch_tokio(tokio::spawn(
                    processor.run(context.clone(), exit_future(exit_rx.clone())),
                ));
            }
        } else if !conf.replication.clusters.is_empty() {
            slog::warn!(
                context.logger,
                "replication configured but no peer admin RPC backend is compiled in; \
                 running without cross-cluster replication";
                "backend" => &conf.peer.backend,
            );
        }

        let generic = GenericInit {
            conf,
            shard,
            shutdown,
            telemetry,
        };
        generic.wait().await
    }
}

/// Wait for the process to receive an interrupt and notify every processor's exit future.
async fn wait_for_signal(exit_tx: watch::Sender<bool>) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    let _ = exit_tx.send(true);
    Ok(())
}

/// Turn a shared shutdown flag into the bare future processors expect as `exit`.
async fn exit_future(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|done| *done).await;
}
