//! `queued` dependency synchronisation (initialise or migrate schema).
use anyhow::Result;

use queuecore_conf::Conf;
use queuecore_queue::factory::PersistedQueueFactory;
use queuecore_queue::factory::PersistedQueueFactorySyncArgs;
use queuecore_queue_sqlite::SqliteFactory;

use super::generic::GenericInit;

/// Process builder to initialise and run a `queued` dependency sync process.
pub struct Sync {
    generic: GenericInit,
}

impl Sync {
    /// Build a sync process from the loaded configuration.
    pub async fn configure(conf: Conf) -> Result<Self> {
        // Schema setup has no shard scope; pass a placeholder identity through GenericInit.
        let generic = GenericInit::configure(conf, 0).await?;
        Ok(Sync { generic })
    }

    /// Finalise process initialisation and run schema synchronisation.
    pub async fn run(self) -> Result<()> {
        let logger = self.generic.telemetry.logger.clone();
        let conf = self.generic.conf.clone();
        let mut generic = self.generic;
        generic.shutdown = generic.shutdown.watch_tokio(tokio::spawn(async move {
            synchronise_dependencies(logger, conf).await
        }));
        generic.wait().await
    }
}

/// Entrypoint to dependency synchronisation.
async fn synchronise_dependencies(logger: slog::Logger, conf: Conf) -> Result<()> {
    slog::info!(logger, "synchronising persistence backend schema");
    let context = queuecore_context::Context::root(logger).build();
    let factory = SqliteFactory;
    factory
        .sync(PersistedQueueFactorySyncArgs {
            context: &context,
            conf: &conf.store.options,
            names: &[],
        })
        .await?;
    Ok(())
}
