//! Process initialisation builder for aspects to initialise for all commands.
use std::time::Duration;

use anyhow::Result;

use replisdk::runtime::shutdown::ShutdownManager;
use replisdk::runtime::shutdown::ShutdownManagerBuilder;
use replisdk::runtime::telemetry;
use replisdk::runtime::telemetry::Telemetry;
use replisdk::runtime::telemetry::TelemetryConfig;
use replisdk::runtime::telemetry::TelemetryOptions;

use queuecore_conf::Conf;
use queuecore_queue::factory::PersistedQueueFactory;
use queuecore_queue_sqlite::SqliteFactory;

/// Process builder to initialise all `queued` commands.
///
/// Unlike the control-plane process this binary is modelled after, there is no HTTP/RPC
/// surface to serve (§6's non-goals exclude it), so this carries only telemetry and shutdown
/// coordination, not a server.
pub struct GenericInit {
    pub conf: Conf,
    pub shard: i64,
    pub shutdown: ShutdownManagerBuilder<()>,
    pub telemetry: Telemetry,
}

impl GenericInit {
    /// Build from the loaded configuration, for the given shard.
    pub async fn configure(conf: Conf, shard: i64) -> Result<Self> {
        let telemetry = telemetry(conf.telemetry.clone()).await?;
        let shutdown = shutdown_manager(telemetry.logger.clone(), &conf);
        Ok(GenericInit {
            conf,
            shard,
            shutdown,
            telemetry,
        })
    }

    /// Initialisation done, wait until the process fails or the user shuts it down.
    pub async fn wait(self) -> Result<()> {
        slog::info!(self.telemetry.logger, "queued process initialisation complete");
        let exit = self.shutdown.build();
        exit.wait().await
    }
}

/// Initialise process shutdown manager.
pub fn shutdown_manager(logger: slog::Logger, conf: &Conf) -> ShutdownManagerBuilder<()> {
    let grace = Duration::from_secs(conf.runtime.shutdown_grace_sec);
    ShutdownManager::builder()
        .logger(logger)
        .graceful_shutdown_timeout(grace)
}

/// Initialise process telemetry.
pub async fn telemetry(conf: TelemetryConfig) -> Result<Telemetry> {
    let telemetry_options = TelemetryOptions::for_sentry_release(super::RELEASE_ID)
        .for_app(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        .finish();
    let telemetry = telemetry::initialise(conf, telemetry_options).await?;
    register_metrics(&telemetry.metrics)?;
    slog::info!(telemetry.logger, "process telemetry initialised");
    Ok(telemetry)
}

/// Register every crate's Prometheus collectors against the process registry.
fn register_metrics(registry: &prometheus::Registry) -> Result<()> {
    queuecore_queue::register_metrics(registry)?;
    queuecore_replication::register_metrics(registry)?;
    SqliteFactory.register_metrics(registry)?;
    Ok(())
}
