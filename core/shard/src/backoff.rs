//! Track persistence errors and successes to incrementally delay poll retries.
use std::time::Duration;

use anyhow::Error;
use anyhow::Result;

use queuecore_conf::ProcessorBackoff;
use queuecore_context::Context;
use queuecore_queue::error::RetriesExceeded;

/// Track failures and successes to incrementally delay retries against persistence.
///
/// Call [`Backoff::retry`] when a poll iteration fails and [`Backoff::success`] when one
/// completes, to clear the memory of previous failures.
pub struct Backoff {
    delay: Duration,
    max_delay: Duration,
    max_retries: u16,
    multiplier: u32,
    seen: u16,
    start_delay: Duration,
}

impl Backoff {
    pub fn new(conf: &ProcessorBackoff) -> Backoff {
        let start_delay = Duration::from_millis(conf.start_delay);
        Backoff {
            delay: start_delay,
            max_delay: Duration::from_secs(conf.max_delay),
            max_retries: conf.max_retries,
            multiplier: conf.multiplier,
            seen: 0,
            start_delay,
        }
    }

    /// The loop encountered an error and needs to delay the next cycle appropriately.
    ///
    /// When the loop fails too many times the original error is returned so the caller can
    /// propagate a permanent-storage shutdown instead of retrying forever.
    pub async fn retry(&mut self, context: &Context, error: Error) -> Result<()> {
        self.seen += 1;
        if self.seen > self.max_retries {
            let context = RetriesExceeded::new(self.max_retries);
            let error = error.context(context);
            return Err(error);
        }

        slog::warn!(
            context.logger, "Poll against persistence failed, will retry";
            replisdk::utils::error::slog::ErrorAttributes::from(&error),
        );
        tokio::time::sleep(self.delay).await;
        self.delay = std::cmp::min(self.delay * self.multiplier, self.max_delay);
        Ok(())
    }

    pub fn success(&mut self) {
        self.delay = self.start_delay;
        self.seen = 0;
    }
}
