//! Background poll loop.
//!
//! Runs the poll engine over every feed at a fixed interval until a shutdown
//! signal arrives. Feeds that are not due are skipped by the engine itself.

use std::future::Future;
use std::sync::Arc;

use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use super::engine::{CheckOptions, FeedSelection, PollEngine, PollReport};
use super::fetcher::FeedFetcher;
use crate::Result;

/// Periodic feed updater.
pub struct FeedUpdater<F> {
    engine: Arc<PollEngine<F>>,
    check_interval: Duration,
    options: CheckOptions,
}

impl<F: FeedFetcher> FeedUpdater<F> {
    /// Create an updater using the engine's configured interval.
    pub fn new(engine: Arc<PollEngine<F>>) -> Self {
        let secs = engine.config().update_interval_secs;
        Self {
            engine,
            check_interval: Duration::from_secs(secs),
            options: CheckOptions::default(),
        }
    }

    pub fn with_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    pub fn with_options(mut self, options: CheckOptions) -> Self {
        self.options = options;
        self
    }

    /// One pass over all feeds.
    pub async fn tick(&self) -> Result<PollReport> {
        debug!("Checking for feeds due for update");
        self.engine
            .run(&FeedSelection::All, &self.options, false)
            .await
    }

    /// Run until `shutdown` completes.
    ///
    /// A failed pass is logged and the loop carries on with the next tick.
    /// A pass in progress when shutdown fires is dropped; its open
    /// transaction rolls back. Returns the number of passes completed.
    pub async fn run_until<S>(&self, shutdown: S) -> u64
    where
        S: Future<Output = ()>,
    {
        info!(
            "Feed updater started (check interval: {} seconds)",
            self.check_interval.as_secs()
        );

        let mut timer = interval(self.check_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut passes = 0;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = timer.tick() => {}
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                result = self.tick() => {
                    passes += 1;
                    match result {
                        Ok(report) if report.checked > 0 => {
                            info!(
                                "Updated {} feed(s): {} new, {} updated entries",
                                report.checked, report.created, report.updated
                            );
                        }
                        Ok(_) => debug!("No feeds due for update"),
                        Err(e) => error!("Feed update pass failed: {}", e),
                    }
                }
            }
        }

        info!("Feed updater stopped after {} pass(es)", passes);
        passes
    }
}
