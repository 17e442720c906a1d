//! Binds input items to workers strictly in arrival order.
//!
//! The scheduler runs as its own task so acquisition can get ahead of
//! execution: while pages are loading, the next items are already holding
//! their workers and waiting in the channel.

use crate::{
    Config, PipelineMetrics, ScrapeError, StarvationPolicy, WorkItem, WorkerLease, WorkerPool,
};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// An item matched with the worker that will process it.
#[derive(Debug)]
pub struct BoundPair<R, I> {
    pub item: I,
    pub lease: WorkerLease<R>,
    /// Position in acquisition order, starting at 1
    pub sequence: u64,
    /// Time spent waiting for a free worker
    pub waited: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct AcquireSettings {
    pub poll_interval: Duration,
    pub starvation_threshold: Duration,
    pub policy: StarvationPolicy,
}

impl From<&Config> for AcquireSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.acquire_poll_interval,
            starvation_threshold: config.starvation_threshold,
            policy: config.starvation_policy,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub items_bound: u64,
    pub starvation_warnings: u64,
    pub stopped_on_error: bool,
}

pub type PairReceiver<R, I> = mpsc::Receiver<Result<BoundPair<R, I>, ScrapeError>>;

pub struct AcquisitionScheduler<R> {
    pool: WorkerPool<R>,
    settings: AcquireSettings,
    metrics: Arc<PipelineMetrics>,
}

impl<R: Send + 'static> AcquisitionScheduler<R> {
    pub fn new(
        pool: WorkerPool<R>,
        settings: AcquireSettings,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            pool,
            settings,
            metrics,
        }
    }

    /// Waits until a worker is free for `item`.
    ///
    /// Never gives up under [`StarvationPolicy::WarnAndContinue`]; every
    /// further `starvation_threshold` of waiting logs another warning.
    pub async fn acquire_for<I: WorkItem>(
        &self,
        item: &I,
    ) -> Result<(WorkerLease<R>, Duration), ScrapeError> {
        let started = Instant::now();
        let mut warnings: u32 = 0;

        loop {
            if let Some(lease) = self.pool.try_acquire() {
                return Ok((lease, started.elapsed()));
            }
            if self.pool.is_closed() {
                return Err(ScrapeError::PoolClosed);
            }

            self.pool.wait_for_release(self.settings.poll_interval).await;

            let waited = started.elapsed();
            if waited >= self.settings.starvation_threshold * (warnings + 1) {
                warnings += 1;
                self.metrics.record_starvation_warning();
                warn!(
                    item = %item.label(),
                    waited = ?waited,
                    "Possible deadlock: no worker available"
                );

                if self.settings.policy == StarvationPolicy::FailAfterThreshold {
                    return Err(ScrapeError::Starvation {
                        item: item.label(),
                        waited,
                    });
                }
            }
        }
    }

    /// Spawns the scheduling task over `input`.
    ///
    /// The channel holds at most `pool_size` pairs, which is also the most
    /// that can ever be bound at once. An input error is forwarded and ends
    /// scheduling.
    pub fn spawn<I, S>(self, input: S) -> (PairReceiver<R, I>, JoinHandle<SchedulerSummary>)
    where
        I: WorkItem,
        S: Stream<Item = Result<I, ScrapeError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.pool.size().max(1));
        let handle = tokio::spawn(async move { self.run(input, tx).await });
        (rx, handle)
    }

    async fn run<I, S>(
        self,
        input: S,
        tx: mpsc::Sender<Result<BoundPair<R, I>, ScrapeError>>,
    ) -> SchedulerSummary
    where
        I: WorkItem,
        S: Stream<Item = Result<I, ScrapeError>> + Send + 'static,
    {
        let mut summary = SchedulerSummary::default();
        let warnings_before = self.metrics.snapshot().starvation_warnings;
        futures::pin_mut!(input);

        while let Some(next) = input.next().await {
            let item = match next {
                Ok(item) => item,
                Err(e) => {
                    warn!(error = %e, "input stream failed; stopping acquisition");
                    summary.stopped_on_error = true;
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            };

            let (lease, waited) = match self.acquire_for(&item).await {
                Ok(acquired) => acquired,
                Err(e) => {
                    summary.stopped_on_error = true;
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            };

            summary.items_bound += 1;
            self.metrics.record_bound();
            debug!(
                item = %item.label(),
                worker_id = lease.id(),
                sequence = summary.items_bound,
                waited = ?waited,
                "worker bound"
            );

            let pair = BoundPair {
                item,
                lease,
                sequence: summary.items_bound,
                waited,
            };

            if let Err(mpsc::error::SendError(rejected)) = tx.send(Ok(pair)).await {
                // Executor is gone; give the worker back and stop.
                if let Ok(pair) = rejected {
                    self.pool.release(pair.lease);
                }
                warn!("result stage closed; stopping acquisition");
                break;
            }
        }

        summary.starvation_warnings = self.metrics.snapshot().starvation_warnings - warnings_before;
        info!(
            items_bound = summary.items_bound,
            starvation_warnings = summary.starvation_warnings,
            "Acquisition finished"
        );
        summary
    }
}
