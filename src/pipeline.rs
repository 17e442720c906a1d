//! End-to-end run: startup, acquisition, bounded execution, sink, teardown.

use crate::utils::format_duration;
use crate::{
    AcquireSettings, AcquisitionScheduler, BoundedExecutor, Config, ItemProcessor, ItemResult,
    ItemStatus, MetricsSnapshot, PipelineMetrics, ResourceFactory, ResultSink, ScrapeError,
    TeardownReport, WorkItem, WorkerPool,
};
use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What one run did.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: Uuid,
    /// Results delivered to the sink
    pub items: usize,
    pub completed: usize,
    /// Results without an outcome, skipped items included
    pub degraded: usize,
    pub skipped: usize,
    pub starvation_warnings: u64,
    pub peak_in_flight: u64,
    /// Free workers once every result was delivered; equals the pool size
    /// when no worker leaked
    pub available_at_completion: usize,
    pub teardown: TeardownReport,
    pub metrics: MetricsSnapshot,
    pub elapsed: Duration,
}

pub struct Pipeline<F, P> {
    config: Config,
    factory: Arc<F>,
    processor: Arc<P>,
}

impl<F, P> Pipeline<F, P>
where
    F: ResourceFactory,
{
    pub fn new(config: Config, factory: F, processor: P) -> Self {
        Self {
            config,
            factory: Arc::new(factory),
            processor: Arc::new(processor),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Processes every item of `input` and hands each result to `sink`.
    ///
    /// Item-level failures become degraded results. A fatal error (startup,
    /// input, starvation under the failing policy) stops acquisition; pairs
    /// already bound still finish and reach the sink, the pool is torn down,
    /// and the first fatal error is returned.
    pub async fn run<I, S, K>(
        &self,
        input: S,
        sink: &mut K,
    ) -> Result<PipelineReport, ScrapeError>
    where
        I: WorkItem,
        P: ItemProcessor<F::Resource, I>,
        P::Outcome: Display,
        S: Stream<Item = Result<I, ScrapeError>> + Send + 'static,
        K: ResultSink<I, P::Outcome>,
    {
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let ceiling = self.config.execution_ceiling();
        let metrics = Arc::new(PipelineMetrics::new());
        info!(
            %run_id,
            pool_size = self.config.pool_size,
            max_concurrent = ceiling,
            "Starting pipeline"
        );

        let pool = WorkerPool::launch(self.factory.as_ref(), self.config.pool_size).await?;

        let scheduler = AcquisitionScheduler::new(
            pool.clone(),
            AcquireSettings::from(&self.config),
            metrics.clone(),
        );
        let (mut pairs, scheduler_handle) = scheduler.spawn(input);

        let executor = BoundedExecutor::new(self.processor.clone(), ceiling, metrics.clone())
            .with_timeout(self.config.page_timeout);

        let mut fatal: Option<ScrapeError> = None;
        let mut tally = Tally::default();

        {
            let results = executor.execute(&pool, stream::poll_fn(move |cx| pairs.poll_recv(cx)));
            futures::pin_mut!(results);

            while let Some(next) = results.next().await {
                match next {
                    Ok(result) => {
                        tally.record(&result);
                        log_result(&result);
                        if let Err(e) = sink.consume(result).await {
                            metrics.record_sink_error();
                            error!(error = %e, "failed to write result");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "pipeline stopping");
                        fatal.get_or_insert(e);
                    }
                }
            }
        }

        let starvation_warnings = match scheduler_handle.await {
            Ok(summary) => summary.starvation_warnings,
            Err(e) => {
                let e = ScrapeError::from(e);
                error!(error = %e, "acquisition task failed");
                fatal.get_or_insert(e);
                metrics.snapshot().starvation_warnings
            }
        };

        let available_at_completion = pool.stats().available;
        if available_at_completion != pool.size() {
            warn!(
                available = available_at_completion,
                total = pool.size(),
                "not every worker was returned to the pool"
            );
        }

        if let Err(e) = sink.finish().await {
            metrics.record_sink_error();
            error!(error = %e, "failed to finish result output");
        }

        let teardown = pool.teardown_all(self.factory.as_ref()).await;
        let elapsed = started.elapsed();
        info!("Completed");

        if let Some(e) = fatal {
            return Err(e);
        }

        let snapshot = metrics.snapshot();
        let report = PipelineReport {
            run_id,
            items: tally.items,
            completed: tally.completed,
            degraded: tally.degraded,
            skipped: tally.skipped,
            starvation_warnings,
            peak_in_flight: snapshot.peak_in_flight,
            available_at_completion,
            teardown,
            metrics: snapshot,
            elapsed,
        };
        info!(
            %run_id,
            items = report.items,
            degraded = report.degraded,
            "Pipeline finished in {}",
            format_duration(elapsed)
        );
        Ok(report)
    }
}

#[derive(Default)]
struct Tally {
    items: usize,
    completed: usize,
    degraded: usize,
    skipped: usize,
}

impl Tally {
    fn record<I, O>(&mut self, result: &ItemResult<I, O>) {
        self.items += 1;
        match result.status {
            ItemStatus::Completed => self.completed += 1,
            ItemStatus::Skipped => self.skipped += 1,
            ItemStatus::Failed(_) => {}
        }
        if result.is_degraded() {
            self.degraded += 1;
        }
    }
}

fn log_result<I: WorkItem, O: Display>(result: &ItemResult<I, O>) {
    match &result.outcome {
        Some(outcome) => info!("Name: {}, Rating: {}", result.item.label(), outcome),
        None => info!("Name: {}, Rating: null", result.item.label()),
    }
    debug!(
        worker_id = result.worker_id,
        sequence = result.sequence,
        duration = ?result.duration,
        "result delivered"
    );
}

/// Keeps every result in memory, in completion order.
pub struct CollectingSink<I, O> {
    results: Vec<ItemResult<I, O>>,
    finished: bool,
}

impl<I, O> CollectingSink<I, O> {
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            finished: false,
        }
    }

    pub fn results(&self) -> &[ItemResult<I, O>] {
        &self.results
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_results(self) -> Vec<ItemResult<I, O>> {
        self.results
    }
}

impl<I, O> Default for CollectingSink<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<I: Send, O: Send> ResultSink<I, O> for CollectingSink<I, O> {
    async fn consume(&mut self, result: ItemResult<I, O>) -> Result<(), ScrapeError> {
        self.results.push(result);
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), ScrapeError> {
        self.finished = true;
        Ok(())
    }
}
