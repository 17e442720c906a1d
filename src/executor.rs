//! Runs the per-item processing step under a concurrency ceiling.
//!
//! Bound pairs are started in the order the scheduler emits them, at most
//! `max_concurrent` at a time, and results come out in completion order.
//! Whatever happens to the processing call, the worker goes back to the
//! pool before the result is emitted.

use crate::{
    BoundPair, ErrorSeverity, ItemProcessor, PipelineMetrics, ScrapeError, WorkItem, WorkerPool,
};
use futures::{FutureExt, Stream, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub enum ItemStatus {
    /// The processor returned an outcome
    Completed,
    /// The item had no usable target; the processor was not called
    Skipped,
    /// The processor failed, panicked or timed out
    Failed(ScrapeError),
}

/// The item together with what processing produced for it.
///
/// `outcome` is `None` for skipped and failed items.
#[derive(Debug, Clone)]
pub struct ItemResult<I, O> {
    pub item: I,
    pub target: Option<String>,
    pub outcome: Option<O>,
    pub status: ItemStatus,
    pub worker_id: usize,
    pub sequence: u64,
    /// Time from processing start to release
    pub duration: Duration,
}

impl<I, O> ItemResult<I, O> {
    pub fn is_degraded(&self) -> bool {
        self.outcome.is_none()
    }

    pub fn error(&self) -> Option<&ScrapeError> {
        match &self.status {
            ItemStatus::Failed(e) => Some(e),
            _ => None,
        }
    }
}

pub struct BoundedExecutor<P> {
    processor: Arc<P>,
    max_concurrent: usize,
    process_timeout: Option<Duration>,
    metrics: Arc<PipelineMetrics>,
}

impl<P> BoundedExecutor<P> {
    pub fn new(processor: Arc<P>, max_concurrent: usize, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            processor,
            max_concurrent: max_concurrent.max(1),
            process_timeout: None,
            metrics,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.process_timeout = timeout;
        self
    }

    /// Processes one pair and releases its worker on every path.
    pub async fn run_pair<R, I>(
        &self,
        pool: &WorkerPool<R>,
        pair: BoundPair<R, I>,
    ) -> ItemResult<I, P::Outcome>
    where
        R: Send + 'static,
        I: WorkItem,
        P: ItemProcessor<R, I>,
    {
        let BoundPair {
            item,
            mut lease,
            sequence,
            waited,
        } = pair;
        let worker_id = lease.id();
        let started = Instant::now();
        let target = item.target();
        debug!(item = %item.label(), worker_id, sequence, waited = ?waited, "processing started");

        let (outcome, status) = match target.as_deref() {
            None => {
                debug!(item = %item.label(), worker_id, "no usable target; skipping");
                self.metrics.record_skipped();
                (None, ItemStatus::Skipped)
            }
            Some(target) => {
                self.metrics.enter_processing();
                let result = self.invoke(lease.resource_mut(), &item, target).await;
                self.metrics.leave_processing();

                match result {
                    Ok(outcome) => {
                        self.metrics.record_completed(started.elapsed());
                        (Some(outcome), ItemStatus::Completed)
                    }
                    Err(e) => {
                        log_failure(&item, worker_id, &e);
                        self.metrics.record_failed();
                        (None, ItemStatus::Failed(e))
                    }
                }
            }
        };

        pool.release(lease);

        ItemResult {
            item,
            target,
            outcome,
            status,
            worker_id,
            sequence,
            duration: started.elapsed(),
        }
    }

    async fn invoke<R, I>(
        &self,
        resource: &mut R,
        item: &I,
        target: &str,
    ) -> Result<P::Outcome, ScrapeError>
    where
        R: Send + 'static,
        I: WorkItem,
        P: ItemProcessor<R, I>,
    {
        let call = AssertUnwindSafe(self.processor.process(resource, item, target)).catch_unwind();

        let settled = match self.process_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(settled) => settled,
                Err(_) => return Err(ScrapeError::Timeout(limit)),
            },
            None => call.await,
        };

        settled.unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            error!(item = %item.label(), panic = %message, "processor panicked");
            Err(ScrapeError::WorkerPanicked(message))
        })
    }

    /// Turns scheduler output into a stream of results.
    ///
    /// Upstream errors pass straight through; pairs already started keep
    /// running and their results follow.
    pub fn execute<'a, R, I, S>(
        &'a self,
        pool: &'a WorkerPool<R>,
        pairs: S,
    ) -> impl Stream<Item = Result<ItemResult<I, P::Outcome>, ScrapeError>> + 'a
    where
        R: Send + 'static,
        I: WorkItem,
        P: ItemProcessor<R, I>,
        S: Stream<Item = Result<BoundPair<R, I>, ScrapeError>> + 'a,
    {
        pairs
            .map(move |next| async move {
                match next {
                    Ok(pair) => Ok(self.run_pair(pool, pair).await),
                    Err(e) => Err(e),
                }
            })
            .buffer_unordered(self.max_concurrent)
    }
}

fn log_failure<I: WorkItem>(item: &I, worker_id: usize, e: &ScrapeError) {
    let item = item.label();
    match e.severity() {
        ErrorSeverity::Low => {
            info!(%item, worker_id, error = %e, "no outcome; emitting degraded result")
        }
        ErrorSeverity::Medium => {
            warn!(%item, worker_id, error = %e, "processing failed; emitting degraded result")
        }
        ErrorSeverity::High | ErrorSeverity::Critical => {
            error!(%item, worker_id, error = %e, "processing failed; emitting degraded result")
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{FakeResource, TestItem, TestProcessor};
    use crate::{AcquireSettings, AcquisitionScheduler, StarvationPolicy};
    use futures::stream;

    fn pool_of(size: usize) -> WorkerPool<FakeResource> {
        WorkerPool::new((0..size).map(FakeResource::new).collect())
    }

    fn pair(pool: &WorkerPool<FakeResource>, item: TestItem) -> BoundPair<FakeResource, TestItem> {
        let lease = pool.try_acquire().unwrap();
        BoundPair {
            sequence: item.position as u64,
            item,
            lease,
            waited: Duration::ZERO,
        }
    }

    fn executor(
        processor: Arc<TestProcessor>,
        max_concurrent: usize,
    ) -> BoundedExecutor<TestProcessor> {
        BoundedExecutor::new(processor, max_concurrent, Arc::new(PipelineMetrics::new()))
    }

    #[tokio::test]
    async fn test_success_releases_worker() {
        let pool = pool_of(1);
        let processor = Arc::new(TestProcessor::new());
        let executor = executor(processor.clone(), 1);

        let result = executor.run_pair(&pool, pair(&pool, TestItem::new(4))).await;

        assert_eq!(result.outcome, Some(4));
        assert!(matches!(result.status, ItemStatus::Completed));
        assert_eq!(result.target.as_deref(), Some("https://example.com/places/4"));
        assert_eq!(pool.stats().available, 1);
        assert_eq!(processor.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_target_skips_processor() {
        let pool = pool_of(1);
        let processor = Arc::new(TestProcessor::new());
        let executor = executor(processor.clone(), 1);

        let result = executor
            .run_pair(&pool, pair(&pool, TestItem::without_target(2)))
            .await;

        assert!(result.outcome.is_none());
        assert!(result.target.is_none());
        assert!(matches!(result.status, ItemStatus::Skipped));
        assert_eq!(processor.calls(), 0);
        assert_eq!(pool.stats().available, 1);
    }

    #[tokio::test]
    async fn test_failure_becomes_degraded_result() {
        let pool = pool_of(1);
        let processor = Arc::new(TestProcessor::new().failing_on([3]));
        let executor = executor(processor, 1);

        let result = executor.run_pair(&pool, pair(&pool, TestItem::new(3))).await;

        assert!(result.is_degraded());
        assert!(matches!(result.error(), Some(ScrapeError::PageError(_))));
        assert_eq!(pool.stats().available, 1);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let pool = pool_of(1);
        let processor = Arc::new(TestProcessor::new().panicking_on([1]));
        let executor = executor(processor, 1);

        let result = executor.run_pair(&pool, pair(&pool, TestItem::new(1))).await;

        assert!(matches!(result.error(), Some(ScrapeError::WorkerPanicked(_))));
        assert_eq!(pool.stats().available, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_worker() {
        let pool = pool_of(1);
        let processor = Arc::new(TestProcessor::new().with_delay(Duration::from_secs(60)));
        let executor = executor(processor, 1).with_timeout(Some(Duration::from_secs(5)));

        let result = executor.run_pair(&pool, pair(&pool, TestItem::new(1))).await;

        assert!(matches!(result.error(), Some(ScrapeError::Timeout(_))));
        assert_eq!(pool.stats().available, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_bounds_in_flight_calls() {
        let pool = pool_of(4);
        let processor = Arc::new(TestProcessor::new().with_delay(Duration::from_millis(100)));
        let executor = executor(processor.clone(), 2);
        let scheduler = AcquisitionScheduler::new(
            pool.clone(),
            AcquireSettings {
                poll_interval: Duration::from_millis(10),
                starvation_threshold: Duration::from_secs(30),
                policy: StarvationPolicy::WarnAndContinue,
            },
            Arc::new(PipelineMetrics::new()),
        );

        let input = stream::iter(crate::tests::support::items(10).into_iter().map(Ok));
        let (mut rx, handle) = scheduler.spawn(input);
        let pairs = futures::stream::poll_fn(move |cx| rx.poll_recv(cx));

        let results: Vec<_> = executor.execute(&pool, pairs).collect().await;
        handle.await.unwrap();

        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(processor.peak_in_flight(), 2);
        assert_eq!(pool.stats().available, 4);
    }

    #[tokio::test]
    async fn test_upstream_error_passes_through() {
        let pool = pool_of(1);
        let processor = Arc::new(TestProcessor::new());
        let executor = executor(processor, 1);
        let pairs = stream::iter(vec![
            Ok(pair(&pool, TestItem::new(1))),
            Err(ScrapeError::InputError("truncated".to_string())),
        ]);

        let results: Vec<_> = executor.execute(&pool, pairs).collect().await;

        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ScrapeError::InputError(_)))));
        assert_eq!(pool.stats().available, 1);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
