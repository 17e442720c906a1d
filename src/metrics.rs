use metrics::{register_counter, register_gauge, register_histogram, Counter, Gauge, Histogram};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

use crate::ScrapeError;

/// Counters for one pipeline run.
///
/// Every update goes to the installed `metrics` recorder (a no-op unless
/// [`PrometheusExporter::start`] ran first) and to local atomics that back
/// [`PipelineMetrics::snapshot`].
pub struct PipelineMetrics {
    items_bound: Counter,
    items_completed: Counter,
    items_failed: Counter,
    items_skipped: Counter,
    starvation_warnings: Counter,
    sink_errors: Counter,
    pages_in_flight: Gauge,
    page_duration: Histogram,

    bound: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    starved: AtomicU64,
    sink_failures: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            items_bound: register_counter!("places_items_bound_total"),
            items_completed: register_counter!("places_items_completed_total"),
            items_failed: register_counter!("places_items_failed_total"),
            items_skipped: register_counter!("places_items_skipped_total"),
            starvation_warnings: register_counter!("places_starvation_warnings_total"),
            sink_errors: register_counter!("places_sink_errors_total"),
            pages_in_flight: register_gauge!("places_pages_in_flight"),
            page_duration: register_histogram!("places_page_duration_seconds"),

            bound: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            starved: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            peak_in_flight: AtomicU64::new(0),
        }
    }

    pub fn record_bound(&self) {
        self.items_bound.increment(1);
        self.bound.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_starvation_warning(&self) {
        self.starvation_warnings.increment(1);
        self.starved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.items_skipped.increment(1);
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, duration: Duration) {
        self.items_completed.increment(1);
        self.page_duration.record(duration.as_secs_f64());
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.items_failed.increment(1);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_error(&self) {
        self.sink_errors.increment(1);
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks the start of a processing call and tracks the high-water mark.
    pub fn enter_processing(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.pages_in_flight.increment(1.0);
    }

    pub fn leave_processing(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.pages_in_flight.decrement(1.0);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_bound: self.bound.load(Ordering::Relaxed),
            items_completed: self.completed.load(Ordering::Relaxed),
            items_failed: self.failed.load(Ordering::Relaxed),
            items_skipped: self.skipped.load(Ordering::Relaxed),
            starvation_warnings: self.starved.load(Ordering::Relaxed),
            sink_errors: self.sink_failures.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub items_bound: u64,
    pub items_completed: u64,
    pub items_failed: u64,
    pub items_skipped: u64,
    pub starvation_warnings: u64,
    pub sink_errors: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
}

impl MetricsSnapshot {
    /// Items that produced a result without an outcome.
    pub fn degraded(&self) -> u64 {
        self.items_failed + self.items_skipped
    }
}

/// Serves the Prometheus scrape endpoint for the lifetime of the process.
pub struct PrometheusExporter {
    addr: SocketAddr,
}

impl PrometheusExporter {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Installs the global recorder; must run inside the tokio runtime and
    /// before any [`PipelineMetrics`] is created.
    pub fn start(&self) -> Result<(), ScrapeError> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .install()
            .map_err(|e| {
                ScrapeError::ConfigurationError(format!(
                    "failed to start metrics exporter on {}: {}",
                    self.addr, e
                ))
            })?;

        info!("Prometheus metrics available on http://{}/metrics", self.addr);
        Ok(())
    }
}
